//! All-pairs reference paths for validating the hash grid.
//!
//! Compiled for unit tests and with the `reference-search` feature only.

use crate::neighbor::{HashGrid, EMPTY};
use crate::params::KernelSet;
use crate::particle::Vec4;

/// Visit every `j` within `radius` of `i` by scanning all particles.
pub fn for_each_neighbor_naive<F>(i: usize, positions: &[Vec4], radius: f32, mut f: F)
where
    F: FnMut(usize, [f32; 3], f32),
{
    let pi = positions[i];
    let r2_max = radius * radius;
    for (j, pj) in positions.iter().enumerate() {
        let d = [pi[0] - pj[0], pi[1] - pj[1], pi[2] - pj[2]];
        let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        if r2 < r2_max {
            f(j, d, r2);
        }
    }
}

/// Densities by all-pairs summation.
pub fn naive_densities(kernels: &KernelSet, positions: &[Vec4]) -> Vec<f32> {
    let c = &kernels.coefficients;
    (0..positions.len())
        .map(|i| {
            let mut sum = 0.0;
            for_each_neighbor_naive(i, positions, c.h, |_, _, r2| sum += c.poly6_r2(r2));
            kernels.particle_mass * sum
        })
        .collect()
}

/// Verify that the grid tables describe a valid partition of all particles.
///
/// Checks that `particle_index` is a permutation ordered by cell, that every
/// occupied slot's offset points at the start of its run, and that walking
/// each run from its offset visits every particle exactly once.
pub fn check_grid_consistency(grid: &HashGrid) -> Result<(), String> {
    let n = grid.len();
    let cells = grid.cell_index_of();
    let sorted = grid.particle_index();
    let offsets = grid.offsets();

    let mut seen = vec![false; n];
    for &p in sorted {
        let p = p as usize;
        if p >= n || seen[p] {
            return Err(format!("particle_index is not a permutation (entry {p})"));
        }
        seen[p] = true;
    }

    for s in 1..n {
        if cells[sorted[s - 1] as usize] > cells[sorted[s] as usize] {
            return Err(format!("sorted order broken at slot {s}"));
        }
    }

    let mut visited = vec![0u32; n];
    for (slot, &start) in offsets.iter().enumerate() {
        if start == EMPTY {
            continue;
        }
        let start = start as usize;
        if start >= n {
            return Err(format!("offset of slot {slot} out of range: {start}"));
        }
        if start > 0 && cells[sorted[start - 1] as usize] == slot as u32 {
            return Err(format!("offset of slot {slot} is not the start of its run"));
        }
        let mut s = start;
        while s < n && cells[sorted[s] as usize] == slot as u32 {
            visited[sorted[s] as usize] += 1;
            s += 1;
        }
        if s == start {
            return Err(format!("slot {slot} has an offset but no particles"));
        }
    }
    if let Some(p) = visited.iter().position(|&v| v != 1) {
        return Err(format!("particle {p} visited {} times", visited[p]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SimulationParams;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cloud(seed: u64, n: usize, extent: f32) -> Vec<Vec4> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    0.0,
                ]
            })
            .collect()
    }

    #[test]
    fn grid_is_consistent_on_random_clouds() {
        for (seed, capacity) in [(1, 64), (2, 1024), (3, 7), (4, 1)] {
            let pos = cloud(seed, 500, 3.0);
            let mut grid = HashGrid::new(pos.len(), 0.5, capacity);
            grid.rebuild(&pos);
            check_grid_consistency(&grid).unwrap();
        }
    }

    #[test]
    fn corrupted_offset_is_detected() {
        let pos = cloud(9, 100, 2.0);
        let mut grid = HashGrid::new(pos.len(), 0.5, 256);
        grid.rebuild(&pos);
        let mut offsets = grid.offsets().to_vec();
        let occupied = offsets.iter().position(|&o| o != EMPTY && o > 0).unwrap();
        offsets[occupied] -= 1;
        grid.load_tables(grid.cell_index_of().to_vec(), grid.particle_index().to_vec(), offsets);
        assert!(check_grid_consistency(&grid).is_err());
    }

    #[test]
    fn grid_neighbors_match_all_pairs() {
        let h = 0.6;
        for capacity in [4096, 13] {
            let pos = cloud(42, 400, 2.5);
            let mut grid = HashGrid::new(pos.len(), h, capacity);
            grid.rebuild(&pos);
            for i in 0..pos.len() {
                let mut fast = Vec::new();
                grid.for_each_neighbor(i, &pos, h, |j, _, _| fast.push(j));
                let mut slow = Vec::new();
                for_each_neighbor_naive(i, &pos, h, |j, _, _| slow.push(j));
                fast.sort_unstable();
                assert_eq!(fast, slow, "particle {i}, capacity {capacity}");
            }
        }
    }

    #[test]
    fn naive_densities_match_grid() {
        let kernels = KernelSet::build(&SimulationParams {
            smoothing_radius: 0.6,
            ..Default::default()
        })
        .unwrap();
        let pos = cloud(7, 300, 1.5);
        let mut grid = HashGrid::new(pos.len(), 0.6, 1024);
        grid.rebuild(&pos);
        let mut fast = vec![0.0; pos.len()];
        crate::density::compute_densities(&grid, &kernels, &pos, &mut fast);
        let slow = naive_densities(&kernels, &pos);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((a - b).abs() <= 1.0e-5 * b, "{a} vs {b}");
        }
    }
}
