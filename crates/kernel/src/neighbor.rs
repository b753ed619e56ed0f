//! Spatial hash grid for neighbor search.
//!
//! Positions are bucketed into cells of edge `h`; cell coordinates are hashed
//! into a flat table of `capacity` entries. Each step rebuilds the table in
//! four stages that map one-to-one onto device dispatches:
//!
//! 1. [`HashGrid::compute_cell_indices`] -- hashed cell per particle.
//! 2. [`HashGrid::clear_offsets`] -- every table slot set to [`EMPTY`].
//! 3. [`HashGrid::sort`] -- particle ids ordered by (cell, id).
//! 4. [`HashGrid::calc_offsets`] -- start of each cell's run in the sorted list.
//!
//! Distinct cells may hash to the same slot. Their runs then merge, which only
//! adds candidates: every candidate is distance-filtered before use.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::particle::Vec4;

/// Marker for an empty offset slot or an unused (padding) key.
pub const EMPTY: u32 = u32::MAX;

const HASH_PRIMES: [u32; 3] = [73_856_093, 19_349_663, 83_492_791];

/// How density and force stages enumerate neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborStrategy {
    /// Hash grid with indexed table reads. A corrupt table is an invariant
    /// violation and aborts the stage.
    #[default]
    Grid,
    /// Hash grid with every table read bounds-checked; out-of-range entries
    /// are skipped.
    GridChecked,
    /// All-pairs scan. Reference path for validating the grid.
    #[cfg(any(test, feature = "reference-search"))]
    Naive,
}

/// Integer cell coordinates of `p` for cell edge `cell_size`.
#[inline]
pub fn cell_coord(p: &Vec4, cell_size: f32) -> [i32; 3] {
    [
        (p[0] / cell_size).floor() as i32,
        (p[1] / cell_size).floor() as i32,
        (p[2] / cell_size).floor() as i32,
    ]
}

/// Hash of integer cell coordinates into `[0, capacity)`.
///
/// Wrapping 32-bit arithmetic so host and device agree bit for bit.
#[inline]
pub fn hash_cell(c: [i32; 3], capacity: u32) -> u32 {
    let h = (c[0] as u32).wrapping_mul(HASH_PRIMES[0])
        ^ (c[1] as u32).wrapping_mul(HASH_PRIMES[1])
        ^ (c[2] as u32).wrapping_mul(HASH_PRIMES[2]);
    h % capacity
}

/// Hashed cell table over a fixed particle count.
#[derive(Debug, Clone)]
pub struct HashGrid {
    cell_size: f32,
    capacity: u32,
    /// Hashed cell of each particle.
    cell_index_of: Vec<u32>,
    /// Particle ids sorted by `(cell_index_of, id)`.
    particle_index: Vec<u32>,
    /// Start of each slot's run in `particle_index`, or [`EMPTY`].
    offset: Vec<u32>,
    sort_keys: Vec<(u32, u32)>,
}

impl HashGrid {
    /// Allocate a grid for `n` particles with `capacity` table slots.
    ///
    /// # Panics
    /// If `cell_size` is not positive or `capacity` is zero. Both are
    /// rejected earlier by parameter validation.
    pub fn new(n: usize, cell_size: f32, capacity: u32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        assert!(capacity > 0, "capacity must be non-zero");
        Self {
            cell_size,
            capacity,
            cell_index_of: vec![EMPTY; n],
            particle_index: (0..n as u32).collect(),
            offset: vec![EMPTY; capacity as usize],
            sort_keys: Vec::with_capacity(n),
        }
    }

    /// Cell edge length.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Change the cell edge. Takes effect at the next rebuild.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        assert!(cell_size > 0.0, "cell_size must be positive");
        self.cell_size = cell_size;
    }

    /// Number of table slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of particles the grid was sized for.
    pub fn len(&self) -> usize {
        self.cell_index_of.len()
    }

    /// True when sized for zero particles.
    pub fn is_empty(&self) -> bool {
        self.cell_index_of.is_empty()
    }

    /// Hashed cell of each particle.
    pub fn cell_index_of(&self) -> &[u32] {
        &self.cell_index_of
    }

    /// Sorted particle ids.
    pub fn particle_index(&self) -> &[u32] {
        &self.particle_index
    }

    /// Per-slot run starts.
    pub fn offsets(&self) -> &[u32] {
        &self.offset
    }

    /// Replace the table contents wholesale, e.g. after a device readback.
    pub fn load_tables(&mut self, cell_index_of: Vec<u32>, particle_index: Vec<u32>, offset: Vec<u32>) {
        debug_assert_eq!(cell_index_of.len(), self.len());
        debug_assert_eq!(particle_index.len(), self.len());
        debug_assert_eq!(offset.len(), self.capacity as usize);
        self.cell_index_of = cell_index_of;
        self.particle_index = particle_index;
        self.offset = offset;
    }

    /// Hashed slot of position `p`.
    #[inline]
    pub fn slot_of(&self, p: &Vec4) -> u32 {
        hash_cell(cell_coord(p, self.cell_size), self.capacity)
    }

    // -----------------------------------------------------------------------
    // Build stages
    // -----------------------------------------------------------------------

    /// Stage 1: hashed cell per particle.
    pub fn compute_cell_indices(&mut self, positions: &[Vec4]) {
        debug_assert_eq!(positions.len(), self.len());
        let cell_size = self.cell_size;
        let capacity = self.capacity;
        self.cell_index_of
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(c, p)| *c = hash_cell(cell_coord(p, cell_size), capacity));
    }

    /// Stage 2: mark every slot empty.
    pub fn clear_offsets(&mut self) {
        self.offset.par_iter_mut().for_each(|o| *o = EMPTY);
    }

    /// Stage 3: order particle ids by hashed cell, ties by id.
    pub fn sort(&mut self) {
        self.sort_keys.clear();
        self.cell_index_of
            .par_iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect_into_vec(&mut self.sort_keys);
        // Keys are unique, so an unstable sort yields the stable order.
        self.sort_keys.par_sort_unstable();
        self.particle_index
            .par_iter_mut()
            .zip(self.sort_keys.par_iter())
            .for_each(|(dst, &(_, i))| *dst = i);
    }

    /// Stage 4: record where each occupied slot's run begins.
    pub fn calc_offsets(&mut self) {
        let cells = &self.cell_index_of;
        let sorted = &self.particle_index;
        let starts: Vec<(u32, u32)> = (0..sorted.len())
            .into_par_iter()
            .filter_map(|s| {
                let key = cells[sorted[s] as usize];
                if key == EMPTY {
                    return None;
                }
                if s == 0 || cells[sorted[s - 1] as usize] != key {
                    Some((key, s as u32))
                } else {
                    None
                }
            })
            .collect();
        for (key, s) in starts {
            self.offset[key as usize] = s;
        }
    }

    /// Run all four stages in order.
    pub fn rebuild(&mut self, positions: &[Vec4]) {
        self.compute_cell_indices(positions);
        self.clear_offsets();
        self.sort();
        self.calc_offsets();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Distinct table slots covering the 27 cells around `p`.
    ///
    /// Returns the slot array and how many entries are valid.
    pub fn neighbor_slots(&self, p: &Vec4) -> ([u32; 27], usize) {
        let c = cell_coord(p, self.cell_size);
        let mut slots = [0u32; 27];
        let mut count = 0;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let cell = [
                        c[0].wrapping_add(dx),
                        c[1].wrapping_add(dy),
                        c[2].wrapping_add(dz),
                    ];
                    let slot = hash_cell(cell, self.capacity);
                    if !slots[..count].contains(&slot) {
                        slots[count] = slot;
                        count += 1;
                    }
                }
            }
        }
        (slots, count)
    }

    /// Visit every particle `j` with `|x_i - x_j| < h`, `i` itself included.
    ///
    /// `f` receives `j`, the displacement `x_i - x_j` and its squared length.
    ///
    /// # Panics
    /// If the tables are inconsistent with each other.
    #[inline]
    pub fn for_each_neighbor<F>(&self, i: usize, positions: &[Vec4], radius: f32, mut f: F)
    where
        F: FnMut(usize, [f32; 3], f32),
    {
        let pi = positions[i];
        let r2_max = radius * radius;
        let (slots, count) = self.neighbor_slots(&pi);
        let n = self.particle_index.len();
        for &slot in &slots[..count] {
            let start = self.offset[slot as usize];
            if start == EMPTY {
                continue;
            }
            let mut s = start as usize;
            while s < n {
                let j = self.particle_index[s] as usize;
                if self.cell_index_of[j] != slot {
                    break;
                }
                visit_candidate(&pi, j, positions, r2_max, &mut f);
                s += 1;
            }
        }
    }

    /// Same as [`HashGrid::for_each_neighbor`], but every table read is
    /// bounds-checked and out-of-range entries are skipped.
    pub fn for_each_neighbor_checked<F>(&self, i: usize, positions: &[Vec4], radius: f32, mut f: F)
    where
        F: FnMut(usize, [f32; 3], f32),
    {
        let Some(pi) = positions.get(i).copied() else {
            return;
        };
        let r2_max = radius * radius;
        let (slots, count) = self.neighbor_slots(&pi);
        for &slot in &slots[..count] {
            let Some(&start) = self.offset.get(slot as usize) else {
                continue;
            };
            if start == EMPTY {
                continue;
            }
            let mut s = start as usize;
            while let Some(&j) = self.particle_index.get(s) {
                let j = j as usize;
                match self.cell_index_of.get(j) {
                    Some(&c) if c == slot => {}
                    _ => break,
                }
                if j < positions.len() {
                    visit_candidate(&pi, j, positions, r2_max, &mut f);
                }
                s += 1;
            }
        }
    }

    /// Dispatch to the neighbor walk selected by `strategy`.
    #[inline]
    pub fn visit<F>(&self, strategy: NeighborStrategy, i: usize, positions: &[Vec4], radius: f32, f: F)
    where
        F: FnMut(usize, [f32; 3], f32),
    {
        match strategy {
            NeighborStrategy::Grid => self.for_each_neighbor(i, positions, radius, f),
            NeighborStrategy::GridChecked => self.for_each_neighbor_checked(i, positions, radius, f),
            #[cfg(any(test, feature = "reference-search"))]
            NeighborStrategy::Naive => crate::reference::for_each_neighbor_naive(i, positions, radius, f),
        }
    }
}

#[inline]
fn visit_candidate<F>(pi: &Vec4, j: usize, positions: &[Vec4], r2_max: f32, f: &mut F)
where
    F: FnMut(usize, [f32; 3], f32),
{
    let pj = positions[j];
    let d = [pi[0] - pj[0], pi[1] - pj[1], pi[2] - pj[2]];
    let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    if r2 < r2_max {
        f(j, d, r2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32, z: f32) -> Vec4 {
        [x, y, z, 0.0]
    }

    fn neighbors_of(grid: &HashGrid, i: usize, pos: &[Vec4], h: f32) -> Vec<usize> {
        let mut out = Vec::new();
        grid.for_each_neighbor(i, pos, h, |j, _, _| out.push(j));
        out.sort_unstable();
        out
    }

    #[test]
    fn hash_is_within_capacity() {
        for c in [[0, 0, 0], [-1, -1, -1], [i32::MAX, i32::MIN, 7], [123, -456, 789]] {
            assert!(hash_cell(c, 1024) < 1024);
            assert!(hash_cell(c, 97) < 97);
        }
    }

    #[test]
    fn cell_coord_floors_negative_positions() {
        assert_eq!(cell_coord(&p(-0.1, 0.1, -1.5), 1.0), [-1, 0, -2]);
    }

    #[test]
    fn single_particle_sees_itself() {
        let pos = vec![p(0.5, 0.5, 0.5)];
        let mut grid = HashGrid::new(1, 1.0, 64);
        grid.rebuild(&pos);
        assert_eq!(neighbors_of(&grid, 0, &pos, 1.0), vec![0]);
    }

    #[test]
    fn two_close_particles() {
        let pos = vec![p(0.5, 0.5, 0.5), p(0.51, 0.5, 0.5)];
        let mut grid = HashGrid::new(2, 0.2, 64);
        grid.rebuild(&pos);
        assert_eq!(neighbors_of(&grid, 0, &pos, 0.2), vec![0, 1]);
        assert_eq!(neighbors_of(&grid, 1, &pos, 0.2), vec![0, 1]);
    }

    #[test]
    fn two_far_particles() {
        let pos = vec![p(0.1, 0.1, 0.1), p(0.9, 0.9, 0.9)];
        let mut grid = HashGrid::new(2, 0.2, 64);
        grid.rebuild(&pos);
        assert_eq!(neighbors_of(&grid, 0, &pos, 0.2), vec![0]);
    }

    #[test]
    fn particles_across_cell_boundary() {
        let pos = vec![p(0.19, 0.5, 0.5), p(0.21, 0.5, 0.5)];
        let mut grid = HashGrid::new(2, 0.2, 64);
        grid.rebuild(&pos);
        assert_eq!(neighbors_of(&grid, 0, &pos, 0.2), vec![0, 1]);
    }

    #[test]
    fn particles_across_origin() {
        let pos = vec![p(-0.05, -0.05, -0.05), p(0.05, 0.05, 0.05)];
        let mut grid = HashGrid::new(2, 0.2, 64);
        grid.rebuild(&pos);
        assert_eq!(neighbors_of(&grid, 1, &pos, 0.2), vec![0, 1]);
    }

    #[test]
    fn full_collisions_still_filter_by_distance() {
        // Capacity 1: every cell lands in the same slot.
        let pos = vec![p(0.0, 0.0, 0.0), p(0.3, 0.0, 0.0), p(5.0, 5.0, 5.0)];
        let mut grid = HashGrid::new(3, 0.5, 1);
        grid.rebuild(&pos);
        assert_eq!(grid.offsets(), &[0]);
        assert_eq!(neighbors_of(&grid, 0, &pos, 0.5), vec![0, 1]);
        assert_eq!(neighbors_of(&grid, 2, &pos, 0.5), vec![2]);
    }

    #[test]
    fn colliding_slots_are_visited_once() {
        let pos = vec![p(0.0, 0.0, 0.0), p(0.1, 0.0, 0.0)];
        let mut grid = HashGrid::new(2, 0.5, 2);
        grid.rebuild(&pos);
        let mut count = 0;
        grid.for_each_neighbor(0, &pos, 0.5, |_, _, _| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn sort_orders_by_cell_then_id() {
        let pos = vec![p(3.5, 0.0, 0.0), p(0.5, 0.0, 0.0), p(3.6, 0.0, 0.0), p(0.6, 0.0, 0.0)];
        let mut grid = HashGrid::new(4, 1.0, 64);
        grid.rebuild(&pos);
        let cells = grid.cell_index_of();
        let sorted = grid.particle_index();
        for w in sorted.windows(2) {
            let (a, b) = (w[0] as usize, w[1] as usize);
            assert!(cells[a] < cells[b] || (cells[a] == cells[b] && a < b));
        }
    }

    #[test]
    fn unoccupied_slots_stay_empty() {
        let pos = vec![p(0.5, 0.5, 0.5)];
        let mut grid = HashGrid::new(1, 1.0, 64);
        grid.rebuild(&pos);
        let occupied = grid.offsets().iter().filter(|&&o| o != EMPTY).count();
        assert_eq!(occupied, 1);
        assert_eq!(grid.offsets()[grid.cell_index_of()[0] as usize], 0);
    }

    #[test]
    fn checked_walk_matches_indexed_walk() {
        let pos: Vec<Vec4> = (0..50)
            .map(|i| {
                let f = i as f32;
                p((f * 0.37).sin() * 2.0, (f * 0.91).cos() * 2.0, (f * 0.13).sin())
            })
            .collect();
        let mut grid = HashGrid::new(pos.len(), 0.8, 16);
        grid.rebuild(&pos);
        for i in 0..pos.len() {
            let mut a = Vec::new();
            let mut b = Vec::new();
            grid.for_each_neighbor(i, &pos, 0.8, |j, _, _| a.push(j));
            grid.for_each_neighbor_checked(i, &pos, 0.8, |j, _, _| b.push(j));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn checked_walk_skips_corrupt_offset() {
        let pos = vec![p(0.5, 0.5, 0.5)];
        let mut grid = HashGrid::new(1, 1.0, 64);
        grid.rebuild(&pos);
        let slot = grid.cell_index_of()[0] as usize;
        let mut offsets = grid.offsets().to_vec();
        offsets[slot] = 1000;
        grid.load_tables(grid.cell_index_of().to_vec(), grid.particle_index().to_vec(), offsets);
        let mut seen = 0;
        grid.for_each_neighbor_checked(0, &pos, 1.0, |_, _, _| seen += 1);
        assert_eq!(seen, 0);
    }
}
