//! Density estimation.
//!
//! ```text
//! rho_i = sum_j m * W_poly6(|x_i - x_j|, h)      j over neighbors, i included
//! ```

use rayon::prelude::*;

use crate::neighbor::HashGrid;
use crate::params::KernelSet;
use crate::particle::Vec4;

/// Density of particle `i`.
#[inline]
pub fn density_at(grid: &HashGrid, kernels: &KernelSet, positions: &[Vec4], i: usize) -> f32 {
    let c = &kernels.coefficients;
    let mut sum = 0.0f32;
    grid.visit(kernels.neighbor_strategy, i, positions, c.h, |_, _, r2| {
        sum += c.poly6_r2(r2);
    });
    kernels.particle_mass * sum
}

/// Fill `densities` for every particle, one parallel task per particle.
pub fn compute_densities(grid: &HashGrid, kernels: &KernelSet, positions: &[Vec4], densities: &mut [f32]) {
    debug_assert_eq!(positions.len(), densities.len());
    densities
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, rho)| *rho = density_at(grid, kernels, positions, i));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::NeighborStrategy;
    use crate::params::SimulationParams;

    fn kernels(strategy: NeighborStrategy) -> KernelSet {
        KernelSet::build(&SimulationParams {
            smoothing_radius: 0.7,
            particle_mass: 0.5,
            neighbor_strategy: strategy,
            ..Default::default()
        })
        .unwrap()
    }

    fn lattice(n: usize, spacing: f32) -> Vec<Vec4> {
        let mut out = Vec::new();
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    out.push([x as f32 * spacing, y as f32 * spacing, z as f32 * spacing, 0.0]);
                }
            }
        }
        out
    }

    #[test]
    fn isolated_particle_has_self_density() {
        let k = kernels(NeighborStrategy::Grid);
        let pos = vec![[0.0, 0.0, 0.0, 0.0], [10.0, 0.0, 0.0, 0.0]];
        let mut grid = HashGrid::new(2, k.h(), 64);
        grid.rebuild(&pos);
        let mut rho = vec![0.0; 2];
        compute_densities(&grid, &k, &pos, &mut rho);
        for r in rho {
            assert!((r - k.min_density()).abs() < 1.0e-5);
        }
    }

    #[test]
    fn density_never_below_self_contribution() {
        let k = kernels(NeighborStrategy::Grid);
        let pos = lattice(6, 0.45);
        let mut grid = HashGrid::new(pos.len(), k.h(), 512);
        grid.rebuild(&pos);
        let mut rho = vec![0.0; pos.len()];
        compute_densities(&grid, &k, &pos, &mut rho);
        let floor = k.min_density();
        assert!(rho.iter().all(|&r| r >= floor * (1.0 - 1.0e-6)));
        // Interior particles have neighbors, so strictly more than the floor.
        assert!(rho.iter().any(|&r| r > floor * 1.5));
    }

    #[test]
    fn strategies_agree() {
        let pos = lattice(5, 0.5);
        let mut grid = HashGrid::new(pos.len(), 0.7, 256);
        grid.rebuild(&pos);
        let mut reference = vec![0.0; pos.len()];
        compute_densities(&grid, &kernels(NeighborStrategy::Naive), &pos, &mut reference);
        for strategy in [NeighborStrategy::Grid, NeighborStrategy::GridChecked] {
            let mut rho = vec![0.0; pos.len()];
            compute_densities(&grid, &kernels(strategy), &pos, &mut rho);
            for (a, b) in rho.iter().zip(&reference) {
                assert!((a - b).abs() <= 1.0e-5 * b.abs(), "{strategy:?}: {a} vs {b}");
            }
        }
    }
}
