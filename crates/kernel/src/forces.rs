//! Pressure and viscosity forces.
//!
//! Runs as a second neighbor pass once every density is known.
//!
//! ```text
//! F_p,i = -(m / rho_i) * sum_{j != i} m * (p_i + p_j) / (2 rho_j) * grad W_spiky(x_i - x_j)
//! F_v,i = eps * (m / rho_i) * sum_{j != i} m * (v_j - v_i) / rho_j * lap W_visc(|x_i - x_j|)
//! ```
//!
//! With equal masses both sums are antisymmetric in `(i, j)`, so internal
//! forces cancel pairwise and total momentum is conserved.

use rayon::prelude::*;

use crate::neighbor::HashGrid;
use crate::params::KernelSet;
use crate::particle::Vec4;

/// Net force on particle `i`.
#[inline]
pub fn force_at(
    grid: &HashGrid,
    kernels: &KernelSet,
    positions: &[Vec4],
    velocities: &[Vec4],
    densities: &[f32],
    i: usize,
) -> Vec4 {
    let c = &kernels.coefficients;
    let m = kernels.particle_mass;
    let rho_i = densities[i];
    let p_i = kernels.pressure(rho_i);
    let v_i = velocities[i];

    let mut pressure = [0.0f32; 3];
    let mut viscous = [0.0f32; 3];
    grid.visit(kernels.neighbor_strategy, i, positions, c.h, |j, d, r2| {
        if j == i {
            return;
        }
        let rho_j = densities[j];
        let r = r2.sqrt();

        let shared = m * (p_i + kernels.pressure(rho_j)) / (2.0 * rho_j);
        let grad = c.spiky_gradient(d, r);
        for k in 0..3 {
            pressure[k] += shared * grad[k];
        }

        let lap = m * c.viscosity_laplacian(r) / rho_j;
        let v_j = velocities[j];
        for k in 0..3 {
            viscous[k] += (v_j[k] - v_i[k]) * lap;
        }
    });

    let scale = m / rho_i;
    let eps = kernels.viscosity;
    [
        scale * (eps * viscous[0] - pressure[0]),
        scale * (eps * viscous[1] - pressure[1]),
        scale * (eps * viscous[2] - pressure[2]),
        0.0,
    ]
}

/// Fill `forces` for every particle, one parallel task per particle.
pub fn compute_forces(
    grid: &HashGrid,
    kernels: &KernelSet,
    positions: &[Vec4],
    velocities: &[Vec4],
    densities: &[f32],
    forces: &mut [Vec4],
) {
    forces
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, f)| *f = force_at(grid, kernels, positions, velocities, densities, i));
}
