//! Derived metrics over a particle snapshot.

use crate::calibration::mean_density;
use crate::particle::ParticleBuffers;

/// Aggregate state of a simulation snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    /// Number of particles.
    pub particle_count: usize,
    /// Mean density.
    pub mean_density: f32,
    /// Largest `|rho_i - rho0| / rho0`.
    pub max_density_deviation: f32,
    /// `sum m v`.
    pub total_momentum: [f32; 3],
    /// `sum m |v|^2 / 2`.
    pub kinetic_energy: f32,
    /// Largest `|v|`.
    pub max_speed: f32,
}

impl Diagnostics {
    /// Measure `particles` with per-particle `mass` against `rest_density`.
    pub fn measure(particles: &ParticleBuffers, mass: f32, rest_density: f32) -> Self {
        let mut momentum = [0.0f64; 3];
        let mut kinetic = 0.0f64;
        let mut max_speed = 0.0f32;
        for v in &particles.velocity {
            let s2 = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
            for k in 0..3 {
                momentum[k] += (mass * v[k]) as f64;
            }
            kinetic += 0.5 * (mass * s2) as f64;
            max_speed = max_speed.max(s2.sqrt());
        }
        let max_density_deviation = particles
            .density
            .iter()
            .map(|&d| (d - rest_density).abs() / rest_density)
            .fold(0.0f32, f32::max);
        Self {
            particle_count: particles.len(),
            mean_density: mean_density(&particles.density),
            max_density_deviation,
            total_momentum: momentum.map(|m| m as f32),
            kinetic_energy: kinetic as f32,
            max_speed,
        }
    }

    /// Magnitude of the total momentum.
    pub fn momentum_magnitude(&self) -> f32 {
        let p = self.total_momentum;
        (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_velocities_cancel() {
        let mut p = ParticleBuffers::from_positions(&[[0.0; 3], [1.0, 0.0, 0.0]], [0.0; 3]);
        p.velocity[0] = [1.0, 0.0, 0.0, 0.0];
        p.velocity[1] = [-1.0, 0.0, 0.0, 0.0];
        p.density = vec![1.0, 1.2];
        let d = Diagnostics::measure(&p, 2.0, 1.0);
        assert_eq!(d.momentum_magnitude(), 0.0);
        assert!((d.kinetic_energy - 2.0).abs() < 1.0e-6);
        assert_eq!(d.max_speed, 1.0);
        assert!((d.mean_density - 1.1).abs() < 1.0e-6);
        assert!((d.max_density_deviation - 0.2).abs() < 1.0e-6);
    }
}
