//! Initial particle placement.
//!
//! Fills a cube or a square sheet with a regular lattice centered on the
//! configured point. The requested count is rounded down to the largest full
//! lattice.

use sph_kernel::ParticleBuffers;

use crate::config::{SceneConfig, SceneShape};

/// Lattice positions for `scene`, x fastest.
pub fn lattice_positions(scene: &SceneConfig) -> Vec<[f32; 3]> {
    let side = scene.side();
    let half = scene.half_extent();
    let [cx, cy, cz] = scene.center;
    let coord = |i: usize| i as f32 * scene.spacing - half;

    let layers = match scene.shape {
        SceneShape::Cube => side,
        SceneShape::Square => 1,
    };
    let mut out = Vec::with_capacity(scene.particle_count());
    for z in 0..layers {
        let pz = match scene.shape {
            SceneShape::Cube => cz + coord(z),
            SceneShape::Square => cz,
        };
        for y in 0..side {
            for x in 0..side {
                out.push([cx + coord(x), cy + coord(y), pz]);
            }
        }
    }
    out
}

/// Particle buffers for `scene` with the configured initial velocity.
pub fn build_particles(scene: &SceneConfig) -> ParticleBuffers {
    let positions = lattice_positions(scene);
    if positions.len() != scene.requested_count {
        tracing::info!(
            requested = scene.requested_count,
            placed = positions.len(),
            shape = ?scene.shape,
            "particle count rounded down to a full lattice"
        );
    }
    ParticleBuffers::from_positions(&positions, scene.initial_velocity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(shape: SceneShape, requested_count: usize) -> SceneConfig {
        SceneConfig {
            shape,
            requested_count,
            spacing: 0.5,
            center: [1.0, -1.0, 0.25],
            initial_velocity: [0.0, 0.0, -1.0],
        }
    }

    #[test]
    fn cube_is_centered() {
        let s = scene(SceneShape::Cube, 30);
        let p = lattice_positions(&s);
        assert_eq!(p.len(), 27);
        assert_eq!(p[13], [1.0, -1.0, 0.25]);
        assert_eq!(p[0], [0.5, -1.5, -0.25]);
        assert_eq!(p[26], [1.5, -0.5, 0.75]);
    }

    #[test]
    fn square_is_flat() {
        let s = scene(SceneShape::Square, 1000);
        let p = lattice_positions(&s);
        assert_eq!(p.len(), 961);
        assert!(p.iter().all(|q| q[2] == 0.25));
        let xs: f32 = p.iter().map(|q| q[0]).sum::<f32>() / p.len() as f32;
        assert!((xs - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn particles_carry_initial_velocity() {
        let s = scene(SceneShape::Cube, 8);
        let particles = build_particles(&s);
        assert_eq!(particles.len(), 8);
        assert!(particles.velocity.iter().all(|v| *v == [0.0, 0.0, -1.0, 0.0]));
        assert!(particles.density.iter().all(|&d| d == 0.0));
    }
}
