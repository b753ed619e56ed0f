//! Particle buffer set.
//!
//! Four parallel arrays indexed by particle id. Positions, velocities and
//! forces are `vec4` with the `w` lane unused so the layout matches the
//! storage buffers a renderer binds directly.

/// Four-component vector with `w` as padding.
pub type Vec4 = [f32; 4];

/// Position, velocity, density and force of every particle.
///
/// All arrays have length `N` for the lifetime of the set. Densities are only
/// meaningful after the density stage, forces after the force stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleBuffers {
    /// Positions (`w` unused).
    pub position: Vec<Vec4>,
    /// Velocities (`w` unused).
    pub velocity: Vec<Vec4>,
    /// Densities.
    pub density: Vec<f32>,
    /// Net forces (`w` unused).
    pub force: Vec<Vec4>,
}

impl ParticleBuffers {
    /// Allocate `n` particles at the origin at rest.
    pub fn zeroed(n: usize) -> Self {
        Self {
            position: vec![[0.0; 4]; n],
            velocity: vec![[0.0; 4]; n],
            density: vec![0.0; n],
            force: vec![[0.0; 4]; n],
        }
    }

    /// Build a set from initial positions, all sharing `velocity`.
    pub fn from_positions(positions: &[[f32; 3]], velocity: [f32; 3]) -> Self {
        let n = positions.len();
        let mut set = Self::zeroed(n);
        for (dst, p) in set.position.iter_mut().zip(positions) {
            *dst = [p[0], p[1], p[2], 0.0];
        }
        for v in &mut set.velocity {
            *v = [velocity[0], velocity[1], velocity[2], 0.0];
        }
        set
    }

    /// Number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// True when there are no particles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// True when all four arrays share one length.
    pub fn is_consistent(&self) -> bool {
        let n = self.position.len();
        self.velocity.len() == n && self.density.len() == n && self.force.len() == n
    }
}

/// Largest `r` with `r^dims <= n`.
///
/// Used to round a requested particle count down to a full lattice.
pub fn lattice_side(n: usize, dims: u32) -> usize {
    if n == 0 || dims == 0 {
        return 0;
    }
    let pow = |r: usize| -> Option<usize> { r.checked_pow(dims) };
    let mut r = (n as f64).powf(1.0 / dims as f64).round() as usize;
    while r > 0 && pow(r).map_or(true, |v| v > n) {
        r -= 1;
    }
    while pow(r + 1).is_some_and(|v| v <= n) {
        r += 1;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_is_consistent() {
        let p = ParticleBuffers::zeroed(7);
        assert_eq!(p.len(), 7);
        assert!(p.is_consistent());
        assert!(!p.is_empty());
    }

    #[test]
    fn from_positions_pads_w() {
        let p = ParticleBuffers::from_positions(&[[1.0, 2.0, 3.0]], [0.5, 0.0, 0.0]);
        assert_eq!(p.position[0], [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(p.velocity[0], [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(p.density, vec![0.0]);
    }

    #[test]
    fn default_is_empty() {
        assert!(ParticleBuffers::default().is_empty());
    }

    #[test]
    fn cube_sides_round_down() {
        assert_eq!(lattice_side(1000, 3), 10);
        assert_eq!(lattice_side(999, 3), 9);
        assert_eq!(lattice_side(512, 3), 8);
        assert_eq!(lattice_side(5000, 3), 17);
        assert_eq!(lattice_side(1, 3), 1);
        assert_eq!(lattice_side(0, 3), 0);
    }

    #[test]
    fn square_sides_round_down() {
        assert_eq!(lattice_side(1000, 2), 31);
        assert_eq!(lattice_side(1024, 2), 32);
    }
}
