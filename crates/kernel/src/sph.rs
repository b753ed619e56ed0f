//! SPH smoothing kernels.
//!
//! Three kernels with compact support `h` are used:
//! - poly6 for density summation,
//! - the spiky gradient for pressure forces,
//! - the viscosity Laplacian for viscous forces.
//!
//! Normalization constants depend only on `h` and are precomputed once per
//! kernel build in [`KernelCoefficients`].

use std::f32::consts::PI;

/// Separations below this distance contribute no gradient (direction undefined).
pub const MIN_SEPARATION: f32 = 1.0e-6;

/// Poly6 density kernel.
///
/// ```text
/// W(r, h) = 315 / (64 pi h^9) * (h^2 - r^2)^3    for r < h
/// W(r, h) = 0                                     otherwise
/// ```
pub fn poly6(r: f32, h: f32) -> f32 {
    KernelCoefficients::new(h).poly6_r2(r * r)
}

/// Spiky kernel gradient with respect to particle `i`.
///
/// `d` is the displacement `x_i - x_j` and `r = |d|`.
///
/// ```text
/// grad W(r, h) = -45 / (pi h^6) * (h - r)^2 * d / r    for MIN_SEPARATION <= r < h
/// ```
pub fn spiky_gradient(d: [f32; 3], r: f32, h: f32) -> [f32; 3] {
    KernelCoefficients::new(h).spiky_gradient(d, r)
}

/// Viscosity kernel Laplacian.
///
/// ```text
/// lap W(r, h) = 45 / (pi h^6) * (h - r)    for r < h
/// ```
pub fn viscosity_laplacian(r: f32, h: f32) -> f32 {
    KernelCoefficients::new(h).viscosity_laplacian(r)
}

/// Precomputed kernel constants for one smoothing radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelCoefficients {
    /// Smoothing radius.
    pub h: f32,
    /// `h * h`.
    pub h2: f32,
    /// `315 / (64 pi h^9)`.
    pub poly6: f32,
    /// `-45 / (pi h^6)`.
    pub spiky_grad: f32,
    /// `45 / (pi h^6)`.
    pub visc_lap: f32,
}

impl KernelCoefficients {
    /// Compute the constants for smoothing radius `h`.
    pub fn new(h: f32) -> Self {
        let h2 = h * h;
        let h6 = h2 * h2 * h2;
        let h9 = h6 * h2 * h;
        Self {
            h,
            h2,
            poly6: 315.0 / (64.0 * PI * h9),
            spiky_grad: -45.0 / (PI * h6),
            visc_lap: 45.0 / (PI * h6),
        }
    }

    /// Poly6 evaluated from a squared distance.
    #[inline]
    pub fn poly6_r2(&self, r2: f32) -> f32 {
        if r2 >= self.h2 {
            return 0.0;
        }
        let t = self.h2 - r2;
        self.poly6 * t * t * t
    }

    /// Self-contribution `W(0, h)`.
    #[inline]
    pub fn poly6_at_zero(&self) -> f32 {
        self.poly6_r2(0.0)
    }

    /// Spiky gradient for displacement `d = x_i - x_j` with length `r`.
    #[inline]
    pub fn spiky_gradient(&self, d: [f32; 3], r: f32) -> [f32; 3] {
        if r < MIN_SEPARATION || r >= self.h {
            return [0.0; 3];
        }
        let t = self.h - r;
        let s = self.spiky_grad * t * t / r;
        [s * d[0], s * d[1], s * d[2]]
    }

    /// Viscosity Laplacian at distance `r`.
    #[inline]
    pub fn viscosity_laplacian(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        self.visc_lap * (self.h - r)
    }
}
