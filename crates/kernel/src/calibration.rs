//! One-time mass calibration.
//!
//! Choosing the mass scale `s` that minimizes `sum_i (s rho_i - rho0)^2` gives
//!
//! ```text
//! s = rho0 * sum(rho) / sum(rho^2)
//! ```
//!
//! Since density is linear in mass, multiplying the particle mass by `s`
//! moves the mean initial density onto `rho0`.

/// Least-squares mass scale, or `None` when the densities are degenerate.
pub fn mass_scale(densities: &[f32], rest_density: f32) -> Option<f32> {
    let (sum, sum_sq) = densities.iter().fold((0.0f64, 0.0f64), |(s, s2), &rho| {
        let rho = rho as f64;
        (s + rho, s2 + rho * rho)
    });
    if sum_sq == 0.0 || !sum_sq.is_finite() {
        return None;
    }
    let scale = rest_density as f64 * sum / sum_sq;
    if scale.is_finite() && scale > 0.0 {
        Some(scale as f32)
    } else {
        None
    }
}

/// Mean of `densities`, zero when empty.
pub fn mean_density(densities: &[f32]) -> f32 {
    if densities.is_empty() {
        return 0.0;
    }
    (densities.iter().map(|&d| d as f64).sum::<f64>() / densities.len() as f64) as f32
}

/// Outcome of [`crate::Simulation::calibrate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationReport {
    /// Applied scale, `None` when calibration was skipped.
    pub scale: Option<f32>,
    /// Particle mass before calibration.
    pub mass_before: f32,
    /// Particle mass after calibration.
    pub mass_after: f32,
    /// Mean density measured with the old mass.
    pub mean_density_before: f32,
    /// Mean density expected with the new mass.
    pub mean_density_after: f32,
}

impl CalibrationReport {
    /// Report for a skipped calibration.
    pub fn skipped(mass: f32, mean_density: f32) -> Self {
        Self {
            scale: None,
            mass_before: mass,
            mass_after: mass,
            mean_density_before: mean_density,
            mean_density_after: mean_density,
        }
    }

    /// True when the mass was rescaled.
    pub fn applied(&self) -> bool {
        self.scale.is_some()
    }
}
