//! Equations of state mapping density to pressure.
//!
//! Both variants are pure functions of density, so switching between them
//! only changes which arm of [`EquationOfState::pressure`] the force stage
//! evaluates. No per-particle pressure buffer is kept.

use serde::{Deserialize, Serialize};

/// Exponent of the power-law (Tait-style) equation of state.
pub const POWER_LAW_EXPONENT: i32 = 7;

/// Density-to-pressure relation used by the force stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquationOfState {
    /// Linear relation.
    ///
    /// ```text
    /// p = K * (rho - rho0)
    /// ```
    #[default]
    Linear,
    /// Stiff power-law relation.
    ///
    /// ```text
    /// p = K * ((rho / rho0)^7 - 1)
    /// ```
    PowerLaw,
}

impl EquationOfState {
    /// Pressure at `density` for stiffness `stiffness` and rest density `rest_density`.
    ///
    /// Negative (tension) below rest density for both variants.
    #[inline]
    pub fn pressure(self, density: f32, rest_density: f32, stiffness: f32) -> f32 {
        match self {
            EquationOfState::Linear => stiffness * (density - rest_density),
            EquationOfState::PowerLaw => {
                let ratio = density / rest_density;
                stiffness * (ratio.powi(POWER_LAW_EXPONENT) - 1.0)
            }
        }
    }

    /// Short name used in logs and shader variant selection.
    pub fn name(self) -> &'static str {
        match self {
            EquationOfState::Linear => "linear",
            EquationOfState::PowerLaw => "power-law",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_zero_at_rest_density() {
        for eos in [EquationOfState::Linear, EquationOfState::PowerLaw] {
            let p = eos.pressure(4.0, 4.0, 220.0);
            assert!(p.abs() < 1.0e-4, "{} pressure at rest should be ~0, got {p}", eos.name());
        }
    }

    #[test]
    fn positive_when_compressed() {
        for eos in [EquationOfState::Linear, EquationOfState::PowerLaw] {
            let p = eos.pressure(4.2, 4.0, 220.0);
            assert!(p > 0.0, "{} compressed pressure should be positive, got {p}", eos.name());
        }
    }

    #[test]
    fn negative_when_expanded() {
        for eos in [EquationOfState::Linear, EquationOfState::PowerLaw] {
            let p = eos.pressure(3.8, 4.0, 220.0);
            assert!(p < 0.0, "{} expanded pressure should be negative, got {p}", eos.name());
        }
    }

    #[test]
    fn linear_matches_formula() {
        let p = EquationOfState::Linear.pressure(5.0, 4.0, 10.0);
        assert!((p - 10.0).abs() < 1.0e-6);
    }

    #[test]
    fn power_law_is_stiffer_above_rest() {
        // For rho/rho0 = 1.1: linear gives K*0.1*rho0, power law gives K*(1.1^7 - 1) ~ 0.949K.
        let lin = EquationOfState::Linear.pressure(1.1, 1.0, 1.0);
        let pow = EquationOfState::PowerLaw.pressure(1.1, 1.0, 1.0);
        assert!(pow > lin, "power law {pow} should exceed linear {lin}");
        assert!((pow - (1.1f32.powi(7) - 1.0)).abs() < 1.0e-5);
    }

    #[test]
    fn serde_uses_variant_names() {
        let json = serde_json::to_string(&EquationOfState::PowerLaw).unwrap();
        assert_eq!(json, "\"PowerLaw\"");
    }
}
