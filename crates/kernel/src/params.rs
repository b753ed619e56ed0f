//! Tunable simulation parameters and the kernel set built from them.
//!
//! [`SimulationParams`] is the serde-facing description that configuration
//! files and tuning UIs edit. [`KernelSet`] is the validated, precomputed
//! form that stages read while a step is running. Rebuilding the kernel set
//! is the only way parameter changes reach the stages.

use serde::{Deserialize, Serialize};

use crate::eos::EquationOfState;
use crate::error::{SimError, SimResult};
use crate::integrate::IntegratorKind;
use crate::neighbor::NeighborStrategy;
use crate::sph::KernelCoefficients;

/// Parameters of one SPH simulation.
///
/// Immutable while a step runs; changed between steps through
/// [`crate::Simulation::set_params`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Rest density `rho0`.
    #[serde(default = "default_rest_density")]
    pub rest_density: f32,
    /// Mass of every particle. Rescaled by calibration.
    #[serde(default = "default_particle_mass")]
    pub particle_mass: f32,
    /// Smoothing radius `h`. Also the hash grid cell size.
    #[serde(default = "default_smoothing_radius")]
    pub smoothing_radius: f32,
    /// Pressure stiffness `K`.
    #[serde(default = "default_stiffness")]
    pub stiffness: f32,
    /// Viscosity coefficient `eps`.
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
    /// Half-size `b` of the axis-aligned box `[-b, b]^3`.
    #[serde(default = "default_box_half_size")]
    pub box_half_size: f32,
    /// Time step `dt` in seconds.
    #[serde(default = "default_time_step")]
    pub time_step: f32,
    /// Factor applied to the reflected velocity component at a wall.
    #[serde(default = "default_boundary_damping")]
    pub boundary_damping: f32,
    /// Density-to-pressure relation.
    #[serde(default)]
    pub eos: EquationOfState,
    /// How stages enumerate neighbors.
    #[serde(default)]
    pub neighbor_strategy: NeighborStrategy,
    /// Time integration scheme.
    #[serde(default)]
    pub integrator: IntegratorKind,
    /// Hash table capacity override. Sized from the particle count when absent.
    #[serde(default)]
    pub cell_table_capacity: Option<u32>,
    /// Fail the step when integration produces NaN or infinite values.
    #[serde(default = "default_true")]
    pub check_finite: bool,
}

fn default_rest_density() -> f32 {
    1.0
}
fn default_particle_mass() -> f32 {
    0.1
}
fn default_smoothing_radius() -> f32 {
    1.0
}
fn default_stiffness() -> f32 {
    250.0
}
fn default_viscosity() -> f32 {
    0.018
}
fn default_box_half_size() -> f32 {
    4.0
}
fn default_time_step() -> f32 {
    0.001
}
fn default_boundary_damping() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            rest_density: default_rest_density(),
            particle_mass: default_particle_mass(),
            smoothing_radius: default_smoothing_radius(),
            stiffness: default_stiffness(),
            viscosity: default_viscosity(),
            box_half_size: default_box_half_size(),
            time_step: default_time_step(),
            boundary_damping: default_boundary_damping(),
            eos: EquationOfState::default(),
            neighbor_strategy: NeighborStrategy::default(),
            integrator: IntegratorKind::default(),
            cell_table_capacity: None,
            check_finite: true,
        }
    }
}

impl SimulationParams {
    /// Check every constant a stage depends on.
    ///
    /// Errors name the first stage that would consume the bad value.
    pub fn validate(&self) -> SimResult<()> {
        fn positive(stage: &'static str, name: &str, v: f32) -> SimResult<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(SimError::build(stage, format!("{name} must be positive and finite, got {v}")))
            }
        }
        fn non_negative(stage: &'static str, name: &str, v: f32) -> SimResult<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(SimError::build(stage, format!("{name} must be non-negative and finite, got {v}")))
            }
        }

        positive("cell_index", "smoothing_radius", self.smoothing_radius)?;
        positive("density", "particle_mass", self.particle_mass)?;
        positive("forces", "rest_density", self.rest_density)?;
        non_negative("forces", "stiffness", self.stiffness)?;
        non_negative("forces", "viscosity", self.viscosity)?;
        positive("integrate", "box_half_size", self.box_half_size)?;
        positive("integrate", "time_step", self.time_step)?;
        if !(0.0..=1.0).contains(&self.boundary_damping) {
            return Err(SimError::build(
                "integrate",
                format!("boundary_damping must be in [0, 1], got {}", self.boundary_damping),
            ));
        }
        if self.cell_table_capacity == Some(0) {
            return Err(SimError::build("cell_index", "cell_table_capacity must be non-zero"));
        }
        Ok(())
    }

    /// Hash table capacity for `n` particles.
    pub fn cell_capacity(&self, n: usize) -> u32 {
        match self.cell_table_capacity {
            Some(c) => c,
            None => default_cell_capacity(n),
        }
    }
}

/// Default hash table capacity: the next power of two at or above `2n`, at least 64.
pub fn default_cell_capacity(n: usize) -> u32 {
    let target = (2 * n).max(64);
    u32::try_from(target.next_power_of_two()).unwrap_or(1 << 31)
}

/// Validated, precomputed constants shared by every stage.
///
/// Built from [`SimulationParams`] and bound to a backend; stages never read
/// `SimulationParams` directly.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct KernelSet {
    pub coefficients: KernelCoefficients,
    pub particle_mass: f32,
    pub rest_density: f32,
    pub stiffness: f32,
    pub viscosity: f32,
    pub box_half_size: f32,
    pub boundary_damping: f32,
    pub eos: EquationOfState,
    pub neighbor_strategy: NeighborStrategy,
    pub check_finite: bool,
}

impl KernelSet {
    /// Validate `params` and precompute kernel constants.
    pub fn build(params: &SimulationParams) -> SimResult<Self> {
        params.validate()?;
        Ok(Self {
            coefficients: KernelCoefficients::new(params.smoothing_radius),
            particle_mass: params.particle_mass,
            rest_density: params.rest_density,
            stiffness: params.stiffness,
            viscosity: params.viscosity,
            box_half_size: params.box_half_size,
            boundary_damping: params.boundary_damping,
            eos: params.eos,
            neighbor_strategy: params.neighbor_strategy,
            check_finite: params.check_finite,
        })
    }

    /// Smoothing radius `h`.
    #[inline]
    pub fn h(&self) -> f32 {
        self.coefficients.h
    }

    /// Pressure of a particle at `density`.
    #[inline]
    pub fn pressure(&self, density: f32) -> f32 {
        self.eos.pressure(density, self.rest_density, self.stiffness)
    }

    /// Lower bound on any particle's density: its own contribution.
    #[inline]
    pub fn min_density(&self) -> f32 {
        self.particle_mass * self.coefficients.poly6_at_zero()
    }
}
