//! Reference test framework for SPH fluid simulation validation
//!
//! A reference test loads a JSON scenario through the orchestrator, runs it
//! for a fixed number of steps and checks the final state against physical
//! expectations: containment in the box, finite state, momentum, density
//! after calibration and a speed ceiling that catches integrator blow-up.

#[cfg(test)]
mod tests;

use anyhow::Context;
use sph_kernel::calibration::mean_density;
use sph_kernel::{ComputeBackend, Diagnostics, ParticleBuffers, Simulation};
use sph_orchestrator::{scene, BackendType, SimulationConfig};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// All positions finite and inside the box
    pub containment: Option<ContainmentCheck>,
    /// Total momentum stays small
    pub momentum: Option<MomentumCheck>,
    /// Mean density after calibration close to the rest density
    pub density: Option<DensityCheck>,
    /// No particle faster than a ceiling
    pub speed: Option<SpeedCheck>,
}

/// Check that particles stay inside `[-b - tolerance, b + tolerance]`
#[derive(Debug, Clone)]
pub struct ContainmentCheck {
    /// Allowed overshoot past the wall
    pub tolerance: f32,
}

/// Check total momentum per unit mass
#[derive(Debug, Clone)]
pub struct MomentumCheck {
    /// Maximum `|sum m v| / sum m`
    pub max_mean_velocity: f32,
}

/// Check the calibrated mean density
#[derive(Debug, Clone)]
pub struct DensityCheck {
    /// Maximum relative error of the mean density against `rho0`
    pub max_mean_error: f32,
}

/// Check the maximum particle speed
#[derive(Debug, Clone)]
pub struct SpeedCheck {
    /// Maximum allowed `|v|`
    pub max_speed: f32,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Final diagnostics
    pub diagnostics: Diagnostics,
    /// Mean density measured right after calibration
    pub calibrated_mean_density: f32,
    /// Number of steps executed
    pub steps: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: Some(message),
        }
    }

    fn fail(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: Some(message),
        }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Step count; the configuration's `max_steps` when absent
    pub steps: Option<u64>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// Final state of a scenario run.
struct RunOutcome {
    particles: ParticleBuffers,
    particle_mass: f32,
    diagnostics: Diagnostics,
    calibrated_mean_density: f32,
    steps: u64,
    sim_time: f64,
}

fn run_scenario<B: ComputeBackend>(mut sim: Simulation<B>, steps: u64) -> anyhow::Result<RunOutcome> {
    let densities = sim.estimate_densities().context("initial density pass")?;
    let calibrated_mean_density = mean_density(&densities);

    let dt = sim.params().time_step as f64;
    let log_every = (steps / 10).max(1);
    for step in 0..steps {
        sim.update().with_context(|| format!("step {step}"))?;
        if (step + 1) % log_every == 0 {
            tracing::info!(step = step + 1, total = steps, "progress");
        }
    }

    let particles = sim.snapshot()?;
    let params = sim.params();
    let diagnostics = Diagnostics::measure(&particles, params.particle_mass, params.rest_density);
    Ok(RunOutcome {
        particle_mass: params.particle_mass,
        particles,
        diagnostics,
        calibrated_mean_density,
        steps,
        sim_time: steps as f64 * dt,
    })
}

fn run_config(config: &SimulationConfig, steps: u64) -> anyhow::Result<RunOutcome> {
    let particles = scene::build_particles(&config.scene);
    match config.backend {
        #[cfg(feature = "gpu")]
        BackendType::Gpu => run_scenario(sph_orchestrator::gpu_simulation(config, &particles)?, steps),
        #[cfg(feature = "gpu")]
        BackendType::Auto if sph_kernel::gpu_available() => {
            run_scenario(sph_orchestrator::gpu_simulation(config, &particles)?, steps)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => anyhow::bail!("scenario requires the `gpu` feature"),
        BackendType::Host | BackendType::Auto => {
            run_scenario(sph_orchestrator::host_simulation(config, particles)?, steps)
        }
    }
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> anyhow::Result<TestResult> {
        tracing::info!(name = %self.name, config = %self.config_path, "running reference test");

        let config = SimulationConfig::load(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path))?;
        let steps = self
            .steps
            .or(config.max_steps)
            .context("no step count in the test or the configuration")?;

        let outcome = run_config(&config, steps)?;
        tracing::info!(steps, particles = outcome.particles.len(), "simulation complete");

        let mut checks = Vec::new();
        if let Some(ref check) = self.expected.containment {
            checks.push(validate_containment(&outcome.particles, config.params.box_half_size, check));
        }
        if let Some(ref check) = self.expected.momentum {
            let total_mass = outcome.particle_mass * outcome.particles.len() as f32;
            checks.push(validate_momentum(&outcome.diagnostics, total_mass, check));
        }
        if let Some(ref check) = self.expected.density {
            checks.push(validate_density(outcome.calibrated_mean_density, config.params.rest_density, check));
        }
        if let Some(ref check) = self.expected.speed {
            checks.push(validate_speed(&outcome.diagnostics, check));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            diagnostics: outcome.diagnostics,
            calibrated_mean_density: outcome.calibrated_mean_density,
            steps: outcome.steps,
            sim_time: outcome.sim_time,
        })
    }
}

/// Validate that every particle is finite and inside the box
pub fn validate_containment(particles: &ParticleBuffers, box_half_size: f32, check: &ContainmentCheck) -> CheckResult {
    let limit = box_half_size + check.tolerance;
    let mut non_finite = 0;
    let mut outside = 0;
    let mut max_violation = 0.0_f32;

    for p in &particles.position {
        for &c in &p[..3] {
            if !c.is_finite() {
                non_finite += 1;
            } else if c.abs() > limit {
                outside += 1;
                max_violation = max_violation.max(c.abs() - box_half_size);
            }
        }
    }

    if non_finite == 0 && outside == 0 {
        CheckResult::pass("Containment", format!("all {} particles inside [-{limit}, {limit}]", particles.len()))
    } else {
        CheckResult::fail(
            "Containment",
            format!("{non_finite} non-finite and {outside} out-of-box coordinates (max violation: {max_violation:.6})"),
        )
    }
}

/// Validate total momentum per unit mass
pub fn validate_momentum(diagnostics: &Diagnostics, total_mass: f32, check: &MomentumCheck) -> CheckResult {
    let mean_velocity = if total_mass > 0.0 {
        diagnostics.momentum_magnitude() / total_mass
    } else {
        0.0
    };

    let message = format!(
        "mean velocity {mean_velocity:.3e} (limit: {:.3e})",
        check.max_mean_velocity
    );
    if mean_velocity.is_finite() && mean_velocity <= check.max_mean_velocity {
        CheckResult::pass("Momentum", message)
    } else {
        CheckResult::fail("Momentum", message)
    }
}

/// Validate the calibrated mean density
pub fn validate_density(mean_density: f32, rest_density: f32, check: &DensityCheck) -> CheckResult {
    let error = (mean_density - rest_density).abs() / rest_density;
    let message = format!(
        "mean {mean_density:.4} vs rest {rest_density:.4} (error: {:.2}%, limit: {:.2}%)",
        error * 100.0,
        check.max_mean_error * 100.0
    );
    if error <= check.max_mean_error {
        CheckResult::pass("Calibrated Density", message)
    } else {
        CheckResult::fail("Calibrated Density", message)
    }
}

/// Validate the maximum particle speed
pub fn validate_speed(diagnostics: &Diagnostics, check: &SpeedCheck) -> CheckResult {
    let message = format!("max speed {:.4} (limit: {:.4})", diagnostics.max_speed, check.max_speed);
    if diagnostics.max_speed.is_finite() && diagnostics.max_speed <= check.max_speed {
        CheckResult::pass("Speed", message)
    } else {
        CheckResult::fail("Speed", message)
    }
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Steps: {}", self.steps);
        println!("Simulated time: {:.6} s", self.sim_time);
        println!("\nDiagnostics:");
        println!("  Particles: {}", self.diagnostics.particle_count);
        println!("  Calibrated mean density: {:.4}", self.calibrated_mean_density);
        println!("  Max density deviation: {:.2}%", self.diagnostics.max_density_deviation * 100.0);
        println!("  Total momentum: {:.3e}", self.diagnostics.momentum_magnitude());
        println!("  Kinetic energy: {:.4e}", self.diagnostics.kinetic_energy);
        println!("  Max speed: {:.4}", self.diagnostics.max_speed);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
