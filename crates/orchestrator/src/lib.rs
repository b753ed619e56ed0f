//! Orchestration Layer
//!
//! This crate wires the SPH core into a runnable simulation:
//! - JSON configuration loading and validation
//! - Lattice placement of the initial particle block
//! - Backend selection (host thread pool or GPU)
//! - A background-thread runner with lifecycle management and tuning

#![warn(missing_docs)]

pub mod config;
pub mod runner;
pub mod scene;

pub use config::{BackendType, ConfigError, SimulationConfig};
pub use runner::{FrameSnapshot, RunnerState, SimulationRunner};

use sph_kernel::{ComputeBackend, ComputeContext, HostBackend, ParticleBuffers, SimError, Simulation};
use thiserror::Error;

/// Errors from setting up or running a simulation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The simulation core rejected the setup or failed a step.
    #[error(transparent)]
    Sim(#[from] SimError),
    /// The requested backend is not compiled in or not available.
    #[error("backend unavailable: {0}")]
    Backend(String),
    /// The runner thread could not be spawned.
    #[error("failed to spawn runner thread: {0}")]
    Spawn(String),
    /// The runner thread panicked.
    #[error("runner thread panicked")]
    ThreadPanicked,
}

/// Create a complete simulation from a configuration file
///
/// This function performs the full simulation setup pipeline:
/// 1. Load and validate the configuration
/// 2. Place the initial particle lattice
/// 3. Create the compute backend named by the configuration
/// 4. Calibrate the particle mass when requested
/// 5. Wrap in a SimulationRunner for lifecycle management
///
/// # Example
/// ```no_run
/// use sph_orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/cube-512.json")?;
/// runner.start();
/// // ... query state, pause, resume, tune, etc.
/// # Ok::<(), sph_orchestrator::OrchestratorError>(())
/// ```
pub fn create_simulation(config_path: &str) -> Result<SimulationRunner, OrchestratorError> {
    tracing::info!(path = config_path, "creating simulation");
    let config = SimulationConfig::load(config_path)?;
    tracing::info!(name = %config.name, backend = ?config.backend, "configuration loaded");

    let particles = scene::build_particles(&config.scene);
    match config.backend {
        BackendType::Host => spawn(host_simulation(&config, particles)?, &config),
        #[cfg(feature = "gpu")]
        BackendType::Gpu => spawn(gpu_simulation(&config, &particles)?, &config),
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            if sph_kernel::gpu_available() {
                match gpu_simulation(&config, &particles) {
                    Ok(sim) => return spawn(sim, &config),
                    Err(e) => tracing::warn!(error = %e, "GPU init failed, falling back to host"),
                }
            } else {
                tracing::info!("no GPU available, using host backend");
            }
            spawn(host_simulation(&config, particles)?, &config)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(OrchestratorError::Backend(
            "GPU backend requested but the `gpu` feature is not enabled".into(),
        )),
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using host backend");
            spawn(host_simulation(&config, particles)?, &config)
        }
    }
}

/// Build a host-backed simulation for `config`, calibrated when requested.
pub fn host_simulation(
    config: &SimulationConfig,
    particles: ParticleBuffers,
) -> Result<Simulation<HostBackend>, OrchestratorError> {
    let ctx = ComputeContext::new(config.compute.threads)?;
    let backend = HostBackend::new(ctx, particles, &config.params)?;
    prepare(Simulation::new(backend, config.params.clone())?, config)
}

/// Build a GPU-backed simulation for `config`, calibrated when requested.
#[cfg(feature = "gpu")]
pub fn gpu_simulation(
    config: &SimulationConfig,
    particles: &ParticleBuffers,
) -> Result<Simulation<sph_kernel::GpuBackend>, OrchestratorError> {
    let backend = sph_kernel::GpuBackend::new(particles, &config.params)?;
    prepare(Simulation::new(backend, config.params.clone())?, config)
}

fn prepare<B: ComputeBackend>(
    mut sim: Simulation<B>,
    config: &SimulationConfig,
) -> Result<Simulation<B>, OrchestratorError> {
    if config.calibrate {
        sim.calibrate()?;
    }
    Ok(sim)
}

fn spawn<B>(sim: Simulation<B>, config: &SimulationConfig) -> Result<SimulationRunner, OrchestratorError>
where
    B: ComputeBackend + Send + 'static,
{
    tracing::info!(particles = sim.particle_count(), backend = sim.backend().label(), "simulation ready to start");
    SimulationRunner::new(sim, config.max_steps)
}
