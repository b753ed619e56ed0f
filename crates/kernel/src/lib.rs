//! SPH Fluid Simulation Core
//!
//! Smoothed Particle Hydrodynamics on a compute device: a spatial hash grid
//! for neighbor search, density and force estimation, symplectic Euler and
//! leapfrog integration inside a reflecting box, and a one-time mass
//! calibration. Position and velocity buffers are shared with a renderer
//! through explicit acquire/release.
//!
//! # Modules
//! - [`particle`] -- Parallel `vec4` particle arrays and lattice sizing.
//! - [`sph`] -- Poly6, spiky gradient and viscosity Laplacian kernels.
//! - [`eos`] -- Linear and power-law equations of state.
//! - [`neighbor`] -- Hashed cell table rebuilt every step.
//! - [`density`] / [`forces`] -- Per-particle estimator passes.
//! - [`integrate`] -- Integrator state machine and box reflection.
//! - [`calibration`] -- Least-squares mass rescale.
//! - [`device`] -- Compute context, stages and the [`ComputeBackend`] trait.
//! - [`host`] -- Rayon-backed [`HostBackend`].
//! - [`interop`] -- Shared buffer handles and [`ScopedBufferLease`].
//! - [`driver`] -- The [`Simulation`] step sequence and tuning surface.
//! - `gpu` -- wgpu compute backend (feature `gpu`).
//!
//! # Example
//! ```no_run
//! use sph_kernel::{ComputeContext, HostBackend, ParticleBuffers, Simulation, SimulationParams};
//!
//! # fn main() -> Result<(), sph_kernel::SimError> {
//! let params = SimulationParams::default();
//! let particles = ParticleBuffers::from_positions(&[[0.0; 3], [0.5, 0.0, 0.0]], [0.0; 3]);
//! let backend = HostBackend::new(ComputeContext::new(None)?, particles, &params)?;
//! let mut sim = Simulation::new(backend, params)?;
//! sim.calibrate()?;
//! sim.update()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod calibration;
pub mod density;
pub mod device;
pub mod diagnostics;
pub mod driver;
pub mod eos;
pub mod error;
pub mod forces;
pub mod host;
pub mod integrate;
pub mod interop;
pub mod neighbor;
pub mod params;
pub mod particle;
pub mod sph;

#[cfg(any(test, feature = "reference-search"))]
pub mod reference;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use calibration::CalibrationReport;
pub use device::{ComputeBackend, ComputeContext, Stage, StepProfile};
pub use diagnostics::Diagnostics;
pub use driver::Simulation;
pub use eos::EquationOfState;
pub use error::{SimError, SimResult};
pub use host::HostBackend;
pub use integrate::{IntegratorKind, Scheme};
pub use interop::{BufferId, GraphicsInterop, Headless, ScopedBufferLease, SharedBufferHandles};
pub use neighbor::{HashGrid, NeighborStrategy};
pub use params::{KernelSet, SimulationParams};
pub use particle::ParticleBuffers;

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, GpuBackend, GpuContext};
