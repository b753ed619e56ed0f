//! Error taxonomy for the simulation core.

use thiserror::Error;

/// Errors raised while building, binding, or stepping a simulation.
///
/// Any error returned from a step is fatal for that step. The driver refuses
/// further updates afterwards and reports [`SimError::Poisoned`].
#[derive(Debug, Error)]
pub enum SimError {
    /// Compute device, thread pool, or buffers could not be set up.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A stage program or its constants could not be built.
    #[error("kernel build failed for stage `{stage}`: {diagnostic}")]
    KernelBuild {
        /// Stage whose program was rejected.
        stage: &'static str,
        /// Compiler or validation output.
        diagnostic: String,
    },

    /// A stage failed while executing.
    #[error("dispatch of stage `{stage}` failed: {message}")]
    Dispatch {
        /// Stage that failed.
        stage: &'static str,
        /// Failure description.
        message: String,
    },

    /// Integration produced a NaN or infinite value.
    #[error("non-finite state after stage `{stage}` at particle {particle}")]
    NonFinite {
        /// Stage after which the check failed.
        stage: &'static str,
        /// First offending particle.
        particle: usize,
    },

    /// A stage was dispatched while the graphics side still owned the buffers.
    #[error("stage `{stage}` dispatched without acquiring shared buffers")]
    BuffersNotAcquired {
        /// Stage that was rejected.
        stage: &'static str,
    },

    /// A leapfrog step was requested without a valid half-step velocity.
    #[error("leapfrog step requested but the half-step velocity buffer is stale")]
    StaleHalfStep,

    /// The graphics acquire or release hook failed.
    #[error("graphics interop failed: {0}")]
    Interop(String),

    /// A previous step failed; the simulation cannot continue.
    #[error("simulation is poisoned by an earlier failure")]
    Poisoned,
}

impl SimError {
    /// Shorthand for a [`SimError::KernelBuild`].
    pub fn build(stage: &'static str, diagnostic: impl Into<String>) -> Self {
        SimError::KernelBuild {
            stage,
            diagnostic: diagnostic.into(),
        }
    }

    /// Shorthand for a [`SimError::Dispatch`].
    pub fn dispatch(stage: &'static str, message: impl Into<String>) -> Self {
        SimError::Dispatch {
            stage,
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
