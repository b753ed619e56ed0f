//! Position/velocity buffers shared with a renderer.
//!
//! Ownership alternates: the renderer may read the buffers between steps,
//! the compute side owns them while a step runs. [`ScopedBufferLease`] ties
//! the compute side's ownership to a scope so every early return hands the
//! buffers back.

use crate::device::{ComputeBackend, Stage};
use crate::error::SimResult;

/// Opaque id of a renderer-visible buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// The buffer pair a renderer draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedBufferHandles {
    /// Particle positions, one `vec4` each.
    pub position: BufferId,
    /// Particle velocities, one `vec4` each.
    pub velocity: BufferId,
}

/// Which side currently owns the shared buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Renderer may read; no stage may run.
    Graphics,
    /// Stages may run; renderer must not read.
    Compute,
}

/// Hooks the graphics side runs when ownership changes hands.
pub trait GraphicsInterop: Send {
    /// Called before the compute side takes the buffers. Must flush pending
    /// graphics work on them.
    fn acquire(&mut self, handles: &SharedBufferHandles) -> SimResult<()>;

    /// Called after the compute side has finished with the buffers.
    fn release(&mut self, handles: &SharedBufferHandles) -> SimResult<()>;
}

/// No renderer attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl GraphicsInterop for Headless {
    fn acquire(&mut self, _handles: &SharedBufferHandles) -> SimResult<()> {
        Ok(())
    }

    fn release(&mut self, _handles: &SharedBufferHandles) -> SimResult<()> {
        Ok(())
    }
}

/// Compute-side ownership of the shared buffers for the lifetime of the lease.
///
/// Acquires on construction. [`ScopedBufferLease::release`] hands the
/// buffers back and reports failure; dropping an unreleased lease releases
/// too, logging any failure.
pub struct ScopedBufferLease<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    held: bool,
}

impl<'a, B: ComputeBackend + ?Sized> ScopedBufferLease<'a, B> {
    /// Acquire the shared buffers on `backend`.
    pub fn acquire(backend: &'a mut B) -> SimResult<Self> {
        backend.acquire_shared()?;
        Ok(Self { backend, held: true })
    }

    /// Dispatch one stage while holding the buffers.
    pub fn dispatch(&mut self, stage: Stage) -> SimResult<()> {
        self.backend.dispatch(stage)
    }

    /// Block until all dispatched stages are done.
    pub fn finish(&mut self) -> SimResult<()> {
        self.backend.finish()
    }

    /// Give the buffers back.
    pub fn release(mut self) -> SimResult<()> {
        self.held = false;
        self.backend.release_shared()
    }
}

impl<B: ComputeBackend + ?Sized> Drop for ScopedBufferLease<'_, B> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.backend.release_shared() {
                tracing::error!(error = %e, "failed to release shared buffers");
            }
        }
    }
}
