//! Time integration.
//!
//! Two user-facing integrators, three stage variants:
//!
//! | Variant          | velocity `v`          | half-step `v_half`     | position `x`          |
//! |------------------|-----------------------|------------------------|-----------------------|
//! | `SymplecticEuler`| `v + a dt`            | untouched, invalidated | `x + v dt`            |
//! | `LeapfrogStart`  | unchanged             | `v + a dt / 2`         | `x + v_half dt`       |
//! | `LeapfrogStep`   | `v_half + a dt / 2`   | `v_half + a dt`        | `x + v_half dt`       |
//!
//! with `a = F / m`. [`IntegratorState`] picks the variant from an iteration
//! counter: leapfrog starts at iteration 0 and steps afterwards. Selecting a
//! different integrator resets the counter, so the next leapfrog step is a
//! fresh start.
//!
//! After every variant, positions outside `[-b, b]` are clamped onto the wall
//! and the outward velocity component is reflected and damped.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::KernelSet;
use crate::particle::Vec4;

/// Integrator chosen by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegratorKind {
    /// First-order symplectic Euler.
    #[default]
    SymplecticEuler,
    /// Second-order leapfrog with a half-step velocity buffer.
    Leapfrog,
}

/// Stage variant dispatched for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Velocity then position, both full steps.
    SymplecticEuler,
    /// Seeds the half-step velocity buffer.
    LeapfrogStart,
    /// Advances from a valid half-step velocity buffer.
    LeapfrogStep,
}

impl Scheme {
    /// Name used in logs and shader entry points.
    pub fn name(self) -> &'static str {
        match self {
            Scheme::SymplecticEuler => "integrate_euler",
            Scheme::LeapfrogStart => "integrate_leapfrog_start",
            Scheme::LeapfrogStep => "integrate_leapfrog_step",
        }
    }
}

/// Arguments of one integration dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationStep {
    /// Variant to run.
    pub scheme: Scheme,
    /// Time step in seconds.
    pub dt: f32,
}

/// Integrator selection and iteration counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratorState {
    kind: IntegratorKind,
    iteration: u64,
}

impl IntegratorState {
    /// Fresh state at iteration 0.
    pub fn new(kind: IntegratorKind) -> Self {
        Self { kind, iteration: 0 }
    }

    /// Currently selected integrator.
    pub fn kind(&self) -> IntegratorKind {
        self.kind
    }

    /// Steps taken since the last reset.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Select `kind`. Returns true (and resets the counter) when it changed.
    pub fn select(&mut self, kind: IntegratorKind) -> bool {
        if kind == self.kind {
            return false;
        }
        self.kind = kind;
        self.iteration = 0;
        true
    }

    /// Restart the current integrator at iteration 0.
    pub fn reset(&mut self) {
        self.iteration = 0;
    }

    /// Variant the next step must dispatch.
    pub fn next_scheme(&self) -> Scheme {
        match (self.kind, self.iteration) {
            (IntegratorKind::SymplecticEuler, _) => Scheme::SymplecticEuler,
            (IntegratorKind::Leapfrog, 0) => Scheme::LeapfrogStart,
            (IntegratorKind::Leapfrog, _) => Scheme::LeapfrogStep,
        }
    }

    /// Record a completed step.
    pub fn advance(&mut self) {
        self.iteration += 1;
    }
}

/// Integrate every particle in parallel.
///
/// `half` is the half-step velocity buffer; it is only read or written by the
/// leapfrog variants.
pub fn integrate(
    step: IntegrationStep,
    kernels: &KernelSet,
    positions: &mut [Vec4],
    velocities: &mut [Vec4],
    half: &mut [Vec4],
    forces: &[Vec4],
) {
    let inv_m = 1.0 / kernels.particle_mass;
    let wall = Wall {
        b: kernels.box_half_size,
        damping: kernels.boundary_damping,
    };
    positions
        .par_iter_mut()
        .zip(velocities.par_iter_mut())
        .zip(half.par_iter_mut())
        .zip(forces.par_iter())
        .for_each(|(((x, v), vh), f)| {
            let a = [f[0] * inv_m, f[1] * inv_m, f[2] * inv_m];
            integrate_particle(step, a, &wall, x, v, vh);
        });
}

struct Wall {
    b: f32,
    damping: f32,
}

#[inline]
fn integrate_particle(step: IntegrationStep, a: [f32; 3], wall: &Wall, x: &mut Vec4, v: &mut Vec4, vh: &mut Vec4) {
    let dt = step.dt;
    match step.scheme {
        Scheme::SymplecticEuler => {
            for k in 0..3 {
                v[k] += a[k] * dt;
                x[k] += v[k] * dt;
            }
            wall.reflect(x, v, None);
        }
        Scheme::LeapfrogStart => {
            for k in 0..3 {
                vh[k] = v[k] + 0.5 * a[k] * dt;
                x[k] += vh[k] * dt;
            }
            wall.reflect(x, v, Some(vh));
        }
        Scheme::LeapfrogStep => {
            for k in 0..3 {
                v[k] = vh[k] + 0.5 * a[k] * dt;
                vh[k] += a[k] * dt;
                x[k] += vh[k] * dt;
            }
            wall.reflect(x, v, Some(vh));
        }
    }
}

impl Wall {
    #[inline]
    fn reflect(&self, x: &mut Vec4, v: &mut Vec4, mut vh: Option<&mut Vec4>) {
        for k in 0..3 {
            let inward = if x[k] > self.b {
                x[k] = self.b;
                -1.0
            } else if x[k] < -self.b {
                x[k] = -self.b;
                1.0
            } else {
                continue;
            };
            v[k] = inward * v[k].abs() * self.damping;
            if let Some(vh) = vh.as_deref_mut() {
                vh[k] = inward * vh[k].abs() * self.damping;
            }
        }
    }
}
