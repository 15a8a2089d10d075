//! The reference-orbit cache.
//!
//! Computing a reference orbit at a deep zoom is the single most
//! expensive thing a batch does, and it happens on one worker while
//! every tile waits for it.  Users mostly pan around and zoom back
//! out, and in both cases the orbit they computed a moment ago is
//! still usable.  We keep exactly one, the last one computed.
//!
//! Reuse is a heuristic.  It doesn't prove the old orbit is accurate
//! for the new view; it bets that a nearby orbit at the same depth, or
//! a deeper orbit at the same center, is close enough, and
//! perturbation's rebasing mops up the cases where it isn't.

use num::{BigInt, BigRational, Complex, Signed};
use std::sync::Arc;

use crate::params::ViewParams;

/// One step of the bilinear approximation table: while the pixel's
/// delta is smaller than `radius`, the quadratic term is negligible
/// and the step is just `delta * a + dc`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlaStep {
    /// The linear coefficient, twice the reference point at this step.
    pub a: Complex<f64>,
    /// How large the delta may grow before the approximation fails.
    pub radius: f64,
}

/// A computed reference orbit and the view it was computed for.
#[derive(Clone, Debug)]
pub struct RefOrbit {
    /// Real part of the reference point.
    pub x: BigRational,
    /// Imaginary part of the reference point.
    pub y: BigRational,
    /// The radius of the view it was computed for.
    pub r: BigRational,
    /// The iteration limit it was computed with.
    pub max_iterations: u32,
    /// The orbit itself, `Z_0 = 0` first, until escape or the limit.
    pub xn: Vec<Complex<f64>>,
    /// One entry per orbit step.
    pub bla: Vec<BlaStep>,
}

impl RefOrbit {
    /// Wraps an orbit computed for `params`.
    pub fn new(params: &ViewParams, xn: Vec<Complex<f64>>, bla: Vec<BlaStep>) -> Self {
        RefOrbit {
            x: params.x.clone(),
            y: params.y.clone(),
            r: params.r.clone(),
            max_iterations: params.max_iterations,
            xn,
            bla,
        }
    }
}

/// Can `entry` stand in for the orbit `params` would need?
///
/// * Only perturbation uses orbits at all.
/// * The iteration limits must match; the orbit's length depends on it.
/// * At the same center, an orbit computed deeper than we now need
///   is always good.
/// * At the same depth, an orbit within `reuse_distance` radii of the
///   new center, on both axes, is good enough.
pub fn is_reusable(entry: &RefOrbit, params: &ViewParams, reuse_distance: u32) -> bool {
    if !params.mode.uses_perturbation() {
        return false;
    }

    if entry.max_iterations != params.max_iterations {
        return false;
    }

    if entry.x == params.x && entry.y == params.y && entry.r < params.r {
        return true;
    }

    if entry.r == params.r {
        let bound = BigRational::from_integer(BigInt::from(reuse_distance)) * &params.r;
        let dx = (&entry.x - &params.x).abs();
        let dy = (&entry.y - &params.y).abs();
        return dx <= bound && dy <= bound;
    }

    false
}

/// Holds the most recently computed orbit.
#[derive(Debug)]
pub struct RefOrbitCache {
    latest: Option<Arc<RefOrbit>>,
    reuse_distance: u32,
}

impl RefOrbitCache {
    /// An empty cache.  `reuse_distance` bounds how far, in radii, a
    /// view may pan before its orbit has to be recomputed.
    pub fn new(reuse_distance: u32) -> Self {
        RefOrbitCache {
            latest: None,
            reuse_distance,
        }
    }

    /// Replaces whatever was there.
    pub fn set(&mut self, entry: Arc<RefOrbit>) {
        self.latest = Some(entry);
    }

    /// The retained orbit, usable or not.
    pub fn get(&self) -> Option<&Arc<RefOrbit>> {
        self.latest.as_ref()
    }

    /// The retained orbit if it can serve `params`.
    pub fn get_if_available(&self, params: &ViewParams) -> Option<Arc<RefOrbit>> {
        self.latest
            .as_ref()
            .filter(|entry| is_reusable(entry, params, self.reuse_distance))
            .cloned()
    }

    /// Forgets the retained orbit.
    pub fn clear(&mut self) {
        self.latest = None;
    }
}
