//! Scheduler configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::params::RenderMode;

/// How the scheduler sizes its pools and how eagerly it reuses work.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Number of tile workers.  At least one.
    pub worker_count: usize,
    /// Number of reference-orbit workers, used in perturbation mode only.
    pub ref_orbit_workers: usize,
    /// Which kernel the pool is built for.
    pub mode: RenderMode,
    /// How long to wait before looking again at a pool that wasn't
    /// ready.
    pub retry_interval: Duration,
    /// Adopt a cached reference orbit when one fits the view.
    pub reuse_ref_orbit: bool,
    /// How far, in radii, a view may pan and keep its orbit.
    pub reuse_distance: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_count: num_cpus::get(),
            ref_orbit_workers: 1,
            mode: RenderMode::Normal,
            retry_interval: Duration::from_millis(100),
            reuse_ref_orbit: true,
            reuse_distance: 4,
        }
    }
}

impl Config {
    /// Rejects a configuration that could never finish a batch.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::NoWorkers);
        }
        Ok(())
    }
}
