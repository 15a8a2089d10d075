//! Batches: one viewport's worth of tiles, scheduled, completed or
//! cancelled as a unit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job::JobId;
use crate::orbit_cache::RefOrbit;
use crate::params::ViewParams;
use crate::planes::{Rect, Resolution};

/// How a batch ended.  Every registered batch reports exactly one.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BatchOutcome {
    /// Every tile arrived; the time from registration to the last one.
    Completed(Duration),
    /// The caller cancelled it.
    Cancelled,
    /// The worker pool was rebuilt underneath it.
    Reconfigured,
}

impl BatchOutcome {
    /// Time taken, or zero for batches that didn't finish.
    pub fn elapsed(&self) -> Duration {
        match self {
            BatchOutcome::Completed(elapsed) => *elapsed,
            _ => Duration::from_secs(0),
        }
    }
}

/// Called once when the batch ends, however it ends.
pub type CompletionCallback = Box<dyn FnOnce(BatchOutcome) + Send>;

/// What a caller hands the scheduler to render one viewport.
pub struct BatchRequest {
    /// The view every tile belongs to.
    pub params: ViewParams,
    /// The size of the whole canvas the tiles are cut from.
    pub canvas: Resolution,
    /// The tiles to compute.
    pub tiles: Vec<Rect>,
    /// Told how the batch ended.
    pub on_complete: CompletionCallback,
}

impl BatchRequest {
    /// Constructor.
    pub fn new<F>(params: ViewParams, canvas: Resolution, tiles: Vec<Rect>, on_complete: F) -> Self
    where
        F: FnOnce(BatchOutcome) + Send + 'static,
    {
        BatchRequest {
            params,
            canvas,
            tiles,
            on_complete: Box::new(on_complete),
        }
    }
}

/// Everything the scheduler tracks for one batch while it runs.
pub struct BatchContext {
    params: ViewParams,
    canvas: Resolution,
    progress: HashMap<JobId, f64>,
    orbit: Option<Arc<RefOrbit>>,
    orbit_done: bool,
    orbit_progress: Option<f64>,
    orbit_elapsed: Option<Duration>,
    started_at: Instant,
    finished_at: Option<Instant>,
    on_complete: Option<CompletionCallback>,
}

impl BatchContext {
    /// Starts the clock on a new batch.
    pub fn new(params: ViewParams, canvas: Resolution, on_complete: CompletionCallback) -> Self {
        BatchContext {
            params,
            canvas,
            progress: HashMap::new(),
            orbit: None,
            orbit_done: false,
            orbit_progress: None,
            orbit_elapsed: None,
            started_at: Instant::now(),
            finished_at: None,
            on_complete: Some(on_complete),
        }
    }

    /// The view being rendered.
    pub fn params(&self) -> &ViewParams {
        &self.params
    }

    /// The canvas the tiles are cut from.
    pub fn canvas(&self) -> Resolution {
        self.canvas
    }

    /// The reference orbit, once it exists.
    pub fn orbit(&self) -> Option<&Arc<RefOrbit>> {
        self.orbit.as_ref()
    }

    /// When the batch was registered.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Records a job's progress, a fraction in `[0, 1]`.
    pub fn set_progress(&mut self, job: JobId, progress: f64) {
        self.progress.insert(job, progress.max(0.0).min(1.0));
    }

    /// The mean of every job's progress.
    pub fn mean_progress(&self) -> f64 {
        if self.progress.is_empty() {
            return 0.0;
        }
        self.progress.values().sum::<f64>() / self.progress.len() as f64
    }

    pub(crate) fn set_orbit_progress(&mut self, progress: f64) {
        self.orbit_progress = Some(progress);
    }

    /// Records that the reference orbit is settled: computed, reused,
    /// or not needed at all (`None`).
    pub(crate) fn settle_orbit(&mut self, orbit: Option<Arc<RefOrbit>>, elapsed: Option<Duration>) {
        self.orbit = orbit;
        self.orbit_done = true;
        self.orbit_elapsed = elapsed;
    }

    /// How long the reference orbit took, if a worker computed it.
    /// Reused orbits and batches without one have no time.
    pub fn orbit_elapsed(&self) -> Option<Duration> {
        self.orbit_elapsed
    }

    /// Is the reference orbit still outstanding?
    pub fn orbit_pending(&self) -> bool {
        !self.orbit_done
    }

    /// Has the batch run to completion?
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// How long the batch took, if it has finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at.map(|at| at - self.started_at)
    }

    /// Stamps the finish time and reports completion.
    pub(crate) fn finish(&mut self) -> Duration {
        let now = Instant::now();
        self.finished_at = Some(now);
        let elapsed = now - self.started_at;
        self.report(BatchOutcome::Completed(elapsed));
        elapsed
    }

    /// Reports an ending other than completion.  Does nothing if the
    /// batch already reported.
    pub(crate) fn report(&mut self, outcome: BatchOutcome) {
        if let Some(callback) = self.on_complete.take() {
            callback(outcome);
        }
    }

    /// The progress line a status bar would show.
    pub fn describe(&self) -> String {
        let percent = |fraction: f64| (fraction * 100.0).floor() as u32;
        if let Some(elapsed) = self.elapsed() {
            return format!("Done! ({}ms)", elapsed.as_millis());
        }
        if self.orbit_pending() {
            return match self.orbit_progress {
                Some(p) => format!("Calculating reference orbit... {}%", percent(p)),
                None => "Calculating reference orbit...".to_string(),
            };
        }
        format!("Generating... {}%", percent(self.mean_progress()))
    }
}

impl fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BatchContext")
            .field("params", &self.params)
            .field("jobs", &self.progress.len())
            .field("orbit_done", &self.orbit_done)
            .field("orbit_elapsed", &self.orbit_elapsed)
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at)
            .finish()
    }
}
