//! Units of schedulable work.
//!
//! A batch (one render request) becomes exactly one reference-orbit
//! job plus one tile job per tile.  The tile jobs name the orbit job
//! as a dependency, which is how the queue knows not to hand them out
//! until the orbit they iterate against exists.

use std::fmt;
use std::sync::Arc;

use crate::orbit_cache::RefOrbit;
use crate::params::ViewParams;
use crate::planes::Rect;

/// Identifies a job.  Never reused within a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Identifies a batch.  Never reused within a session, so anything
/// tagged with a batch that's gone can be recognized and dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// The two kinds of work, each with its own pool of workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Compute the reference orbit for a view.
    RefOrbit,
    /// Compute the iteration counts for one tile.
    Tile,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobKind::RefOrbit => write!(f, "reference-orbit"),
            JobKind::Tile => write!(f, "tile-iteration"),
        }
    }
}

/// Compute (or adopt) the reference orbit at a view's center.
#[derive(Clone, Debug)]
pub struct RefOrbitJob {
    /// This job.
    pub id: JobId,
    /// The batch it belongs to.
    pub batch_id: BatchId,
    /// Where the orbit starts and how long it may run.
    pub params: ViewParams,
    /// A cached orbit good enough for this view.  When present the
    /// job completes without ever reaching a worker.
    pub reuse: Option<Arc<RefOrbit>>,
}

/// Compute the iteration counts for one tile of a view.
#[derive(Clone, Debug)]
pub struct TileJob {
    /// This job.
    pub id: JobId,
    /// The batch it belongs to.
    pub batch_id: BatchId,
    /// Jobs that must be done before this one may start.
    pub required_job_ids: Vec<JobId>,
    /// The part of the canvas to compute.
    pub rect: Rect,
}

/// Anything the task queue can hold.
#[derive(Clone, Debug)]
pub enum Job {
    /// See [`RefOrbitJob`].
    RefOrbit(RefOrbitJob),
    /// See [`TileJob`].
    Tile(TileJob),
}

impl Job {
    /// This job's id.
    pub fn id(&self) -> JobId {
        match self {
            Job::RefOrbit(job) => job.id,
            Job::Tile(job) => job.id,
        }
    }

    /// The batch this job belongs to.
    pub fn batch_id(&self) -> BatchId {
        match self {
            Job::RefOrbit(job) => job.batch_id,
            Job::Tile(job) => job.batch_id,
        }
    }

    /// Which pool runs this job.
    pub fn kind(&self) -> JobKind {
        match self {
            Job::RefOrbit(_) => JobKind::RefOrbit,
            Job::Tile(_) => JobKind::Tile,
        }
    }

    /// The jobs this one waits for.  Reference orbits wait for nothing.
    pub fn required_job_ids(&self) -> &[JobId] {
        match self {
            Job::RefOrbit(_) => &[],
            Job::Tile(job) => &job.required_job_ids,
        }
    }
}
