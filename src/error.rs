//! The few things that can actually go wrong.  Almost everything the
//! scheduler encounters (stale results, busy workers, cancelled
//! batches) is part of normal operation and is dropped, not reported.
//! What's left is bad configuration and the operating system refusing
//! to give us a thread.

use failure::Fail;
use std::io;

use crate::job::JobKind;

/// Errors raised while configuring the scheduler or parsing a view.
#[derive(Debug, Fail)]
pub enum Error {
    /// A pool with no tile workers can never finish a batch.
    #[fail(display = "worker count must be at least 1")]
    NoWorkers,

    /// The worker thread could not be started.
    #[fail(display = "could not spawn {} worker {}: {}", kind, slot, cause)]
    Spawn {
        /// The pool the worker was meant for.
        kind: JobKind,
        /// Its index inside that pool.
        slot: usize,
        /// What the operating system said.
        #[cause]
        cause: io::Error,
    },

    /// A coordinate that isn't a plain decimal number.
    #[fail(display = "could not parse coordinate: {}", _0)]
    Coordinate(String),

    /// Views must have a positive radius.
    #[fail(display = "radius must be positive")]
    Radius,
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
