#![deny(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mandelpool
//!
//! A tile scheduler and worker pool for rendering the Mandelbrot set
//! at deep zoom.  A view of the set is cut into rectangular tiles and
//! each tile is iterated on its own worker thread.  Deep views use
//! perturbation: one *reference orbit* is computed for the center of
//! the view and every tile is iterated relative to it, so a tile may
//! not start until its view's orbit exists.
//!
//! Everything the caller touches goes through the [`Scheduler`].  A
//! caller starts a batch (one view), registers its tiles, and then
//! polls; tiles land in the scheduler's tile cache as they finish,
//! and the batch's callback fires once when the last one arrives or
//! the batch is cancelled.
//!
//! ```no_run
//! use mandelpool::{
//!     BatchRequest, Config, EscapeTimeKernel, Rect, Resolution, Scheduler, ThreadSpawner,
//!     ViewParams, RenderMode,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let spawner = ThreadSpawner::new(Arc::new(EscapeTimeKernel::new()));
//! let mut scheduler = Scheduler::new(Config::default(), Box::new(spawner)).unwrap();
//! let canvas = Resolution::new(800, 600);
//! let params = ViewParams::parse("-0.75", "0", "1.5", 1000, RenderMode::Normal).unwrap();
//!
//! let batch = scheduler.next_batch_id();
//! scheduler.start_batch(batch);
//! scheduler.register_batch(
//!     batch,
//!     BatchRequest::new(params, canvas, Rect::grid(canvas, 128), |outcome| {
//!         println!("{:?}", outcome)
//!     }),
//! );
//! scheduler.run_until_idle(Duration::from_millis(50));
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod kernel;
pub mod orbit_cache;
pub mod params;
pub mod planes;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod tile_cache;
pub mod worker;

pub use batch::{BatchContext, BatchOutcome, BatchRequest};
pub use config::Config;
pub use error::{Error, Result};
pub use job::{BatchId, Job, JobId, JobKind};
pub use kernel::{EscapeTimeKernel, Kernel};
pub use params::{RenderMode, ViewParams};
pub use planes::{PlaneMapper, Rect, Resolution};
pub use scheduler::Scheduler;
pub use worker::{ThreadSpawner, WorkerEvent, WorkerFacade, WorkerSpawner};
