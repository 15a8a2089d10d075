//! The task queue: jobs waiting to run, jobs running, and the ids of
//! jobs that have finished.
//!
//! A waiting job is *executable* once every job it requires has been
//! marked done.  Among executable jobs of one kind the queue hands
//! them out in the order they were added.  Finished ids pile up as
//! batches go by, so `prune_done_jobs` throws away the ones no queued
//! job still cares about.

use std::collections::HashSet;

use crate::job::{BatchId, Job, JobId, JobKind};

/// Waiting and running lists plus the done set.
#[derive(Debug, Default)]
pub struct TaskQueue {
    waiting: Vec<Job>,
    running: Vec<Job>,
    done: HashSet<JobId>,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        TaskQueue::default()
    }

    /// Appends a job to the waiting list.
    pub fn add_job(&mut self, job: Job) {
        self.waiting.push(job);
    }

    /// Records that a job has been handed to a worker.
    pub fn start_job(&mut self, job: Job) {
        self.running.push(job);
    }

    fn is_executable(&self, job: &Job) -> bool {
        job.required_job_ids().iter().all(|id| self.done.contains(id))
    }

    /// Removes and returns the first waiting job of `kind` whose
    /// dependencies are all done.
    pub fn pop_waiting_executable_job(&mut self, kind: JobKind) -> Option<Job> {
        self.pop_waiting_executable_job_where(kind, |_| true)
    }

    /// As `pop_waiting_executable_job`, skipping jobs that fail `pred`.
    pub fn pop_waiting_executable_job_where<P>(&mut self, kind: JobKind, pred: P) -> Option<Job>
    where
        P: Fn(&Job) -> bool,
    {
        let idx = self
            .waiting
            .iter()
            .position(|job| job.kind() == kind && self.is_executable(job) && pred(job))?;
        Some(self.waiting.remove(idx))
    }

    /// Marks a job done and drops it from the running list.  Jobs
    /// that required it may now run.
    pub fn complete_job(&mut self, id: JobId) {
        self.mark_done(id);
        self.running.retain(|job| job.id() != id);
    }

    /// Marks a job done without touching the running list; used for
    /// jobs that complete without ever being dispatched.
    pub fn mark_done(&mut self, id: JobId) {
        self.done.insert(id);
    }

    /// Has this job been marked done (and not yet pruned)?
    pub fn is_done(&self, id: JobId) -> bool {
        self.done.contains(&id)
    }

    /// Puts a running job back at the front of the waiting list.
    /// Returns false if the job wasn't running.
    pub fn requeue_job(&mut self, id: JobId) -> bool {
        match self.running.iter().position(|job| job.id() == id) {
            Some(idx) => {
                let job = self.running.remove(idx);
                self.waiting.insert(0, job);
                true
            }
            None => false,
        }
    }

    /// True once nothing of the batch is waiting or running.
    pub fn is_batch_completed(&self, batch_id: BatchId) -> bool {
        !self.has_waiting_job_in_batch(batch_id)
            && !self.running.iter().any(|job| job.batch_id() == batch_id)
    }

    /// Is anything of this batch still waiting?
    pub fn has_waiting_job_in_batch(&self, batch_id: BatchId) -> bool {
        self.waiting.iter().any(|job| job.batch_id() == batch_id)
    }

    /// Forgets done ids that no waiting or running job lists as a
    /// requirement.  Running jobs count because they may be requeued.
    pub fn prune_done_jobs(&mut self) {
        let still_required: HashSet<JobId> = self
            .waiting
            .iter()
            .chain(self.running.iter())
            .flat_map(|job| job.required_job_ids().iter().cloned())
            .collect();
        self.done.retain(|id| still_required.contains(id));
    }

    /// Drops every waiting and running job of a batch without marking
    /// any of them done.  Returns the jobs that were running, which
    /// the caller still has to stop.
    pub fn remove_batch(&mut self, batch_id: BatchId) -> Vec<Job> {
        self.waiting.retain(|job| job.batch_id() != batch_id);
        let (removed, kept): (Vec<Job>, Vec<Job>) = self
            .running
            .drain(..)
            .partition(|job| job.batch_id() == batch_id);
        self.running = kept;
        removed
    }

    /// Empties both lists.  The done set goes too; nothing waits on it.
    pub fn clear(&mut self) {
        self.waiting.clear();
        self.running.clear();
        self.done.clear();
    }

    /// Number of waiting jobs.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Number of running jobs, optionally of only one kind.
    pub fn running_len(&self, kind: Option<JobKind>) -> usize {
        match kind {
            None => self.running.len(),
            Some(kind) => self.running.iter().filter(|job| job.kind() == kind).count(),
        }
    }

    /// Number of remembered done ids.
    pub fn done_len(&self) -> usize {
        self.done.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{RefOrbitJob, TileJob};
    use crate::params::{RenderMode, ViewParams};
    use crate::planes::Rect;

    fn orbit(id: u64, batch: u64) -> Job {
        Job::RefOrbit(RefOrbitJob {
            id: JobId(id),
            batch_id: BatchId(batch),
            params: ViewParams::parse("0", "0", "1", 100, RenderMode::Perturbation).unwrap(),
            reuse: None,
        })
    }

    fn tile(id: u64, batch: u64, requires: &[u64]) -> Job {
        Job::Tile(TileJob {
            id: JobId(id),
            batch_id: BatchId(batch),
            required_job_ids: requires.iter().map(|&i| JobId(i)).collect(),
            rect: Rect::new(id as i32, 0, 1, 1),
        })
    }

    #[test]
    fn jobs_without_requirements_are_executable_in_insertion_order() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        queue.add_job(tile(2, 1, &[]));
        queue.add_job(tile(3, 1, &[]));
        let ids: Vec<JobId> = (0..3)
            .filter_map(|_| queue.pop_waiting_executable_job(JobKind::Tile))
            .map(|job| job.id())
            .collect();
        assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
        assert!(queue.pop_waiting_executable_job(JobKind::Tile).is_none());
    }

    #[test]
    fn dependents_wait_for_their_requirements() {
        let mut queue = TaskQueue::new();
        queue.add_job(orbit(1, 1));
        queue.add_job(tile(2, 1, &[1]));
        queue.add_job(tile(3, 1, &[]));

        // The independent tile jumps ahead of the blocked one.
        let job = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        assert_eq!(job.id(), JobId(3));
        assert!(queue.pop_waiting_executable_job(JobKind::Tile).is_none());

        let job = queue.pop_waiting_executable_job(JobKind::RefOrbit).unwrap();
        queue.start_job(job);
        assert!(queue.pop_waiting_executable_job(JobKind::Tile).is_none());

        queue.complete_job(JobId(1));
        assert_eq!(queue.running_len(None), 0);
        let job = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        assert_eq!(job.id(), JobId(2));
    }

    #[test]
    fn kinds_do_not_mix() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        assert!(queue.pop_waiting_executable_job(JobKind::RefOrbit).is_none());
        assert!(queue.pop_waiting_executable_job(JobKind::Tile).is_some());
    }

    #[test]
    fn predicate_skips_without_removing() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        queue.add_job(tile(2, 2, &[]));
        let job = queue
            .pop_waiting_executable_job_where(JobKind::Tile, |job| job.batch_id() == BatchId(2))
            .unwrap();
        assert_eq!(job.id(), JobId(2));
        assert_eq!(queue.waiting_len(), 1);
    }

    #[test]
    fn batch_completion_looks_only_at_that_batch() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        queue.add_job(tile(2, 2, &[]));
        assert!(!queue.is_batch_completed(BatchId(1)));

        let first = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        queue.start_job(first);
        let second = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        queue.start_job(second);
        assert!(!queue.is_batch_completed(BatchId(1)));

        queue.complete_job(JobId(1));
        // Batch 2 still has a job running; batch 1 is done regardless.
        assert!(queue.is_batch_completed(BatchId(1)));
        assert!(!queue.is_batch_completed(BatchId(2)));

        queue.complete_job(JobId(2));
        assert!(queue.is_batch_completed(BatchId(2)));
    }

    #[test]
    fn pruning_keeps_ids_still_required() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(3, 1, &[1]));
        queue.mark_done(JobId(1));
        queue.mark_done(JobId(2));
        queue.prune_done_jobs();
        assert!(queue.is_done(JobId(1)));
        assert!(!queue.is_done(JobId(2)));

        queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        queue.prune_done_jobs();
        assert_eq!(queue.done_len(), 0);
    }

    #[test]
    fn removing_a_batch_returns_its_running_jobs() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        queue.add_job(tile(2, 2, &[]));
        queue.add_job(tile(3, 1, &[]));
        let job = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        queue.start_job(job);

        let stopped = queue.remove_batch(BatchId(1));
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id(), JobId(1));
        assert!(!queue.is_done(JobId(1)));
        assert_eq!(queue.waiting_len(), 1);
        assert!(queue.is_batch_completed(BatchId(1)));
        assert!(queue.remove_batch(BatchId(1)).is_empty());
    }

    #[test]
    fn requeue_puts_a_running_job_first_in_line() {
        let mut queue = TaskQueue::new();
        queue.add_job(tile(1, 1, &[]));
        queue.add_job(tile(2, 1, &[]));
        let job = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        queue.start_job(job);
        assert!(queue.requeue_job(JobId(1)));
        assert!(!queue.requeue_job(JobId(1)));
        let job = queue.pop_waiting_executable_job(JobKind::Tile).unwrap();
        assert_eq!(job.id(), JobId(1));
    }
}
