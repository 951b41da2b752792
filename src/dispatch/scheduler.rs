//! Pool bookkeeping as a pure state machine
//!
//! The scheduler owns the job queue, the per-slot worker states and the
//! outstanding-job counter. It performs no I/O: the pool's event loop feeds it
//! events and acts on what it returns. Every path that consumes a job
//! (completion, slot failure, draining after the last slot retires) decrements
//! the outstanding counter exactly once.
//!
//! Dispatch is FIFO to the first idle slot in slot order. There is no
//! priority or fairness policy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One analysis job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub content_id: String,
    pub source_text: String,
}

impl Job {
    pub fn new(content_id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            source_text: source_text.into(),
        }
    }
}

/// Lifecycle of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, waiting for the handshake acknowledgment
    Starting,
    /// Ready for a job
    Idle,
    /// Holding exactly one job
    Busy,
    /// Killed (or never spawned), replacement not started yet
    Restarting,
    /// Shut down or retired; never leaves this state
    Terminated,
}

impl WorkerState {
    fn is_live(self) -> bool {
        matches!(
            self,
            WorkerState::Starting | WorkerState::Idle | WorkerState::Busy
        )
    }
}

#[derive(Debug, Clone)]
struct Slot {
    state: WorkerState,
    generation: u64,
    /// Dispatch time while Busy, spawn time while Starting
    since: Option<Instant>,
    in_flight: Option<String>,
    spawn_failures: u32,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: WorkerState::Restarting,
            generation: 0,
            since: None,
            in_flight: None,
            spawn_failures: 0,
        }
    }
}

/// A job handed to a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub slot: usize,
    pub generation: u64,
    pub job: Job,
}

/// What a slot failure resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    /// Content id of the job that was in flight, now resolved
    pub content_id: Option<String>,
    /// The slot exhausted its spawn attempts and will not be restarted
    pub retired: bool,
}

/// Queue, slots and outstanding counter of a worker pool
#[derive(Debug)]
pub struct Scheduler {
    slots: Vec<Slot>,
    queue: VecDeque<Job>,
    outstanding: usize,
    max_spawn_failures: u32,
}

impl Scheduler {
    /// Create `size` slots, all waiting for their first spawn
    pub fn new(size: usize, max_spawn_failures: u32) -> Self {
        Self {
            slots: (0..size).map(|_| Slot::new()).collect(),
            queue: VecDeque::new(),
            outstanding: 0,
            max_spawn_failures: max_spawn_failures.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Jobs submitted and not yet resolved
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Jobs not yet assigned to a worker
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_done(&self) -> bool {
        self.outstanding == 0
    }

    pub fn state(&self, slot: usize) -> Option<WorkerState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Generation that the next (or current) process in `slot` is tagged with
    pub fn generation(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|s| s.generation)
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    /// Whether events tagged `(slot, generation)` come from the live worker
    pub fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.generation == generation && s.state.is_live())
    }

    /// Enqueue jobs behind any already queued
    pub fn submit(&mut self, jobs: impl IntoIterator<Item = Job>) -> usize {
        let before = self.queue.len();
        self.queue.extend(jobs);
        let added = self.queue.len() - before;
        self.outstanding += added;
        added
    }

    /// A worker was spawned into `slot`; returns the generation its events carry
    pub fn mark_starting(&mut self, slot: usize, now: Instant) -> Option<u64> {
        let s = self.slots.get_mut(slot)?;
        if s.state != WorkerState::Restarting {
            return None;
        }
        s.state = WorkerState::Starting;
        s.since = Some(now);
        Some(s.generation)
    }

    /// Spawning a worker into `slot` failed; returns true when the slot is retired
    pub fn spawn_failed(&mut self, slot: usize) -> bool {
        let max = self.max_spawn_failures;
        let Some(s) = self.slots.get_mut(slot) else {
            return false;
        };
        s.spawn_failures += 1;
        if s.spawn_failures >= max {
            s.state = WorkerState::Terminated;
            true
        } else {
            s.state = WorkerState::Restarting;
            false
        }
    }

    /// Handshake acknowledged; the slot becomes Idle
    pub fn mark_ready(&mut self, slot: usize, generation: u64) -> bool {
        match self.slots.get_mut(slot) {
            Some(s) if s.generation == generation && s.state == WorkerState::Starting => {
                s.state = WorkerState::Idle;
                s.since = None;
                s.spawn_failures = 0;
                true
            }
            _ => false,
        }
    }

    /// Pop the next queued job for the first idle slot
    pub fn next_assignment(&mut self, now: Instant) -> Option<Assignment> {
        if self.queue.is_empty() {
            return None;
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.state == WorkerState::Idle)?;
        let job = self.queue.pop_front()?;

        let s = &mut self.slots[slot];
        s.state = WorkerState::Busy;
        s.since = Some(now);
        s.in_flight = Some(job.content_id.clone());

        Some(Assignment {
            slot,
            generation: s.generation,
            job,
        })
    }

    /// Resolve the in-flight job of a busy slot
    ///
    /// Returns false, changing nothing, when the response is stale or does not
    /// match the job the slot holds.
    pub fn complete(&mut self, slot: usize, generation: u64, content_id: &str) -> bool {
        let Some(s) = self.slots.get_mut(slot) else {
            return false;
        };
        if s.generation != generation
            || s.state != WorkerState::Busy
            || s.in_flight.as_deref() != Some(content_id)
        {
            return false;
        }

        s.state = WorkerState::Idle;
        s.since = None;
        s.in_flight = None;
        self.outstanding -= 1;
        true
    }

    /// Slots that are busy or starting for longer than `deadline`
    pub fn expired(&self, now: Instant, deadline: Duration) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, WorkerState::Busy | WorkerState::Starting))
            .filter(|(_, s)| {
                s.since
                    .is_some_and(|since| now.saturating_duration_since(since) > deadline)
            })
            .map(|(slot, _)| slot)
            .collect()
    }

    /// The live worker in `slot` is gone (timed out, exited or misbehaved)
    ///
    /// Resolves its in-flight job, invalidates the current generation and
    /// leaves the slot Restarting, or Terminated once a worker that never
    /// became ready has failed too often. Returns `None` for a slot that is
    /// not live.
    pub fn fail_slot(&mut self, slot: usize) -> Option<SlotFailure> {
        let max = self.max_spawn_failures;
        let s = self.slots.get_mut(slot)?;
        if !s.state.is_live() {
            return None;
        }

        let was_starting = s.state == WorkerState::Starting;
        let content_id = s.in_flight.take();
        if content_id.is_some() {
            self.outstanding -= 1;
        }

        s.generation += 1;
        s.since = None;
        if was_starting {
            s.spawn_failures += 1;
        }

        let retired = s.spawn_failures >= max;
        s.state = if retired {
            WorkerState::Terminated
        } else {
            WorkerState::Restarting
        };

        Some(SlotFailure {
            content_id,
            retired,
        })
    }

    /// Resolve every queued job when no slot can ever run them
    pub fn drain_if_no_workers(&mut self) -> Vec<String> {
        if self.queue.is_empty()
            || self
                .slots
                .iter()
                .any(|s| s.state != WorkerState::Terminated)
        {
            return Vec::new();
        }

        let drained: Vec<String> = self.queue.drain(..).map(|job| job.content_id).collect();
        self.outstanding -= drained.len();
        drained
    }

    /// Terminate every slot; returns the slots that were live
    pub fn terminate_all(&mut self) -> Vec<usize> {
        let mut live = Vec::new();
        for (slot, s) in self.slots.iter_mut().enumerate() {
            if s.state.is_live() {
                live.push(slot);
            }
            s.state = WorkerState::Terminated;
            s.generation += 1;
            s.since = None;
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(ids: &[&str]) -> Vec<Job> {
        ids.iter().map(|id| Job::new(*id, format!("{}();", id))).collect()
    }

    /// Scheduler whose slots all completed the handshake
    fn ready(size: usize) -> (Scheduler, Instant) {
        let now = Instant::now();
        let mut s = Scheduler::new(size, 3);
        for slot in 0..size {
            let generation = s.mark_starting(slot, now).unwrap();
            assert!(s.mark_ready(slot, generation));
        }
        (s, now)
    }

    #[test]
    fn test_new_slots_wait_for_spawn() {
        let s = Scheduler::new(2, 3);
        assert_eq!(s.size(), 2);
        assert_eq!(s.states(), vec![WorkerState::Restarting; 2]);
        assert!(s.is_done());
    }

    #[test]
    fn test_handshake_transitions() {
        let now = Instant::now();
        let mut s = Scheduler::new(1, 3);
        let generation = s.mark_starting(0, now).unwrap();
        assert_eq!(s.state(0), Some(WorkerState::Starting));
        assert!(s.is_current(0, generation));
        assert!(!s.mark_ready(0, generation + 1));
        assert!(s.mark_ready(0, generation));
        assert_eq!(s.state(0), Some(WorkerState::Idle));
        assert!(!s.mark_ready(0, generation), "second ack is ignored");
    }

    #[test]
    fn test_no_assignment_while_starting() {
        let now = Instant::now();
        let mut s = Scheduler::new(1, 3);
        s.mark_starting(0, now);
        s.submit(jobs(&["a"]));
        assert!(s.next_assignment(now).is_none());
    }

    #[test]
    fn test_fifo_first_idle_slot() {
        let (mut s, now) = ready(2);
        assert_eq!(s.submit(jobs(&["a", "b", "c"])), 3);

        let first = s.next_assignment(now).unwrap();
        let second = s.next_assignment(now).unwrap();
        assert_eq!((first.slot, first.job.content_id.as_str()), (0, "a"));
        assert_eq!((second.slot, second.job.content_id.as_str()), (1, "b"));
        assert!(s.next_assignment(now).is_none(), "no idle slot left");
        assert_eq!(s.queued(), 1);
        assert_eq!(s.outstanding(), 3);

        assert!(s.complete(1, second.generation, "b"));
        let third = s.next_assignment(now).unwrap();
        assert_eq!((third.slot, third.job.content_id.as_str()), (1, "c"));
    }

    #[test]
    fn test_slot_never_holds_two_jobs() {
        let (mut s, now) = ready(1);
        s.submit(jobs(&["a", "b"]));
        s.next_assignment(now).unwrap();
        assert!(s.next_assignment(now).is_none());
        assert_eq!(s.state(0), Some(WorkerState::Busy));
    }

    #[test]
    fn test_complete_rejects_mismatch() {
        let (mut s, now) = ready(1);
        s.submit(jobs(&["a"]));
        let a = s.next_assignment(now).unwrap();

        assert!(!s.complete(0, a.generation, "zzz"));
        assert!(!s.complete(0, a.generation + 1, "a"));
        assert!(!s.complete(5, a.generation, "a"));
        assert_eq!(s.outstanding(), 1);

        assert!(s.complete(0, a.generation, "a"));
        assert!(!s.complete(0, a.generation, "a"), "no double resolution");
        assert!(s.is_done());
    }

    #[test]
    fn test_expired_uses_per_slot_dispatch_time() {
        let (mut s, start) = ready(2);
        s.submit(jobs(&["a", "b"]));
        s.next_assignment(start).unwrap();
        let later = start + Duration::from_secs(5);
        s.next_assignment(later).unwrap();

        let deadline = Duration::from_secs(10);
        assert!(s.expired(start + Duration::from_secs(10), deadline).is_empty());
        assert_eq!(s.expired(start + Duration::from_secs(11), deadline), vec![0]);
        assert_eq!(s.expired(start + Duration::from_secs(16), deadline), vec![0, 1]);
    }

    #[test]
    fn test_idle_slots_never_expire() {
        let (s, now) = ready(1);
        assert!(s.expired(now + Duration::from_secs(3600), Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_hung_handshake_expires() {
        let now = Instant::now();
        let mut s = Scheduler::new(1, 3);
        s.mark_starting(0, now);
        assert_eq!(s.expired(now + Duration::from_secs(2), Duration::from_secs(1)), vec![0]);
    }

    #[test]
    fn test_timeout_then_replacement_runs_next_job() {
        let (mut s, now) = ready(1);
        s.submit(jobs(&["slow", "fast"]));
        let slow = s.next_assignment(now).unwrap();

        let failure = s.fail_slot(0).unwrap();
        assert_eq!(failure.content_id.as_deref(), Some("slow"));
        assert!(!failure.retired);
        assert_eq!(s.state(0), Some(WorkerState::Restarting));
        assert_eq!(s.outstanding(), 1);
        assert!(!s.is_current(0, slow.generation));

        // A late answer from the killed worker is ignored
        assert!(!s.complete(0, slow.generation, "slow"));

        let generation = s.mark_starting(0, now).unwrap();
        assert_ne!(generation, slow.generation);
        assert!(s.mark_ready(0, generation));
        let fast = s.next_assignment(now).unwrap();
        assert_eq!(fast.job.content_id, "fast");
        assert!(s.complete(0, fast.generation, "fast"));
        assert!(s.is_done());
    }

    #[test]
    fn test_fail_slot_is_idempotent_per_generation() {
        let (mut s, now) = ready(1);
        s.submit(jobs(&["a"]));
        s.next_assignment(now).unwrap();
        assert!(s.fail_slot(0).is_some());
        assert!(s.fail_slot(0).is_none());
        assert_eq!(s.outstanding(), 0);
    }

    #[test]
    fn test_idle_crash_resolves_nothing() {
        let (mut s, _) = ready(1);
        let failure = s.fail_slot(0).unwrap();
        assert_eq!(failure.content_id, None);
        assert!(!failure.retired);
    }

    #[test]
    fn test_repeated_startup_failures_retire_slot() {
        let now = Instant::now();
        let mut s = Scheduler::new(1, 2);
        s.mark_starting(0, now);
        assert!(!s.fail_slot(0).unwrap().retired);
        s.mark_starting(0, now);
        assert!(s.fail_slot(0).unwrap().retired);
        assert_eq!(s.state(0), Some(WorkerState::Terminated));
        assert!(s.mark_starting(0, now).is_none());
    }

    #[test]
    fn test_spawn_failures_retire_slot() {
        let mut s = Scheduler::new(1, 2);
        assert!(!s.spawn_failed(0));
        assert_eq!(s.state(0), Some(WorkerState::Restarting));
        assert!(s.spawn_failed(0));
        assert_eq!(s.state(0), Some(WorkerState::Terminated));
    }

    #[test]
    fn test_ready_resets_spawn_failures() {
        let now = Instant::now();
        let mut s = Scheduler::new(1, 2);
        assert!(!s.spawn_failed(0));
        let generation = s.mark_starting(0, now).unwrap();
        s.mark_ready(0, generation);
        assert!(!s.fail_slot(0).unwrap().retired);
        assert!(!s.spawn_failed(0));
    }

    #[test]
    fn test_drain_when_every_slot_retired() {
        let mut s = Scheduler::new(2, 1);
        s.submit(jobs(&["a", "b"]));
        assert!(s.drain_if_no_workers().is_empty());

        assert!(s.spawn_failed(0));
        assert!(s.drain_if_no_workers().is_empty(), "slot 1 may still start");
        assert!(s.spawn_failed(1));

        assert_eq!(s.drain_if_no_workers(), vec!["a".to_string(), "b".to_string()]);
        assert!(s.is_done());
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn test_outcome_count_matches_submissions() {
        let (mut s, now) = ready(2);
        let ids = ["a", "b", "c", "d", "e"];
        s.submit(jobs(&ids));

        let mut resolved = Vec::new();
        let mut round = 0;
        while !s.is_done() {
            while let Some(a) = s.next_assignment(now) {
                // every third job times out
                if round % 3 == 2 {
                    let failure = s.fail_slot(a.slot).unwrap();
                    resolved.extend(failure.content_id);
                    let generation = s.mark_starting(a.slot, now).unwrap();
                    s.mark_ready(a.slot, generation);
                } else {
                    assert!(s.complete(a.slot, a.generation, &a.job.content_id));
                    resolved.push(a.job.content_id);
                }
                round += 1;
            }
        }

        resolved.sort();
        assert_eq!(resolved, ids.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_terminate_all() {
        let (mut s, now) = ready(2);
        s.submit(jobs(&["a"]));
        let a = s.next_assignment(now).unwrap();
        s.spawn_failed(1);

        let live = s.terminate_all();
        assert_eq!(live, vec![0]);
        assert_eq!(s.states(), vec![WorkerState::Terminated; 2]);
        assert!(!s.is_current(0, a.generation));
    }
}
