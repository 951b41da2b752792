//! Fixed-size pool of worker processes with a deadline watchdog
//!
//! A single task drives the pool: it reacts to worker events and watchdog
//! ticks, feeds the scheduler and performs the resulting I/O. Watchdog ticks
//! come from a timer, never from the worker message channel, and every worker
//! event carries the generation of the process that produced it, so a late
//! answer from a replaced worker cannot resolve a job a second time.

use super::process::{PoolEvent, WorkerCommand, WorkerProcess};
use super::protocol::{WorkerRequest, WorkerResponse, WorkerSettings};
use super::scheduler::{Job, Scheduler, WorkerState};
use crate::config::PoolConfig;
use crate::error::DispatchError;
use crate::types::{FailureReason, MetricsOutcome};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{MissedTickBehavior, interval};

const MIN_WATCHDOG_PERIOD: Duration = Duration::from_millis(10);

/// Pool construction parameters
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of worker slots
    pub size: usize,
    /// Per-job deadline, measured from dispatch
    pub timeout: Duration,
    /// Watchdog tick period
    pub watchdog_period: Duration,
    /// Consecutive failed starts after which a slot is retired
    pub max_spawn_failures: u32,
    pub command: WorkerCommand,
    pub settings: WorkerSettings,
}

impl PoolOptions {
    pub fn new(size: usize, timeout: Duration, command: WorkerCommand) -> Self {
        Self {
            size,
            timeout,
            watchdog_period: timeout / 2,
            max_spawn_failures: 3,
            command,
            settings: WorkerSettings::default(),
        }
    }

    pub fn from_config(config: &PoolConfig, command: WorkerCommand, settings: WorkerSettings) -> Self {
        Self {
            size: config.size,
            timeout: config.timeout(),
            watchdog_period: config.watchdog_period(),
            max_spawn_failures: config.max_spawn_failures,
            command,
            settings,
        }
    }

    pub fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Outcome counters; `succeeded + failed == submitted` once a submission returns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub submitted: usize,
    pub succeeded: usize,
    /// Every failure, including timeouts and crashes
    pub failed: usize,
    pub timed_out: usize,
    pub crashed: usize,
    /// Replacement workers spawned after a failure
    pub restarts: usize,
}

/// Worker pool resolving every submitted job with exactly one outcome
pub struct WorkerPool {
    options: PoolOptions,
    scheduler: Scheduler,
    workers: Vec<Option<WorkerProcess>>,
    events_tx: UnboundedSender<PoolEvent>,
    events_rx: UnboundedReceiver<PoolEvent>,
    stats: PoolStats,
}

impl WorkerPool {
    /// Spawn every worker and send it the configuration handshake
    ///
    /// Fails only when no slot could start a worker at all.
    pub async fn start(options: PoolOptions) -> Result<Self, DispatchError> {
        if options.size == 0 {
            return Err(DispatchError::InvalidPoolSize);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut pool = Self {
            scheduler: Scheduler::new(options.size, options.max_spawn_failures),
            workers: (0..options.size).map(|_| None).collect(),
            options,
            events_tx,
            events_rx,
            stats: PoolStats::default(),
        };

        for slot in 0..pool.options.size {
            pool.spawn_slot(slot).await;
        }

        if pool.workers.iter().all(Option::is_none) {
            return Err(DispatchError::NoWorkers);
        }

        tracing::info!(
            "Started worker pool with {} workers (timeout {:?})",
            pool.workers.iter().filter(|w| w.is_some()).count(),
            pool.options.timeout
        );
        Ok(pool)
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.scheduler.states()
    }

    /// Run `jobs` to completion
    ///
    /// Returns one outcome per job, in completion order.
    pub async fn submit(&mut self, jobs: Vec<Job>) -> Result<Vec<MetricsOutcome>, DispatchError> {
        let total = self.scheduler.submit(jobs);
        self.stats.submitted += total;
        let mut outcomes = Vec::with_capacity(total);
        if total == 0 {
            return Ok(outcomes);
        }
        tracing::info!("Dispatching {} jobs to {} workers", total, self.scheduler.size());

        for content_id in self.scheduler.drain_if_no_workers() {
            self.record(MetricsOutcome::failure(content_id, FailureReason::NoWorkers), total, &mut outcomes);
        }
        self.dispatch_ready(total, &mut outcomes).await;

        let mut watchdog = interval(self.options.watchdog_period.max(MIN_WATCHDOG_PERIOD));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.scheduler.is_done() {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event, total, &mut outcomes).await;
                }
                _ = watchdog.tick() => {
                    self.check_deadlines(total, &mut outcomes).await;
                }
            }
            self.dispatch_ready(total, &mut outcomes).await;
        }

        tracing::info!(
            "Resolved {} jobs: {} succeeded, {} failed ({} timed out, {} crashed)",
            outcomes.len(),
            outcomes.iter().filter(|o| o.is_success()).count(),
            outcomes.iter().filter(|o| !o.is_success()).count(),
            outcomes.iter().filter(|o| o.is_timeout()).count(),
            outcomes
                .iter()
                .filter(|o| matches!(o.result, Err(FailureReason::WorkerExited)))
                .count()
        );
        Ok(outcomes)
    }

    /// Terminate every worker regardless of state
    pub async fn shutdown(mut self) -> PoolStats {
        self.scheduler.terminate_all();
        for worker in self.workers.iter_mut().filter_map(Option::take) {
            worker.kill().await;
        }
        tracing::debug!("Worker pool shut down");
        self.stats
    }

    async fn handle_event(&mut self, event: PoolEvent, total: usize, outcomes: &mut Vec<MetricsOutcome>) {
        let (slot, generation) = event.origin();
        if !self.scheduler.is_current(slot, generation) {
            tracing::debug!(slot, generation, "Discarding event from a replaced worker");
            return;
        }

        match event {
            PoolEvent::Message {
                response: WorkerResponse::Configured,
                ..
            } => {
                if self.scheduler.mark_ready(slot, generation) {
                    tracing::debug!(slot, generation, "Worker ready");
                } else {
                    tracing::debug!(slot, generation, "Ignoring repeated handshake acknowledgment");
                }
            }
            PoolEvent::Message { response, .. } => {
                let content_id = match &response {
                    WorkerResponse::Result { content_id, .. } => content_id.clone(),
                    WorkerResponse::Configured => return,
                };
                if self.scheduler.complete(slot, generation, &content_id) {
                    if let Some(outcome) = response.into_outcome() {
                        self.record(outcome, total, outcomes);
                    }
                } else {
                    tracing::warn!(slot, "Worker answered for '{}' which it does not hold", content_id);
                    let reason = FailureReason::Protocol(format!("unexpected result for {}", content_id));
                    self.recover_slot(slot, reason, total, outcomes).await;
                }
            }
            PoolEvent::Malformed { detail, .. } => {
                tracing::warn!(slot, "Malformed worker output: {}", detail);
                self.recover_slot(slot, FailureReason::Protocol(detail), total, outcomes)
                    .await;
            }
            PoolEvent::Exited { .. } => {
                tracing::warn!(slot, generation, "Worker exited unexpectedly");
                self.recover_slot(slot, FailureReason::WorkerExited, total, outcomes)
                    .await;
            }
        }
    }

    async fn check_deadlines(&mut self, total: usize, outcomes: &mut Vec<MetricsOutcome>) {
        let expired = self.scheduler.expired(Instant::now(), self.options.timeout);
        for slot in expired {
            tracing::warn!(
                slot,
                "Worker exceeded the {:?} deadline, replacing it",
                self.options.timeout
            );
            self.recover_slot(slot, FailureReason::Timeout, total, outcomes).await;
        }
    }

    /// Hand queued jobs to idle workers
    async fn dispatch_ready(&mut self, total: usize, outcomes: &mut Vec<MetricsOutcome>) {
        while let Some(assignment) = self.scheduler.next_assignment(Instant::now()) {
            let slot = assignment.slot;
            let request = WorkerRequest::Analyze {
                content_id: assignment.job.content_id,
                source_text: assignment.job.source_text,
            };

            let sent = match self.workers[slot].as_mut() {
                Some(worker) => worker.send(&request, self.options.timeout).await,
                None => Err(DispatchError::Protocol(format!("slot {} has no process", slot))),
            };
            match sent {
                Ok(()) => tracing::debug!(slot, generation = assignment.generation, "Dispatched job"),
                Err(e) => {
                    tracing::warn!(slot, "Failed to send job to worker: {}", e);
                    self.recover_slot(slot, FailureReason::WorkerExited, total, outcomes)
                        .await;
                }
            }
        }
    }

    /// Resolve the slot's in-flight job with `reason`, kill the process and start a replacement
    async fn recover_slot(
        &mut self,
        slot: usize,
        reason: FailureReason,
        total: usize,
        outcomes: &mut Vec<MetricsOutcome>,
    ) {
        let Some(failure) = self.scheduler.fail_slot(slot) else {
            return;
        };
        if let Some(worker) = self.workers[slot].take() {
            worker.kill().await;
        }
        if let Some(content_id) = failure.content_id {
            self.record(MetricsOutcome::failure(content_id, reason), total, outcomes);
        }

        if failure.retired {
            tracing::warn!(slot, "Worker slot retired after repeated start failures");
        } else {
            self.stats.restarts += 1;
            self.spawn_slot(slot).await;
        }

        for content_id in self.scheduler.drain_if_no_workers() {
            self.record(MetricsOutcome::failure(content_id, FailureReason::NoWorkers), total, outcomes);
        }
    }

    /// Start a worker in a Restarting slot, retrying until it starts or the slot retires
    async fn spawn_slot(&mut self, slot: usize) {
        loop {
            if self.scheduler.state(slot) != Some(WorkerState::Restarting) {
                return;
            }
            let Some(generation) = self.scheduler.generation(slot) else {
                return;
            };

            match WorkerProcess::spawn(&self.options.command, slot, generation, self.events_tx.clone()) {
                Ok(mut worker) => {
                    self.scheduler.mark_starting(slot, Instant::now());
                    let handshake = WorkerRequest::Configure {
                        params: self.options.settings.clone(),
                    };
                    match worker.send(&handshake, self.options.timeout).await {
                        Ok(()) => {
                            self.workers[slot] = Some(worker);
                            return;
                        }
                        Err(e) => {
                            let e = DispatchError::HandshakeFailed {
                                slot,
                                reason: e.to_string(),
                            };
                            tracing::warn!("{}", e);
                            worker.kill().await;
                            self.scheduler.fail_slot(slot);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(slot, "{}", e);
                    if self.scheduler.spawn_failed(slot) {
                        tracing::warn!(slot, "Giving up on worker slot");
                        return;
                    }
                }
            }
        }
    }

    fn record(&mut self, outcome: MetricsOutcome, total: usize, outcomes: &mut Vec<MetricsOutcome>) {
        match &outcome.result {
            Ok(_) => self.stats.succeeded += 1,
            Err(reason) => {
                self.stats.failed += 1;
                match reason {
                    FailureReason::Timeout => self.stats.timed_out += 1,
                    FailureReason::WorkerExited => self.stats.crashed += 1,
                    _ => {}
                }
                tracing::debug!("Job {} failed: {}", outcome.content_id, reason);
            }
        }
        outcomes.push(outcome);
        tracing::debug!("Resolved {} of {}", outcomes.len(), total);
    }
}

/// Start a pool, run `jobs` and shut it down
pub async fn execute(
    options: PoolOptions,
    jobs: Vec<Job>,
) -> Result<(Vec<MetricsOutcome>, PoolStats), DispatchError> {
    let mut pool = WorkerPool::start(options).await?;
    let outcomes = pool.submit(jobs).await;
    let stats = pool.shutdown().await;
    Ok((outcomes?, stats))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Worker written in shell: acks the handshake, then answers every job with
    /// fixed metrics unless its source contains "hang" (sleeps) or "die" (exits).
    const SCRIPTED_WORKER: &str = r#"
read handshake
echo '{"kind":"configured"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -e 's/.*"contentId":"\([^"]*\)".*/\1/')
  case "$line" in
    *hang*) sleep 30 ;;
    *die*) exit 3 ;;
    *) echo "{\"kind\":\"result\",\"contentId\":\"$id\",\"ok\":true,\"metrics\":{\"loc\":1,\"cyclomatic\":1,\"functionCount\":0,\"functions\":[],\"dependencyCount\":0}}" ;;
  esac
done
"#;

    fn scripted(size: usize, timeout_ms: u64) -> PoolOptions {
        let command = WorkerCommand::new("sh").arg("-c").arg(SCRIPTED_WORKER);
        PoolOptions::new(size, Duration::from_millis(timeout_ms), command)
            .with_watchdog_period(Duration::from_millis(timeout_ms / 4))
    }

    fn ids(outcomes: &[MetricsOutcome]) -> HashSet<String> {
        outcomes.iter().map(|o| o.content_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let result = WorkerPool::start(scripted(0, 1000)).await;
        assert!(matches!(result, Err(DispatchError::InvalidPoolSize)));
    }

    #[tokio::test]
    async fn test_unspawnable_program() {
        let options = PoolOptions::new(2, Duration::from_secs(1), WorkerCommand::new("/nonexistent/worker"));
        assert!(matches!(
            WorkerPool::start(options).await,
            Err(DispatchError::NoWorkers)
        ));
    }

    #[tokio::test]
    async fn test_all_jobs_succeed() {
        let jobs: Vec<Job> = (0..10).map(|i| Job::new(format!("c{}", i), "x();")).collect();
        let (outcomes, stats) = execute(scripted(3, 5000), jobs).await.unwrap();

        assert_eq!(outcomes.len(), 10);
        assert_eq!(ids(&outcomes).len(), 10);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.succeeded, 10);
        assert_eq!(stats.restarts, 0);
    }

    #[tokio::test]
    async fn test_empty_submission() {
        let (outcomes, stats) = execute(scripted(1, 1000), Vec::new()).await.unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(stats, PoolStats::default());
    }

    #[tokio::test]
    async fn test_timeout_replaces_worker_and_continues() {
        let jobs = vec![Job::new("slow", "hang();"), Job::new("fast", "x();")];
        let (outcomes, stats) = execute(scripted(1, 400), jobs).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        let slow = outcomes.iter().find(|o| o.content_id == "slow").unwrap();
        let fast = outcomes.iter().find(|o| o.content_id == "fast").unwrap();
        assert!(slow.is_timeout());
        assert!(fast.is_success());
        assert_eq!(outcomes[0].content_id, "slow");
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.restarts, 1);
    }

    #[tokio::test]
    async fn test_crash_is_resolved_as_failure() {
        let jobs = vec![Job::new("a", "die();"), Job::new("b", "x();"), Job::new("c", "x();")];
        let (outcomes, stats) = execute(scripted(1, 5000), jobs).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        let a = outcomes.iter().find(|o| o.content_id == "a").unwrap();
        assert_eq!(a.result, Err(FailureReason::WorkerExited));
        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.succeeded, 2);
    }

    #[tokio::test]
    async fn test_pool_reusable_across_submissions() {
        let mut pool = WorkerPool::start(scripted(2, 5000)).await.unwrap();
        let first = pool.submit(vec![Job::new("a", "x();")]).await.unwrap();
        let second = pool
            .submit(vec![Job::new("b", "x();"), Job::new("c", "x();")])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(pool.stats().submitted, 3);
        // A worker whose acknowledgment is still queued may read as Starting
        assert!(pool
            .worker_states()
            .iter()
            .all(|s| matches!(s, WorkerState::Idle | WorkerState::Starting)));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_workers_that_never_start_drain_queue() {
        // Reads the handshake and exits without acknowledging it
        let command = WorkerCommand::new("sh").arg("-c").arg("read line; exit 0");
        let mut options = PoolOptions::new(1, Duration::from_secs(2), command);
        options.max_spawn_failures = 2;

        let jobs = vec![Job::new("a", "x();"), Job::new("b", "x();")];
        let (outcomes, stats) = execute(options, jobs).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.result == Err(FailureReason::NoWorkers)));
        assert_eq!(stats.failed, 2);
    }
}
