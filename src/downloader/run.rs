//! Run loop: bounded-concurrency dispatch, retry scheduling and batch finalization.
//!
//! One loop runs per `start()`/`resume()` call and is the only writer of the
//! task registry while it runs. Retrievals execute as tasks in a `JoinSet`;
//! their progress arrives over an mpsc channel and their results are applied
//! here. A retry waits out its backoff inside the slot the task occupied, so
//! the concurrency limit also bounds tasks that are about to retry.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MutexGuard, mpsc};
use tokio::task::JoinSet;

use crate::archive::{build_archive, output_file_name};
use crate::error::{Error, FetchError, Result};
use crate::fetch::{FetchOutcome, ProgressReporter, ProgressUpdate, validate_reference};
use crate::retry::RetryDecision;
use crate::types::{BatchReport, Event, MediaReference, RunOutcome, TaskId, TaskRecord, TaskStatus};

use super::{BatchDownloader, BatchState, RunPhase, RunSignal};

/// How long a stopping run waits for in-flight retrievals to acknowledge the stop
const WIND_DOWN_GRACE: Duration = Duration::from_secs(2);

/// Result of one unit of work in the join set
enum Step {
    /// A retrieval attempt finished
    Fetched {
        task_id: TaskId,
        attempt: u32,
        result: std::result::Result<FetchOutcome, FetchError>,
    },
    /// A retry backoff elapsed (or was interrupted by a stop)
    BackoffElapsed { task_id: TaskId },
}

/// Follow-up work after applying a retrieval result
enum Applied {
    Nothing,
    Save { file_name: String, data: Bytes },
    Retry { task_id: TaskId, delay: Duration },
}

/// Work in flight: the join set plus which task each unit belongs to
struct Slots {
    units: JoinSet<Step>,
    owners: HashMap<tokio::task::Id, TaskId>,
}

impl Slots {
    fn new() -> Self {
        Self {
            units: JoinSet::new(),
            owners: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.owners.len()
    }

    fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn holds(&self, task_id: &TaskId) -> bool {
        self.owners.values().any(|owner| owner == task_id)
    }

    fn spawn<F>(&mut self, task_id: TaskId, unit: F)
    where
        F: std::future::Future<Output = Step> + Send + 'static,
    {
        let id = self.units.spawn(unit).id();
        self.owners.insert(id, task_id);
    }
}

impl BatchDownloader {
    /// Lock the state unless the run owning `signal` has been cancelled
    async fn lock_live(&self, signal: &RunSignal) -> Option<MutexGuard<'_, BatchState>> {
        let state = self.state.lock().await;
        if signal.is_cancelled() {
            None
        } else {
            Some(state)
        }
    }

    /// Drive the registry until every task is terminal, or the run is stopped
    pub(super) async fn run(&self, signal: Arc<RunSignal>, resumed: bool) -> Result<RunOutcome> {
        // A previous loop may still be winding down after pause()
        let _run_guard = self.run_lock.lock().await;

        if let Some(mut state) = self.lock_live(&signal).await {
            let mut requeued = 0;
            for task in state.registry.iter_mut() {
                if task.status == TaskStatus::Paused && task.requeue() {
                    requeued += 1;
                }
            }
            if requeued > 0 {
                state.notify_progress();
            }
            if resumed {
                self.emit_event(Event::RunResumed { requeued });
            }
            tracing::debug!(requeued, tasks = state.registry.len(), "run loop started");
            self.release(state);
        } else {
            return Ok(RunOutcome::Cancelled);
        }

        let max_concurrent = self.config.download.max_concurrent_downloads;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let mut slots = Slots::new();
        let mut saves = JoinSet::new();

        loop {
            self.fill_slots(&signal, &mut slots, max_concurrent, &progress_tx).await;

            if signal.stop.is_cancelled() {
                break;
            }
            if slots.is_empty() && saves.is_empty() {
                match self.finalize(&signal).await? {
                    Some(outcome) => return Ok(outcome),
                    // Tasks were added after the last dispatch pass
                    None => continue,
                }
            }

            tokio::select! {
                biased;

                _ = signal.stop.cancelled() => break,

                _ = self.wake.notified() => {}

                Some(update) = progress_rx.recv() => {
                    self.apply_progress(&signal, update).await;
                }

                Some(joined) = slots.units.join_next_with_id() => {
                    self.handle_joined(&signal, &mut slots, &mut saves, joined, &progress_tx)
                        .await;
                }

                Some(_) = saves.join_next() => {}
            }
        }

        self.wind_down(&signal, &mut slots, &mut saves).await;

        if signal.is_cancelled() {
            Ok(RunOutcome::Cancelled)
        } else {
            Ok(RunOutcome::Paused)
        }
    }

    /// Dispatch pending tasks in insertion order until every slot is taken
    async fn fill_slots(
        &self,
        signal: &RunSignal,
        slots: &mut Slots,
        max_concurrent: usize,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        while slots.len() < max_concurrent && !signal.stop.is_cancelled() {
            let Some(mut state) = self.lock_live(signal).await else {
                return;
            };
            let Some(task_id) = state.registry.next_pending(|id| slots.holds(id)) else {
                return;
            };

            let dispatched = self.begin_dispatch(&mut state, &task_id);
            self.release(state);

            if let Some((reference, attempt)) = dispatched {
                self.spawn_fetch(signal, slots, task_id, reference, attempt, progress_tx);
            }
        }
    }

    /// Move a pending task to `downloading`, or straight to `failed` if its
    /// reference cannot be dispatched
    fn begin_dispatch(
        &self,
        state: &mut BatchState,
        task_id: &TaskId,
    ) -> Option<(Arc<MediaReference>, u32)> {
        let task = state.registry.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return None;
        }

        if let Err(e) = validate_reference(&task.reference) {
            task.fail(&e);
            tracing::warn!(task_id = %task_id, error = %e, "rejecting invalid reference");
            self.emit_event(Event::TaskFailed {
                task_id: task_id.clone(),
                error: e.to_string(),
                kind: e.kind(),
                retry_count: task.retry_count,
                will_retry: false,
            });
            state.notify_progress();
            return None;
        }

        if !task.begin_attempt() {
            return None;
        }
        let dispatched = (task.reference.clone(), task.attempts);

        tracing::debug!(
            task_id = %task_id,
            attempt = task.attempts,
            url = %task.reference.url,
            "dispatching retrieval"
        );
        self.emit_event(Event::TaskStarted {
            task_id: task_id.clone(),
            attempt: task.attempts,
        });
        state.notify_progress();
        Some(dispatched)
    }

    fn spawn_fetch(
        &self,
        signal: &RunSignal,
        slots: &mut Slots,
        task_id: TaskId,
        reference: Arc<MediaReference>,
        attempt: u32,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        let fetcher = self.fetcher.clone();
        let cancel = signal.stop.clone();
        let reporter = ProgressReporter::new(task_id.clone(), attempt, progress_tx.clone());
        let owner = task_id.clone();

        slots.spawn(owner, async move {
            let result = fetcher.fetch(&reference, &reporter, &cancel).await;
            Step::Fetched {
                task_id,
                attempt,
                result,
            }
        });
    }

    fn spawn_backoff(
        &self,
        signal: &RunSignal,
        slots: &mut Slots,
        task_id: TaskId,
        delay: Duration,
    ) {
        let stop = signal.stop.clone();
        let owner = task_id.clone();

        slots.spawn(owner, async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => {}
            }
            Step::BackoffElapsed { task_id }
        });
    }

    async fn apply_progress(&self, signal: &RunSignal, update: ProgressUpdate) {
        let Some(mut state) = self.lock_live(signal).await else {
            return;
        };
        let Some(task) = state.registry.get_mut(&update.task_id) else {
            return;
        };
        // Late report from an abandoned attempt
        if task.attempts != update.attempt {
            return;
        }

        if task.record_progress(update.received, update.total) {
            let event = Event::TaskProgress {
                task_id: update.task_id.clone(),
                percent: task.progress,
                bytes_received: task.bytes_received,
                total_bytes: task.total_bytes,
            };
            self.emit_event(event);
            state.notify_progress();
        }
        self.release(state);
    }

    async fn handle_joined(
        &self,
        signal: &RunSignal,
        slots: &mut Slots,
        saves: &mut JoinSet<()>,
        joined: std::result::Result<(tokio::task::Id, Step), tokio::task::JoinError>,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        let step = match joined {
            Ok((id, step)) => {
                slots.owners.remove(&id);
                step
            }
            Err(e) => {
                let Some(task_id) = slots.owners.remove(&e.id()) else {
                    return;
                };
                if e.is_cancelled() {
                    return;
                }
                tracing::error!(task_id = %task_id, error = %e, "retrieval task panicked");

                // Treat as a failed attempt so the task still reaches a terminal state
                let attempt = match self.state.lock().await.registry.get(&task_id) {
                    Some(task) => task.attempts,
                    None => return,
                };
                Step::Fetched {
                    task_id,
                    attempt,
                    result: Err(FetchError::Network(format!("retrieval task failed: {}", e))),
                }
            }
        };

        match step {
            Step::Fetched {
                task_id,
                attempt,
                result,
            } => match self.apply_fetch(signal, &task_id, attempt, result).await {
                Applied::Nothing => {}
                Applied::Save { file_name, data } => self.spawn_save(saves, file_name, data),
                Applied::Retry { task_id, delay } => {
                    self.spawn_backoff(signal, slots, task_id, delay)
                }
            },
            Step::BackoffElapsed { task_id } => {
                if signal.stop.is_cancelled() {
                    return;
                }
                // The retry keeps the slot its task waited in
                let Some(mut state) = self.lock_live(signal).await else {
                    return;
                };
                let dispatched = self.begin_dispatch(&mut state, &task_id);
                self.release(state);

                if let Some((reference, attempt)) = dispatched {
                    self.spawn_fetch(signal, slots, task_id, reference, attempt, progress_tx);
                }
            }
        }
    }

    /// Apply a finished retrieval attempt to its task record
    async fn apply_fetch(
        &self,
        signal: &RunSignal,
        task_id: &TaskId,
        attempt: u32,
        result: std::result::Result<FetchOutcome, FetchError>,
    ) -> Applied {
        let Some(mut state) = self.lock_live(signal).await else {
            return Applied::Nothing;
        };
        let stopping = signal.stop.is_cancelled();
        let mut backoff = None;

        let mut applied = {
            let Some(task) = state.registry.get_mut(task_id) else {
                return Applied::Nothing;
            };
            if task.attempts != attempt || task.status != TaskStatus::Downloading {
                return Applied::Nothing;
            }

            match result {
                Ok(FetchOutcome::Completed(data)) => {
                    let size_bytes = data.len() as u64;
                    task.complete(data.clone());
                    tracing::info!(task_id = %task_id, size_bytes, "download complete");
                    self.emit_event(Event::TaskCompleted {
                        task_id: task_id.clone(),
                        size_bytes,
                    });

                    if self.config.archive.aggregate_as_archive {
                        Applied::Nothing
                    } else {
                        Applied::Save {
                            file_name: output_file_name(&task.reference),
                            data,
                        }
                    }
                }
                // An attempt cut short by pause() is abandoned, not failed
                Ok(FetchOutcome::Aborted) | Err(_) if stopping => {
                    task.pause();
                    tracing::debug!(task_id = %task_id, "download paused");
                    self.emit_event(Event::TaskPaused {
                        task_id: task_id.clone(),
                    });
                    Applied::Nothing
                }
                Ok(FetchOutcome::Aborted) => {
                    let error = FetchError::Network("transfer aborted".to_string());
                    backoff = self.record_failure(task, &error);
                    Applied::Nothing
                }
                Err(error) => {
                    backoff = self.record_failure(task, &error);
                    Applied::Nothing
                }
            }
        };
        state.notify_progress();

        // failed -> pending only after the failure itself was reported
        if let Some(delay) = backoff {
            if let Some(task) = state.registry.get_mut(task_id) {
                task.schedule_retry();
                let retry_count = task.retry_count;
                self.emit_event(Event::TaskRetrying {
                    task_id: task_id.clone(),
                    retry_count,
                    delay_ms: delay.as_millis() as u64,
                });
                state.notify_progress();

                tracing::info!(
                    task_id = %task_id,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "retrying download after backoff"
                );
                applied = Applied::Retry {
                    task_id: task_id.clone(),
                    delay,
                };
            }
        }

        self.release(state);
        applied
    }

    /// downloading -> failed; returns the backoff when the policy allows a retry
    fn record_failure(&self, task: &mut TaskRecord, error: &FetchError) -> Option<Duration> {
        let decision = self.retry_policy.decide(error, task.retry_count);
        let will_retry = matches!(decision, RetryDecision::RetryAfter(_));

        task.fail(error);
        tracing::warn!(
            task_id = %task.task_id,
            error = %error,
            retry_count = task.retry_count,
            will_retry,
            "download attempt failed"
        );
        self.emit_event(Event::TaskFailed {
            task_id: task.task_id.clone(),
            error: error.to_string(),
            kind: error.kind(),
            retry_count: task.retry_count,
            will_retry,
        });

        match decision {
            RetryDecision::RetryAfter(delay) => Some(delay),
            RetryDecision::GiveUp => None,
        }
    }

    /// Save one completed payload (individual mode) without holding up the run loop
    fn spawn_save(&self, saves: &mut JoinSet<()>, file_name: String, data: Bytes) {
        let downloader = self.clone();
        saves.spawn(async move { downloader.save_individual(file_name, data).await });
    }

    /// Hand one completed payload to the output sink
    async fn save_individual(&self, file_name: String, data: Bytes) {
        let size_bytes = data.len() as u64;
        match self.output.save(&file_name, data).await {
            Ok(saved) => self.emit_event(Event::FileSaved {
                file_name: saved,
                size_bytes,
            }),
            Err(e) => {
                tracing::warn!(file_name = %file_name, error = %e, "failed to save download");
            }
        }
    }

    /// Collect the results of stopped retrievals, then mark leftovers as paused
    async fn wind_down(&self, signal: &RunSignal, slots: &mut Slots, saves: &mut JoinSet<()>) {
        let grace = tokio::time::sleep(WIND_DOWN_GRACE);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                biased;

                _ = &mut grace => {
                    tracing::warn!(
                        in_flight = slots.len(),
                        "retrievals did not stop in time, aborting them"
                    );
                    break;
                }

                joined = slots.units.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((id, step))) => {
                        slots.owners.remove(&id);
                        if let Step::Fetched { task_id, attempt, result } = step {
                            if let Applied::Save { file_name, data } =
                                self.apply_fetch(signal, &task_id, attempt, result).await
                            {
                                self.spawn_save(saves, file_name, data);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        slots.owners.remove(&e.id());
                    }
                },
            }
        }

        slots.units.shutdown().await;
        slots.owners.clear();

        // Payloads that did arrive are still written out
        while saves.join_next().await.is_some() {}

        let Some(mut state) = self.lock_live(signal).await else {
            return;
        };
        let mut paused = Vec::new();
        for task in state.registry.iter_mut() {
            if task.status == TaskStatus::Downloading && task.pause() {
                paused.push(task.task_id.clone());
            }
        }
        if !paused.is_empty() {
            for task_id in paused {
                self.emit_event(Event::TaskPaused { task_id });
            }
            state.notify_progress();
        }
        self.release(state);
    }

    /// Report completion and build the archive once every task is terminal
    ///
    /// Returns `None` when tasks are still outstanding and the loop must go on.
    async fn finalize(&self, signal: &RunSignal) -> Result<Option<RunOutcome>> {
        let Some(mut state) = self.lock_live(signal).await else {
            return Ok(Some(RunOutcome::Cancelled));
        };
        if !state.registry.all_terminal() {
            self.release(state);
            return Ok(None);
        }
        state.phase = RunPhase::Idle;
        let snapshot = state.registry.snapshot();
        let sink = state.sink.clone();
        self.release(state);

        if signal.is_cancelled() {
            return Ok(Some(RunOutcome::Cancelled));
        }
        if let Some(sink) = sink {
            sink.on_complete(&snapshot);
        }

        let succeeded = snapshot
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let failed = snapshot.len() - succeeded;

        tracing::info!(succeeded, failed, "batch complete");
        self.emit_event(Event::BatchComplete { succeeded, failed });

        if succeeded == 0 {
            return Err(Error::TotalFailure { failed });
        }

        if !self.config.archive.aggregate_as_archive {
            return Ok(Some(RunOutcome::Completed(BatchReport {
                succeeded,
                failed,
                archive: None,
            })));
        }

        let archive_config = self.config.archive.clone();
        let archive = tokio::task::spawn_blocking(move || build_archive(&snapshot, &archive_config))
            .await
            .map_err(|e| Error::Other(format!("archive task failed: {}", e)))??;

        // cancel() may have landed while the archive was being built
        if signal.is_cancelled() {
            tracing::debug!("batch cancelled before the archive was saved");
            return Ok(Some(RunOutcome::Cancelled));
        }

        let size_bytes = archive.bytes.len() as u64;
        let saved = self
            .output
            .save(&archive.file_name, archive.bytes.clone())
            .await?;
        self.emit_event(Event::FileSaved {
            file_name: saved,
            size_bytes,
        });

        Ok(Some(RunOutcome::Completed(BatchReport {
            succeeded,
            failed,
            archive: Some(archive),
        })))
    }
}
