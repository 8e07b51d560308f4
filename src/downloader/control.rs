//! Run lifecycle control: start, pause, resume, cancel.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::sink::ProgressSink;
use crate::types::{Event, RunOutcome};

use super::{BatchDownloader, RunPhase, RunSignal};

impl BatchDownloader {
    /// Retrieve every task in the registry
    ///
    /// Dispatches `pending` tasks in insertion order, never more than
    /// `max_concurrent_downloads` at once, retrying transient failures with
    /// linear backoff. `sink` receives a snapshot after every task transition.
    ///
    /// # Returns
    ///
    /// - `RunOutcome::Completed` once every task is terminal and at least one
    ///   succeeded. In archive mode the report carries the archive, which has
    ///   also been written to the output sink.
    /// - `RunOutcome::Paused` when [`pause`](Self::pause) stopped the run.
    /// - `RunOutcome::Cancelled` when [`cancel`](Self::cancel) stopped the run.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyBatch`] if no tasks were added
    /// - [`Error::AlreadyRunning`] if a run is in progress
    /// - [`Error::TotalFailure`] if every task failed
    /// - [`Error::Archive`] or an output error if the archive could not be built or saved
    pub async fn start(&self, sink: Arc<dyn ProgressSink>) -> Result<RunOutcome> {
        let signal = {
            let mut state = self.state.lock().await;
            if state.phase == RunPhase::Running {
                return Err(Error::AlreadyRunning);
            }
            if state.registry.is_empty() {
                return Err(Error::EmptyBatch);
            }

            let signal = Arc::new(RunSignal::default());
            state.phase = RunPhase::Running;
            state.signal = signal.clone();
            state.sink = Some(sink);
            signal
        };

        tracing::info!("batch run starting");
        self.run(signal, false).await
    }

    /// Pause the current run
    ///
    /// Stops dispatching and abandons in-flight transfers; their tasks move to
    /// `paused`. The pending `start()` (or `resume()`) call then returns
    /// [`RunOutcome::Paused`]. Does nothing unless a run is in progress.
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        if state.phase != RunPhase::Running {
            return;
        }

        state.phase = RunPhase::Paused;
        state.signal.stop.cancel();
        drop(state);

        tracing::info!("batch run paused");
        self.emit_event(Event::RunPaused);
    }

    /// Resume a paused run
    ///
    /// Moves every `paused` task back to `pending` and runs again with the
    /// sink given to `start()`. Paused transfers restart from the first byte.
    ///
    /// Returns `Ok(None)` when there is no paused run to resume.
    pub async fn resume(&self) -> Result<Option<RunOutcome>> {
        let signal = {
            let mut state = self.state.lock().await;
            if state.phase != RunPhase::Paused {
                return Ok(None);
            }

            let signal = Arc::new(RunSignal::default());
            state.phase = RunPhase::Running;
            state.signal = signal.clone();
            signal
        };

        tracing::info!("batch run resuming");
        self.run(signal, true).await.map(Some)
    }

    /// Cancel the current run and clear the registry
    ///
    /// In-flight transfers are abandoned and no further progress or completion
    /// callbacks are made. The pending `start()` (or `resume()`) call returns
    /// [`RunOutcome::Cancelled`]. Calling it again is a no-op.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        if state.phase == RunPhase::Idle && state.registry.is_empty() {
            return;
        }

        state.signal.cancelled.store(true, Ordering::SeqCst);
        state.signal.stop.cancel();
        state.phase = RunPhase::Idle;
        let discarded = state.registry.len();
        state.registry.clear();
        state.outbox.clear();
        drop(state);

        tracing::info!(discarded, "batch run cancelled");
        self.emit_event(Event::RunCancelled);
    }
}
