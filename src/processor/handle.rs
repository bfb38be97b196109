//! Running a processor on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::error;

use super::{Processor, RunOutcome};
use crate::error::{WardenError, WardenResult};

/// Cooperative stop flag, checked between events and between bursts.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// A handle that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the processor to stop after the current event.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`StopHandle::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A processor running on a dedicated thread.
pub struct ProcessorHandle {
    stop: StopHandle,
    rx: Receiver<WardenResult<RunOutcome>>,
    join: Option<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Start `processor.run()` on a thread named `checkwarden-processor`.
    pub fn spawn(processor: Processor) -> WardenResult<Self> {
        let stop = processor.stop_handle();
        let (tx, rx) = bounded(1);
        let join = thread::Builder::new()
            .name("checkwarden-processor".to_string())
            .spawn(move || {
                let outcome = processor.run();
                if let Err(e) = &outcome {
                    error!(error = %e, "processor exited with error");
                }
                let _ = tx.send(outcome);
            })
            .map_err(|e| WardenError::internal(format!("failed to spawn processor thread: {e}")))?;

        Ok(Self {
            stop,
            rx,
            join: Some(join),
        })
    }

    /// A clone of the processor's stop handle.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the processor to stop. Does not wait.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the processor to finish.
    pub fn join(mut self) -> WardenResult<RunOutcome> {
        let outcome = self
            .rx
            .recv()
            .map_err(|_| WardenError::internal("processor thread ended without an outcome"))?;
        self.reap();
        outcome
    }

    /// Wait for the processor to finish, giving up after `timeout`.
    pub fn join_timeout(mut self, timeout: Duration) -> WardenResult<RunOutcome> {
        let outcome = self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => WardenError::internal(format!(
                "processor still running after {}",
                humantime::format_duration(timeout)
            )),
            RecvTimeoutError::Disconnected => {
                WardenError::internal("processor thread ended without an outcome")
            }
        })?;
        self.reap();
        outcome
    }

    fn reap(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.stop.stop();
        self.reap();
    }
}
