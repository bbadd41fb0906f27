//! Progress reporting and cooperative cancellation
//!
//! Long-running operations post one line per stage to an optional
//! unbounded channel; the consumer polls it with `try_recv`. Cancellation
//! is checked between stages only, so an in-flight child process always
//! runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::{LedgerError, Result};

/// One-directional status channel producer
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    sender: Option<mpsc::UnboundedSender<String>>,
}

impl StatusReporter {
    /// Reporter plus the receiving end for the consumer
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// Reporter that only logs
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn post(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(status = %message, "progress");
        if let Some(sender) = &self.sender {
            // receiver gone: nobody is listening any more
            let _ = sender.send(message);
        }
    }
}

/// Shared flag that stops an operation before its next stage
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested before `stage` starts
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(LedgerError::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}
