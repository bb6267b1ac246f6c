//! Run deadline and cooperative cancellation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why in-flight work was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("run cancelled")]
    Cancelled,
}

/// Shared deadline + cancel flag for one orchestration run
///
/// Clones observe the same state. Every sleep and probe in a run goes
/// through [`RunSignal::guard`], so a deadline or cancel interrupts it.
#[derive(Debug, Clone)]
pub struct RunSignal {
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

impl RunSignal {
    /// Create a signal whose deadline (if any) starts counting now
    ///
    /// A deadline too far out to represent as an instant is treated as none.
    pub fn new(deadline: Option<Duration>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            deadline: deadline.and_then(|d| Instant::now().checked_add(d)),
            cancel: Arc::new(tx),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the run has already been interrupted
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.deadline_passed() {
            Err(Interrupted::DeadlineExceeded)
        } else if self.is_cancelled() {
            Err(Interrupted::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the flag is set
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender is owned by `self`, so this cannot close first
                std::future::pending::<()>().await;
            }
        }
    }

    /// Resolves with the reason once the deadline passes or the run is cancelled
    pub async fn interrupted(&self) -> Interrupted {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = deadline => Interrupted::DeadlineExceeded,
            _ = self.cancelled() => Interrupted::Cancelled,
        }
    }

    /// Run `fut` unless the run is interrupted first
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            output = fut => Ok(output),
        }
    }

    /// Interruptible sleep
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::unbounded()
    }
}
