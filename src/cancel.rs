//! Cooperative cancellation of fetches and tails.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Triggers every [`Cancellation`] created from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

/// Passed into retrieval calls, resolves once the handle is triggered.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

pub fn channel() -> (CancelHandle, Cancellation) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: std::sync::Arc::new(sender),
        },
        Cancellation { receiver },
    )
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace doesn't fail without receivers
        self.sender.send_replace(true);
    }
}

impl Cancellation {
    /// A cancellation that never fires.
    pub fn never() -> Cancellation {
        let (sender, receiver) = watch::channel(false);
        // the value can't change once the sender is gone
        drop(sender);
        Cancellation { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancelled, never if the handle was dropped untriggered.
    pub async fn cancelled(&mut self) {
        let fired = self.receiver.wait_for(|cancelled| *cancelled).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` to completion unless cancelled first.
    pub async fn run<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Error::Cancelled),
        }
    }
}
