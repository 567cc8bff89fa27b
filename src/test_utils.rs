//! Test utilities and handler implementations.
//!
//! Handlers here record what they receive so tests can await deliveries
//! deterministically instead of sleeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::bus::{BusError, MessageHandler, Result};
use crate::message::Message;

/// How long `Recording::next` waits for a delivery.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler that forwards every delivery to its paired `Recording`.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Message>,
    cancels: Arc<AtomicUsize>,
    handle_error: Option<String>,
    cancel_error: Option<String>,
}

/// Receiving side of a `RecordingHandler`.
pub struct Recording {
    rx: mpsc::UnboundedReceiver<Message>,
    cancels: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> (Self, Recording) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancels = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                cancels: Arc::clone(&cancels),
                handle_error: None,
                cancel_error: None,
            },
            Recording { rx, cancels },
        )
    }

    /// Fail every `handle` call (after recording the message).
    pub fn with_handle_error(mut self, message: impl Into<String>) -> Self {
        self.handle_error = Some(message.into());
        self
    }

    /// Fail `cancel` with `BusError::Handler(message)`.
    pub fn with_cancel_error(mut self, message: impl Into<String>) -> Self {
        self.cancel_error = Some(message.into());
        self
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<()>> {
        let _ = self.tx.send(message);
        let result = match &self.handle_error {
            Some(e) => Err(BusError::Handler(e.clone())),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn cancel(&self) -> BoxFuture<'static, Result<()>> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let result = match &self.cancel_error {
            Some(e) => Err(BusError::Handler(e.clone())),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }
}

impl Recording {
    /// Wait for the next delivered message.
    pub async fn next(&mut self) -> Option<Message> {
        tokio::time::timeout(DELIVERY_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert nothing is delivered within `wait`.
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(message)) = tokio::time::timeout(wait, self.rx.recv()).await {
            panic!("unexpected delivery: {:?}", message);
        }
    }

    /// Number of times the handler was cancelled.
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}
