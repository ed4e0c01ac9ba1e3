//! Handles delivering request results to the caller.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::connection::Shared;
use super::pending::SlotResult;
use crate::error::WorldModelError;
use crate::model::WorldState;

/// Result handle of a snapshot or range request.
///
/// Dropping the handle releases everything the connection still holds
/// for the request, whether or not the response arrived.
pub struct Response {
    shared: Arc<Shared>,
    ticket: u32,
    rx: Option<oneshot::Receiver<SlotResult>>,
    buffered: Option<SlotResult>,
}

impl Response {
    pub(super) fn new(
        shared: Arc<Shared>,
        ticket: u32,
        rx: oneshot::Receiver<SlotResult>,
    ) -> Self {
        Self {
            shared,
            ticket,
            rx: Some(rx),
            buffered: None,
        }
    }

    /// Wait for the result.
    ///
    /// # Errors
    ///
    /// Returns the error recorded for the request: `NotConnected` if it
    /// could not be sent, `ConnectionClosed` if the transport died, or
    /// `RequestDestroyed` if the connection was torn down first.
    pub async fn get(mut self) -> Result<WorldState, WorldModelError> {
        if let Some(result) = self.buffered.take() {
            return result;
        }
        match self.rx.take() {
            Some(rx) => rx
                .await
                .unwrap_or(Err(WorldModelError::RequestDestroyed)),
            None => Err(WorldModelError::RequestDestroyed),
        }
    }

    /// True if a call to [`get`](Self::get) will not wait.
    pub fn ready(&mut self) -> bool {
        if self.buffered.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.buffered = Some(result);
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => false,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.buffered = Some(Err(WorldModelError::RequestDestroyed));
                true
            }
        }
    }

    /// True if the request failed and [`get`](Self::get) will return an
    /// error.
    #[must_use]
    pub fn is_error(&self) -> bool { self.shared.error(self.ticket).is_some() }

    /// The error recorded for this request, if any.
    #[must_use]
    pub fn get_error(&self) -> Option<WorldModelError> { self.shared.error(self.ticket) }
}

impl Drop for Response {
    fn drop(&mut self) { self.shared.finish(self.ticket); }
}

/// Result handle of a streaming request.
///
/// Each server update is consumed with [`next`](Self::next); the stream
/// ends with an empty [`WorldState`]. Dropping the handle releases
/// everything the connection still holds for the request.
pub struct StepResponse {
    shared: Arc<Shared>,
    ticket: u32,
    rx: mpsc::UnboundedReceiver<SlotResult>,
    buffered: Option<SlotResult>,
    complete: bool,
}

impl StepResponse {
    pub(super) fn new(
        shared: Arc<Shared>,
        ticket: u32,
        rx: mpsc::UnboundedReceiver<SlotResult>,
    ) -> Self {
        Self {
            shared,
            ticket,
            rx,
            buffered: None,
            complete: false,
        }
    }

    /// Wait for the next update.
    ///
    /// An empty state marks the end of the stream; consuming it releases
    /// the request's ticket, after which
    /// [`is_complete`](Self::is_complete) reports true.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the transport died mid-stream,
    /// `NotConnected` if the request could not be sent, or
    /// `RequestDestroyed` once the stream is gone.
    pub async fn next(&mut self) -> Result<WorldState, WorldModelError> {
        let item = match self.buffered.take() {
            Some(item) => item,
            None => match self.rx.recv().await {
                Some(item) => item,
                None => return Err(WorldModelError::RequestDestroyed),
            },
        };
        if let Ok(state) = &item {
            if state.is_empty() {
                self.complete = true;
                self.shared.finish(self.ticket);
            }
        }
        item
    }

    /// True if a call to [`next`](Self::next) will not wait for the
    /// server. Errors do not count as ready; they surface through
    /// [`is_error`](Self::is_error) and [`next`](Self::next).
    pub fn has_next(&mut self) -> bool {
        if self.buffered.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(item) => {
                self.buffered = Some(item);
                true
            }
            Err(_) => false,
        }
    }

    /// True once this streaming request is finished.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.complete || !self.shared.is_live(self.ticket) }

    /// True if the request failed and [`next`](Self::next) will return
    /// an error.
    #[must_use]
    pub fn is_error(&self) -> bool { self.shared.error(self.ticket).is_some() }

    /// The error recorded for this request, if any.
    #[must_use]
    pub fn get_error(&self) -> Option<WorldModelError> { self.shared.error(self.ticket) }
}

impl Drop for StepResponse {
    fn drop(&mut self) { self.shared.finish(self.ticket); }
}
