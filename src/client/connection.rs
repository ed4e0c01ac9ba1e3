//! The client connection manager and its receive task.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pending::ClientState;
use super::response::{Response, StepResponse};
use crate::codec::client::{self, MessageId};
use crate::codec::client_handshake;
use crate::error::WorldModelError;
use crate::framing::{self, FrameSink, FrameSource};
use crate::model::{GrailTime, Request, Uri};

/// State shared between the connection, its handles, and the receive
/// task. Handles keep it alive after the connection itself is dropped so
/// `is_error` and buffered results stay readable.
pub(super) struct Shared {
    host: String,
    port: u16,
    /// Send mutex: every outbound frame, including the receive task's
    /// keep-alive replies, goes through this sink.
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    state: Mutex<ClientState>,
    next_ticket: AtomicU32,
    connected: AtomicBool,
    /// Cancellation token of the current receive-task generation.
    shutdown: Mutex<CancellationToken>,
}

impl Shared {
    pub(super) fn finish(&self, ticket: u32) { self.state.lock().finish(ticket); }

    pub(super) fn is_live(&self, ticket: u32) -> bool { self.state.lock().is_live(ticket) }

    pub(super) fn error(&self, ticket: u32) -> Option<WorldModelError> {
        self.state.lock().error(ticket)
    }

    fn fail_all(&self, error: &WorldModelError) {
        self.connected.store(false, Ordering::SeqCst);
        self.state.lock().fail_all(error);
    }
}

/// Connection to the world model from a client.
///
/// Clients subscribe to information about entities in the world model.
/// All methods may be called concurrently from any task. Requests issued
/// while disconnected attempt one reconnect and otherwise surface
/// [`WorldModelError::NotConnected`] through their handle.
pub struct ClientConnection {
    shared: Arc<Shared>,
    rx_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClientConnection {
    /// Connect to the world model at `(host, port)`.
    ///
    /// The connection is returned whether or not the initial handshake
    /// succeeded; check [`connected`](Self::connected) or call
    /// [`reconnect`](Self::reconnect) to retry.
    pub async fn connect(host: impl Into<String>, port: u16) -> Self {
        let connection = Self {
            shared: Arc::new(Shared {
                host: host.into(),
                port,
                writer: tokio::sync::Mutex::new(None),
                state: Mutex::new(ClientState::default()),
                next_ticket: AtomicU32::new(0),
                connected: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
            }),
            rx_task: tokio::sync::Mutex::new(None),
        };
        if !connection.reconnect().await {
            log::warn!(
                "world model at {}:{} is unreachable; call reconnect() to retry",
                connection.shared.host,
                connection.shared.port
            );
        }
        connection
    }

    /// Reconnect after losing or closing the connection.
    ///
    /// Stops the previous receive task, redials, exchanges the handshake,
    /// and restarts the receive task. Returns true on success.
    pub async fn reconnect(&self) -> bool {
        let mut task_slot = self.rx_task.lock().await;
        self.shared.shutdown.lock().cancel();
        if let Some(task) = task_slot.take() {
            let _ = task.await;
        }
        *self.shared.writer.lock().await = None;
        self.shared.connected.store(false, Ordering::SeqCst);

        let mut stream = match framing::connect(&self.shared.host, self.shared.port).await {
            Ok(stream) => stream,
            Err(error) => {
                log::error!("failed to connect to the world model: {error}");
                return false;
            }
        };
        if let Err(error) = framing::exchange_handshake(&mut stream, &client_handshake()).await {
            log::error!("client handshake with the world model failed: {error}");
            return false;
        }

        let (sink, source) = framing::split_frames(stream);
        *self.shared.writer.lock().await = Some(sink);
        let token = CancellationToken::new();
        *self.shared.shutdown.lock() = token.clone();
        self.shared.connected.store(true, Ordering::SeqCst);
        *task_slot = Some(tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            source,
            token,
        )));
        true
    }

    /// True if this instance is connected to the world model.
    #[must_use]
    pub fn connected(&self) -> bool { self.shared.connected.load(Ordering::SeqCst) }

    /// Request the most recent state of URIs matching `uri` with
    /// attributes matching any expression in `attributes`.
    pub async fn current_snapshot(
        &self,
        uri: impl Into<Uri>,
        attributes: Vec<String>,
    ) -> Response {
        self.snapshot(&Request {
            object_uri: uri.into(),
            attributes,
            start: 0,
            stop: 0,
        })
        .await
    }

    /// Request the state of the world model at `request.stop`, built
    /// from data no older than `request.start`.
    pub async fn snapshot(&self, request: &Request) -> Response {
        let ticket = self.allocate_ticket();
        let rx = self.shared.state.lock().register_single(ticket);
        self.send_request(ticket, client::encode_snapshot_request(request, ticket))
            .await;
        Response::new(Arc::clone(&self.shared), ticket, rx)
    }

    /// Request every change between `request.start` and `request.stop`.
    pub async fn range(&self, request: &Request) -> Response {
        let ticket = self.allocate_ticket();
        let rx = self.shared.state.lock().register_single(ticket);
        self.send_request(ticket, client::encode_range_request(request, ticket))
            .await;
        Response::new(Arc::clone(&self.shared), ticket, rx)
    }

    /// Subscribe to matching URIs: the current state arrives first and
    /// updates follow at most every `interval_ms` milliseconds.
    pub async fn stream(
        &self,
        uri: impl Into<Uri>,
        attributes: Vec<String>,
        interval_ms: u64,
    ) -> StepResponse {
        let request = Request {
            object_uri: uri.into(),
            attributes,
            start: 0,
            stop: GrailTime::try_from(interval_ms).unwrap_or(GrailTime::MAX),
        };
        let ticket = self.allocate_ticket();
        let rx = self.shared.state.lock().register_stream(ticket);
        self.send_request(ticket, client::encode_stream_request(&request, ticket))
            .await;
        StepResponse::new(Arc::clone(&self.shared), ticket, rx)
    }

    fn allocate_ticket(&self) -> u32 {
        // Relaxed suffices: the counter only has to hand out unique values.
        self.shared.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request frame, reconnecting once if the socket is closed.
    /// Failures are recorded on the ticket rather than returned.
    async fn send_request(&self, ticket: u32, frame: Bytes) {
        if !self.connected() && !self.reconnect().await {
            self.shared
                .state
                .lock()
                .fail(ticket, WorldModelError::NotConnected);
            return;
        }
        let mut writer = self.shared.writer.lock().await;
        match writer.as_mut() {
            None => {
                drop(writer);
                self.shared
                    .state
                    .lock()
                    .fail(ticket, WorldModelError::NotConnected);
            }
            Some(sink) => {
                if let Err(error) = sink.send(frame).await {
                    *writer = None;
                    drop(writer);
                    self.shared.connected.store(false, Ordering::SeqCst);
                    self.shared
                        .state
                        .lock()
                        .fail(ticket, WorldModelError::closed(error));
                }
            }
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.shared.shutdown.lock().cancel();
        self.shared.fail_all(&WorldModelError::RequestDestroyed);
    }
}

async fn receive_loop(shared: Arc<Shared>, mut source: FrameSource, token: CancellationToken) {
    log::debug!("world model receive task started");
    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => return,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(payload)) => {
                if let Err(error) = dispatch(&shared, payload.freeze()).await {
                    log::error!("world model connection lost: {error}");
                    shared.fail_all(&error);
                    return;
                }
            }
            Some(Err(error)) => {
                log::error!("world model connection lost: {error}");
                shared.fail_all(&WorldModelError::closed(error));
                return;
            }
            None => {
                log::error!("world model closed the connection");
                shared.fail_all(&WorldModelError::closed("connection closed by peer"));
                return;
            }
        }
    }
}

/// Handle one inbound frame. Undecodable frames are logged and skipped;
/// only a transport failure (while replying to a keep-alive) is fatal.
async fn dispatch(shared: &Shared, payload: Bytes) -> Result<(), WorldModelError> {
    let Some(&id_byte) = payload.first() else {
        log::warn!("received an empty frame from the world model");
        return Ok(());
    };
    let Some(id) = MessageId::from_byte(id_byte) else {
        log::warn!("unknown client message id {id_byte:#04x}");
        return Ok(());
    };
    let handled = match id {
        MessageId::AttributeAlias => client::decode_attribute_alias(payload)
            .map(|aliases| shared.state.lock().merge_attribute_aliases(aliases)),
        MessageId::OriginAlias => client::decode_origin_alias(payload)
            .map(|aliases| shared.state.lock().merge_origin_aliases(aliases)),
        MessageId::DataResponse => client::decode_data_response(payload)
            .map(|(data, ticket)| shared.state.lock().data_response(data, ticket)),
        MessageId::RequestComplete => client::decode_request_complete(payload)
            .map(|ticket| shared.state.lock().request_complete(ticket)),
        MessageId::KeepAlive => return reply_keep_alive(shared).await,
        MessageId::SnapshotRequest | MessageId::RangeRequest | MessageId::StreamRequest => {
            log::warn!("world model sent a request message to a client");
            Ok(())
        }
    };
    if let Err(error) = handled {
        log::warn!("skipping undecodable frame: {error}");
    }
    Ok(())
}

/// Answer the server's keep-alive so it sees traffic inside its timeout.
async fn reply_keep_alive(shared: &Shared) -> Result<(), WorldModelError> {
    let mut writer = shared.writer.lock().await;
    if let Some(sink) = writer.as_mut() {
        sink.send(client::encode_keep_alive())
            .await
            .map_err(WorldModelError::closed)?;
    }
    Ok(())
}
