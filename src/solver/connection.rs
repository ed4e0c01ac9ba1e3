//! The solver connection manager, its send path, and the on-demand
//! tracker task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::on_demand::TypeRegistry;
use crate::codec::solver::{self, MessageId, SolutionData};
use crate::codec::solver_handshake;
use crate::error::WorldModelError;
use crate::framing::{self, FrameSink, FrameSource};
use crate::model::{AttributeUpdate, GrailTime, TypeSpec};

/// Delay sequence between write retries: an immediate retry, then one
/// second, then eight seconds for every further attempt.
#[derive(Default)]
struct RetrySchedule {
    attempts: u32,
}

impl RetrySchedule {
    fn next_delay(&mut self) -> Duration {
        let delay = match self.attempts {
            0 => Duration::ZERO,
            1 => Duration::from_secs(1),
            _ => Duration::from_secs(8),
        };
        self.attempts = self.attempts.saturating_add(1);
        delay
    }
}

struct SolverShared {
    host: String,
    port: u16,
    origin: String,
    /// Send mutex: every outbound frame goes through this sink.
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    registry: Mutex<TypeRegistry>,
    connected: AtomicBool,
    /// Token of the current tracker generation, only replaced under the
    /// `writer` mutex. Reconnecting cancels the old generation without
    /// joining it, so the tracker itself can trigger a reconnect from
    /// its keep-alive reply path.
    tracker: Mutex<CancellationToken>,
}

/// Connection from a solver to the world model.
///
/// Declared attribute types are announced on every reconnect. Writes are
/// at-least-once: they retry on the [`RetrySchedule`] until the world
/// model accepts them, so any write may wait indefinitely while the
/// server is unreachable. Errors are therefore logged, not returned.
pub struct SolverConnection {
    shared: Arc<SolverShared>,
}

impl SolverConnection {
    /// Connect to the world model at `(host, port)` and immediately
    /// announce the given attribute types under the solver's `origin`.
    ///
    /// The connection is returned whether or not the initial handshake
    /// succeeded; the first write will keep retrying it.
    pub async fn new(
        host: impl Into<String>,
        port: u16,
        types: &[TypeSpec],
        origin: impl Into<String>,
    ) -> Self {
        let shared = Arc::new(SolverShared {
            host: host.into(),
            port,
            origin: origin.into(),
            writer: tokio::sync::Mutex::new(None),
            registry: Mutex::new(TypeRegistry::new(types)),
            connected: AtomicBool::new(false),
            tracker: Mutex::new(CancellationToken::new()),
        });
        if !reconnect(&shared).await {
            log::warn!(
                "world model at {}:{} is unreachable; writes will retry",
                shared.host,
                shared.port
            );
        }
        Self { shared }
    }

    /// True if this instance is connected to the world model.
    #[must_use]
    pub fn connected(&self) -> bool { self.shared.connected.load(Ordering::SeqCst) }

    /// Reconnect, re-announce all types, and restart the on-demand
    /// tracker. Returns true on success.
    pub async fn reconnect(&self) -> bool { reconnect(&self.shared).await }

    /// Register additional attribute types.
    ///
    /// Aliases continue from the existing registry and only the new
    /// entries are announced. If the delivery has to reconnect first,
    /// the reconnect's full-registry announcement already carries the
    /// new entries and no separate delta is sent.
    pub async fn add_types(&self, types: &[TypeSpec]) {
        let announcement = {
            let mut registry = self.shared.registry.lock();
            let added = registry.add(types);
            solver::encode_type_announce(&added, &self.shared.origin)
        };
        announce_and_reconnect(&self.shared, announcement).await;
    }

    /// Push attribute updates to the world model.
    ///
    /// Updates of unregistered types are dropped; on-demand types are
    /// filtered against the currently requested URI patterns. The
    /// resulting message is sent even when every update was filtered
    /// out, which doubles as a keep-alive heartbeat.
    ///
    /// If `create_uris` is true, target URIs missing from the world
    /// model are created to receive their update.
    pub async fn send_data(&self, updates: &[AttributeUpdate], create_uris: bool) {
        let solutions: Vec<SolutionData> = {
            let registry = self.shared.registry.lock();
            updates
                .iter()
                .filter_map(|update| {
                    registry.gate(update).map(|type_alias| SolutionData {
                        type_alias,
                        time: update.time,
                        target: update.target.clone(),
                        data: update.data.clone(),
                    })
                })
                .collect()
        };
        send_and_reconnect(
            &self.shared,
            solver::encode_solver_data(create_uris, &solutions),
        )
        .await;
    }

    /// True if an update of `type_name` for `uri` would currently be
    /// transmitted, letting callers skip computing unrequested values.
    #[must_use]
    pub fn on_demand_requested(&self, type_name: &str, uri: &str) -> bool {
        self.shared.registry.lock().requested(type_name, uri)
    }

    /// Create a URI in the world model.
    pub async fn create_uri(&self, uri: &str, created: GrailTime) {
        let payload = solver::encode_create_uri(uri, created, &self.shared.origin);
        send_and_reconnect(&self.shared, payload).await;
    }

    /// Expire a URI, effective at `expires`.
    pub async fn expire_uri(&self, uri: &str, expires: GrailTime) {
        let payload = solver::encode_expire_uri(uri, expires, &self.shared.origin);
        send_and_reconnect(&self.shared, payload).await;
    }

    /// Delete a URI from the world model.
    pub async fn delete_uri(&self, uri: &str) {
        let payload = solver::encode_delete_uri(uri, &self.shared.origin);
        send_and_reconnect(&self.shared, payload).await;
    }

    /// Expire one attribute of a URI, effective at `expires`.
    pub async fn expire_uri_attribute(&self, uri: &str, name: &str, expires: GrailTime) {
        let payload = solver::encode_expire_attribute(uri, name, &self.shared.origin, expires);
        send_and_reconnect(&self.shared, payload).await;
    }

    /// Delete one attribute of a URI.
    pub async fn delete_uri_attribute(&self, uri: &str, name: &str) {
        let payload = solver::encode_delete_attribute(uri, name, &self.shared.origin);
        send_and_reconnect(&self.shared, payload).await;
    }
}

impl Drop for SolverConnection {
    fn drop(&mut self) { self.shared.tracker.lock().cancel(); }
}

/// Handshake, announce the full type registry, and restart the tracker.
/// Any failure leaves the connection closed and returns false.
async fn reconnect(shared: &Arc<SolverShared>) -> bool {
    let mut writer = shared.writer.lock().await;
    reconnect_locked(shared, &mut writer).await
}

/// [`reconnect`] with the send mutex already held. Serializing here
/// keeps concurrent writers from racing two dials and from overwriting
/// each other's tracker generation.
fn reconnect_locked<'a>(
    shared: &'a Arc<SolverShared>,
    writer: &'a mut Option<FrameSink>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        shared.tracker.lock().cancel();
        *writer = None;
        shared.connected.store(false, Ordering::SeqCst);

        let mut stream = match framing::connect(&shared.host, shared.port).await {
            Ok(stream) => stream,
            Err(error) => {
                log::error!("failed to connect to the world model: {error}");
                return false;
            }
        };
        if let Err(error) = framing::exchange_handshake(&mut stream, &solver_handshake()).await {
            log::error!("solver handshake with the world model failed: {error}");
            return false;
        }

        let (mut sink, source) = framing::split_frames(stream);
        let announcement = {
            let registry = shared.registry.lock();
            solver::encode_type_announce(&registry.announcement(), &shared.origin)
        };
        if let Err(error) = sink.send(announcement).await {
            log::error!("problem sending the type announcement: {error}");
            return false;
        }

        *writer = Some(sink);
        let token = CancellationToken::new();
        *shared.tracker.lock() = token.clone();
        shared.connected.store(true, Ordering::SeqCst);
        let tracker: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(track_on_demand(Arc::clone(shared), source, token));
        tokio::spawn(tracker);
        true
    })
}

/// Deliver `payload`, reconnecting and retrying until the transport
/// accepts it. Never gives up.
async fn send_and_reconnect(shared: &Arc<SolverShared>, payload: Bytes) {
    deliver(shared, payload, false).await;
}

/// Deliver a delta type announcement. A reconnect announces the full
/// registry on its own, so an attempt that had to reconnect counts as
/// delivered without resending the delta.
async fn announce_and_reconnect(shared: &Arc<SolverShared>, payload: Bytes) {
    deliver(shared, payload, true).await;
}

async fn deliver(shared: &Arc<SolverShared>, payload: Bytes, reconnect_announces: bool) {
    let mut schedule = RetrySchedule::default();
    loop {
        match try_send(shared, payload.clone(), reconnect_announces).await {
            Ok(()) => return,
            Err(error) => log::warn!("world model write failed, will retry: {error}"),
        }
        tokio::time::sleep(schedule.next_delay()).await;
    }
}

/// One send attempt. The send mutex stays held across any reconnect,
/// so interleaved writers are serialized for the attempt's whole
/// disconnected-reconnect-send sequence.
async fn try_send(
    shared: &Arc<SolverShared>,
    payload: Bytes,
    reconnect_announces: bool,
) -> Result<(), WorldModelError> {
    let mut writer = shared.writer.lock().await;
    if writer.is_none() {
        if !reconnect_locked(shared, &mut writer).await {
            return Err(WorldModelError::NotConnected);
        }
        if reconnect_announces {
            // The reconnect sent the full registry; the delta is covered.
            return Ok(());
        }
    }
    let Some(sink) = writer.as_mut() else {
        return Err(WorldModelError::NotConnected);
    };
    match sink.send(payload).await {
        Ok(()) => Ok(()),
        Err(error) => {
            *writer = None;
            shared.connected.store(false, Ordering::SeqCst);
            Err(WorldModelError::closed(error))
        }
    }
}

/// Receive loop tracking the world model's on-demand requests.
async fn track_on_demand(
    shared: Arc<SolverShared>,
    mut source: FrameSource,
    token: CancellationToken,
) {
    log::debug!("on-demand tracker started");
    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => return,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(payload)) => dispatch(&shared, payload.freeze()).await,
            Some(Err(error)) => {
                log::error!("problem with the solver connection: {error}");
                shared.connected.store(false, Ordering::SeqCst);
                return;
            }
            None => {
                log::error!("world model closed the solver connection");
                shared.connected.store(false, Ordering::SeqCst);
                return;
            }
        }
    }
}

async fn dispatch(shared: &Arc<SolverShared>, payload: Bytes) {
    let Some(&id_byte) = payload.first() else {
        log::warn!("received an empty frame from the world model");
        return;
    };
    match MessageId::from_byte(id_byte) {
        Some(MessageId::StartOnDemand) => match solver::decode_start_on_demand(payload) {
            Ok(requests) => {
                let mut registry = shared.registry.lock();
                for (alias, patterns) in requests {
                    log::debug!("enabling on-demand {alias} for {} patterns", patterns.len());
                    registry.start_on_demand(alias, patterns);
                }
            }
            Err(error) => log::warn!("skipping undecodable on-demand start: {error}"),
        },
        Some(MessageId::StopOnDemand) => match solver::decode_stop_on_demand(payload) {
            Ok(requests) => {
                let mut registry = shared.registry.lock();
                for (alias, patterns) in requests {
                    log::debug!("disabling on-demand {alias} for {} patterns", patterns.len());
                    registry.stop_on_demand(alias, &patterns);
                }
            }
            Err(error) => log::warn!("skipping undecodable on-demand stop: {error}"),
        },
        // Reply so the server sees traffic inside its timeout period.
        Some(MessageId::KeepAlive) => {
            send_and_reconnect(shared, solver::encode_keep_alive()).await;
        }
        Some(other) => log::warn!("unexpected solver message {other:?}"),
        None => log::warn!("unknown solver message id {id_byte:#04x}"),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, Duration::ZERO)]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(8))]
    #[case(5, Duration::from_secs(8))]
    fn retry_schedule_is_immediate_then_one_then_eight(
        #[case] skip: usize,
        #[case] expected: Duration,
    ) {
        let mut schedule = RetrySchedule::default();
        for _ in 0..skip {
            schedule.next_delay();
        }
        assert_eq!(schedule.next_delay(), expected);
    }
}
