//! Solver connections to aggregator servers.
//!
//! An [`AggregatorConnection`] maintains persistent subscriptions to any
//! number of aggregators and delivers their raw sensor samples to one
//! user callback. Each configured server gets its own worker task; all
//! workers share the subscription list and fan every rule out to their
//! peer. Workers reconnect on their own after failures, resending the
//! full subscription list on each fresh session.
//!
//! Calls to the callback are serialized by a mutex, so it does not need
//! to be reentrant.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::codec::aggregator::{self, MessageId};
use crate::codec::aggregator_handshake;
use crate::error::WorldModelError;
use crate::framing::{self, FrameSource};
use crate::model::{NetTarget, SampleData, Subscription};

/// Pause between connection attempts to an unreachable aggregator.
const RETRY_DELAY: Duration = Duration::from_secs(1);

type SampleCallback = Arc<Mutex<dyn FnMut(SampleData) + Send>>;

/// Why worker tasks are being interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum InterruptKind {
    /// No interrupt pending.
    None = 0,
    /// Workers should close their connections and exit.
    CloseConnection = 1,
    /// New subscriptions were appended and need to be requested.
    AddSubscriptions = 2,
}

/// Shared interrupt state: the reason byte plus a wakeup for workers
/// blocked on their sockets.
struct Interrupt {
    state: AtomicU8,
    notify: Notify,
}

impl Interrupt {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(InterruptKind::None as u8),
            notify: Notify::new(),
        }
    }

    fn set(&self, kind: InterruptKind) {
        self.state.store(kind as u8, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn kind(&self) -> InterruptKind {
        match self.state.load(Ordering::SeqCst) {
            1 => InterruptKind::CloseConnection,
            2 => InterruptKind::AddSubscriptions,
            _ => InterruptKind::None,
        }
    }

    /// Consume the add-subscriptions edge; a pending close is preserved.
    fn clear_add(&self) {
        let _ = self.state.compare_exchange(
            InterruptKind::AddSubscriptions as u8,
            InterruptKind::None as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// A wakeup future observing every `set` from its creation onwards.
    /// Create it before reading [`kind`](Self::kind) so no edge between
    /// the check and the wait is lost.
    fn wait(&self) -> tokio::sync::futures::Notified<'_> { self.notify.notified() }
}

/// Maintains connections to multiple aggregators and fans subscription
/// rules out to all of them.
///
/// No connections are opened until the first call to
/// [`add_rules`](Self::add_rules) provides something to subscribe to.
pub struct AggregatorConnection {
    targets: Vec<NetTarget>,
    callback: SampleCallback,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    interrupt: Arc<Interrupt>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AggregatorConnection {
    /// Prepare connections to `targets`, delivering arriving samples to
    /// `callback`.
    #[must_use]
    pub fn new(
        targets: Vec<NetTarget>,
        callback: impl FnMut(SampleData) + Send + 'static,
    ) -> Self {
        Self {
            targets,
            callback: Arc::new(Mutex::new(callback)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            interrupt: Arc::new(Interrupt::new()),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Add a subscription on every aggregator.
    ///
    /// Spawns the worker tasks if none are running yet; otherwise the
    /// running workers are interrupted to request the new rule.
    pub async fn add_rules(&self, subscription: Subscription) {
        self.subscriptions.lock().push(subscription);
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            self.interrupt.set(InterruptKind::None);
            self.spawn_workers(&mut workers);
        } else {
            self.interrupt.set(InterruptKind::AddSubscriptions);
        }
    }

    /// Replace all subscriptions with `subscription`.
    ///
    /// The wire protocol has no unsubscribe primitive, so every
    /// connection is severed and re-handshaken with the new rule only.
    pub async fn update_rules(&self, subscription: Subscription) {
        *self.subscriptions.lock() = vec![subscription];
        self.disconnect().await;
        self.interrupt.set(InterruptKind::None);
        let mut workers = self.workers.lock().await;
        self.spawn_workers(&mut workers);
    }

    /// Disconnect from all aggregators. Idempotent.
    pub async fn disconnect(&self) {
        self.interrupt.set(InterruptKind::CloseConnection);
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            let _ = worker.await;
        }
    }

    fn spawn_workers(&self, workers: &mut Vec<JoinHandle<()>>) {
        for target in &self.targets {
            workers.push(tokio::spawn(worker(
                target.clone(),
                Arc::clone(&self.subscriptions),
                Arc::clone(&self.callback),
                Arc::clone(&self.interrupt),
            )));
        }
    }
}

impl Drop for AggregatorConnection {
    fn drop(&mut self) {
        // Best effort: workers observe the flag and exit on their own.
        self.interrupt.set(InterruptKind::CloseConnection);
    }
}

async fn worker(
    target: NetTarget,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    callback: SampleCallback,
    interrupt: Arc<Interrupt>,
) {
    log::debug!("aggregator worker for {}:{} started", target.host, target.port);
    while interrupt.kind() != InterruptKind::CloseConnection {
        match connect_and_run(&target, &subscriptions, &callback, &interrupt).await {
            Ok(()) => break,
            Err(error) => log::error!(
                "problem with the aggregator connection to {}:{}: {error}",
                target.host,
                target.port
            ),
        }
        let wakeup = interrupt.wait();
        if interrupt.kind() == InterruptKind::CloseConnection {
            break;
        }
        tokio::select! {
            () = wakeup => {}
            () = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }
    log::debug!("aggregator worker for {}:{} exiting", target.host, target.port);
}

async fn connect_and_run(
    target: &NetTarget,
    subscriptions: &Mutex<Vec<Subscription>>,
    callback: &SampleCallback,
    interrupt: &Interrupt,
) -> Result<(), WorldModelError> {
    let mut stream = framing::connect(&target.host, target.port).await?;
    framing::exchange_handshake(&mut stream, &aggregator_handshake()).await?;
    log::debug!("connected to aggregator {}:{}", target.host, target.port);

    let (mut sink, mut source) = framing::split_frames(stream);
    // How much of the shared list this session has already requested.
    let mut sent = 0_usize;
    loop {
        // Created first so no interrupt raised during the steps below is
        // lost before the wait.
        let wakeup = interrupt.wait();

        // The list can shrink under us while update_rules swaps it out;
        // that session is about to be severed, so send nothing extra.
        let tail: Vec<Bytes> = {
            let subscriptions = subscriptions.lock();
            subscriptions
                .get(sent..)
                .unwrap_or_default()
                .iter()
                .map(aggregator::encode_subscribe_request)
                .collect()
        };
        for frame in &tail {
            sink.send(frame.clone()).await.map_err(WorldModelError::closed)?;
        }
        sent += tail.len();
        interrupt.clear_add();

        if interrupt.kind() == InterruptKind::CloseConnection {
            return Ok(());
        }
        receive_one(&mut source, callback, wakeup).await?;
    }
}

/// Wait for one frame or an interrupt wakeup; transport failures are
/// errors.
async fn receive_one(
    source: &mut FrameSource,
    callback: &SampleCallback,
    wakeup: tokio::sync::futures::Notified<'_>,
) -> Result<(), WorldModelError> {
    tokio::select! {
        biased;
        () = wakeup => Ok(()),
        frame = source.next() => match frame {
            Some(Ok(payload)) => {
                handle_message(payload.freeze(), callback);
                Ok(())
            }
            Some(Err(error)) => Err(WorldModelError::closed(error)),
            None => Err(WorldModelError::closed("aggregator closed the connection")),
        },
    }
}

fn handle_message(payload: Bytes, callback: &SampleCallback) {
    let Some(&id_byte) = payload.first() else {
        log::warn!("received an empty frame from an aggregator");
        return;
    };
    match MessageId::from_byte(id_byte) {
        Some(MessageId::SubscriptionResponse) => {
            match aggregator::decode_subscription_response(payload) {
                // Reserved for reconciling server-side subscription edits.
                Ok(subscription) => log::debug!(
                    "aggregator accepted a subscription on physical layer {}",
                    subscription.physical_layer
                ),
                Err(error) => log::warn!("skipping undecodable subscription response: {error}"),
            }
        }
        Some(MessageId::ServerSample) => match aggregator::decode_server_sample(payload) {
            Ok(sample) if sample.valid => (&mut *callback.lock())(sample),
            Ok(_) => log::debug!("discarding invalid sample"),
            Err(error) => log::warn!("skipping undecodable sample: {error}"),
        },
        Some(MessageId::SubscribeRequest) => {
            log::warn!("aggregator sent a subscribe request to a solver");
        }
        None => log::warn!("unknown aggregator message id {id_byte:#04x}"),
    }
}
