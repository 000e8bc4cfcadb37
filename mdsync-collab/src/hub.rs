//! The hub: single owner of the shared document and cursor table.
//!
//! ```text
//! reader A ──┐                                ┌──► outbound A ──► writer A
//! reader B ──┼──► events (mpsc) ──► Hub::run ─┼──► outbound B ──► writer B
//! boundary ──┘   Register/Unregister/Inbound  └──► outbound C ──► writer C
//! ```
//!
//! Every mutation happens on the arbiter task, one event at a time, so no
//! lock guards the document or the cursor table. All events share one queue:
//! a connection's registration is always handled before its frames, and its
//! frames before its unregistration.
//!
//! Fan-out never blocks. Each outbound queue is bounded; a full (or closed)
//! queue marks its connection unreachable and it is torn down exactly as if
//! it had unregistered.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::identity::ParticipantIdentity;
use crate::protocol::{CursorInfo, Envelope, MessageKind};
use crate::render::{RenderCache, Renderer};

/// Encoded envelope shared by every outbound queue it is fanned to.
pub type Frame = Arc<str>;

/// Identifies one transport session. Distinct from the participant id,
/// which is display data and may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything the hub needs to add a connection to the active set.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub identity: ParticipantIdentity,
    pub outbound: mpsc::Sender<Frame>,
}

/// Events processed by the arbiter.
#[derive(Debug)]
pub enum HubEvent {
    Register(Registration),
    Unregister(ConnectionId),
    /// Raw frame received from a connection
    Inbound { from: ConnectionId, frame: String },
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub frames_received: u64,
    /// Malformed frames and frames from unregistered connections
    pub frames_discarded: u64,
    pub updates_applied: u64,
    /// Connections dropped because their outbound queue was full or closed
    pub evictions: u64,
}

/// Point-in-time copy of hub state.
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    pub document: String,
    /// Sorted by participant id
    pub cursors: Vec<CursorInfo>,
    pub stats: HubStats,
}

/// The arbiter task has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClosed;

impl std::fmt::Display for HubClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hub is no longer running")
    }
}

impl std::error::Error for HubClosed {}

struct Participant {
    identity: ParticipantIdentity,
    outbound: mpsc::Sender<Frame>,
    /// Participant ids this connection has reported cursors under
    reported: BTreeSet<String>,
}

/// Authoritative document + cursor table + active connection registry.
pub struct Hub<R> {
    document: String,
    cursors: BTreeMap<String, CursorInfo>,
    clients: HashMap<ConnectionId, Participant>,
    renderer: RenderCache<R>,
    stats: HubStats,
}

impl<R: Renderer> Hub<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            document: String::new(),
            cursors: BTreeMap::new(),
            clients: HashMap::new(),
            renderer: RenderCache::new(renderer),
            stats: HubStats::default(),
        }
    }

    /// Start the arbiter on the current tokio runtime.
    ///
    /// `capacity` bounds the event queue; readers wait when it is full.
    pub fn spawn(self, capacity: usize) -> HubHandle {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(self.run(events_rx));
        HubHandle { events: events_tx }
    }

    /// Process events until every [`HubHandle`] is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        log::info!("Hub started");
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        log::info!(
            "Hub stopped ({} connections served)",
            self.stats.total_connections
        );
    }

    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(registration) => self.register(registration),
            HubEvent::Unregister(id) => self.unregister(id),
            HubEvent::Inbound { from, frame } => self.handle_frame(from, frame),
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Add a connection and queue its catch-up: one `init`, then one
    /// `cursor` per other participant with a known cursor.
    ///
    /// If the catch-up does not fit in the connection's queue, the
    /// connection is dropped instead of registered.
    pub fn register(&mut self, registration: Registration) {
        let Registration { id, identity, outbound } = registration;

        let rendered = self.renderer.render(&self.document);
        let init = Envelope::init(self.document.clone(), rendered, identity.id.clone());

        let catch_up = std::iter::once(init).chain(
            self.cursors
                .values()
                .filter(|cursor| cursor.participant_id != identity.id)
                .map(CursorInfo::to_envelope),
        );

        for envelope in catch_up {
            let Some(frame) = encode(&envelope) else {
                return;
            };
            if outbound.try_send(frame).is_err() {
                log::warn!("Dropping {} ({id}): catch-up did not fit its queue", identity.id);
                self.stats.evictions += 1;
                return;
            }
        }

        log::info!("{} joined ({id}), {} active", identity.id, self.clients.len() + 1);
        self.clients.insert(
            id,
            Participant {
                identity,
                outbound,
                reported: BTreeSet::new(),
            },
        );
        self.stats.total_connections += 1;
        self.stats.active_connections = self.clients.len();
    }

    /// Remove a connection, close its queue, forget its cursors and tell
    /// everyone else. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ConnectionId) {
        if !self.clients.contains_key(&id) {
            log::debug!("Unregister for inactive connection {id} ignored");
            return;
        }
        let saturated = self.teardown(id);
        self.evict(saturated);
    }

    /// Apply one inbound frame and fan the result out.
    ///
    /// Undecodable frames are dropped without any observable effect.
    pub fn handle_frame(&mut self, from: ConnectionId, frame: String) {
        self.stats.frames_received += 1;

        if !self.clients.contains_key(&from) {
            log::debug!("Discarding frame from inactive connection {from}");
            self.stats.frames_discarded += 1;
            return;
        }

        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("Discarding frame from {from}: {e}");
                self.stats.frames_discarded += 1;
                return;
            }
        };

        let outbound = match envelope.kind {
            MessageKind::Update => {
                self.document.clone_from(&envelope.content);
                self.stats.updates_applied += 1;
                let rendered = self.renderer.render(&self.document);
                match encode(&envelope.with_rendered(rendered)) {
                    Some(frame) => frame,
                    None => return,
                }
            }
            MessageKind::Cursor => {
                let Some(sender) = self.clients.get_mut(&from) else {
                    return;
                };
                let reported_id = envelope
                    .participant_id
                    .clone()
                    .filter(|participant_id| !participant_id.is_empty());
                let participant_id = reported_id
                    .clone()
                    .unwrap_or_else(|| sender.identity.id.clone());
                sender.reported.insert(participant_id.clone());

                let color = if reported_id.is_none() && envelope.content.is_empty() {
                    sender.identity.color.clone()
                } else {
                    envelope.content.clone()
                };
                self.cursors.insert(
                    participant_id.clone(),
                    CursorInfo::new(
                        participant_id.clone(),
                        envelope.position.unwrap_or(0),
                        color.clone(),
                    ),
                );

                if reported_id.is_some() {
                    Frame::from(frame)
                } else {
                    // Anonymous cursor: attribute it to the sender
                    let attributed = Envelope {
                        participant_id: Some(participant_id),
                        content: color,
                        ..envelope
                    };
                    match encode(&attributed) {
                        Some(frame) => frame,
                        None => return,
                    }
                }
            }
            _ => Frame::from(frame),
        };

        self.fan_out(outbound);
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            document: self.document.clone(),
            cursors: self.cursors.values().cloned().collect(),
            stats: self.stats.clone(),
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn active_connections(&self) -> usize {
        self.clients.len()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Deliver to every active connection, then evict the unreachable ones.
    fn fan_out(&mut self, frame: Frame) {
        let saturated = self.offer_all(&frame);
        self.evict(saturated);
    }

    /// Non-blocking enqueue onto every active connection. Returns the
    /// connections whose queue was full or closed.
    fn offer_all(&self, frame: &Frame) -> Vec<ConnectionId> {
        self.clients
            .iter()
            .filter(|(_, participant)| participant.outbound.try_send(frame.clone()).is_err())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tear down saturated connections. Their disconnect notices may
    /// saturate further connections; those join the worklist.
    fn evict(&mut self, mut worklist: Vec<ConnectionId>) {
        while let Some(id) = worklist.pop() {
            if !self.clients.contains_key(&id) {
                continue;
            }
            log::warn!("Evicting {id}: outbound queue saturated");
            self.stats.evictions += 1;
            worklist.extend(self.teardown(id));
        }
    }

    /// Remove `id`, drop its queue sender, purge its cursors and broadcast
    /// one `cursor_disconnect` for its assigned identity and for each other
    /// participant id it reported.
    fn teardown(&mut self, id: ConnectionId) -> Vec<ConnectionId> {
        let Some(participant) = self.clients.remove(&id) else {
            return Vec::new();
        };
        self.stats.active_connections = self.clients.len();

        let Participant { identity, outbound, reported } = participant;
        drop(outbound);

        for participant_id in &reported {
            self.cursors.remove(participant_id);
        }
        let mut departed = reported;
        departed.insert(identity.id.clone());

        log::info!("{} left ({id}), {} active", identity.id, self.clients.len());

        let mut saturated = Vec::new();
        for participant_id in departed {
            if let Some(frame) = encode(&Envelope::cursor_disconnect(participant_id)) {
                saturated.extend(self.offer_all(&frame));
            }
        }
        saturated
    }
}

fn encode(envelope: &Envelope) -> Option<Frame> {
    match envelope.encode() {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            log::error!("Failed to encode {:?} envelope: {e}", envelope.kind);
            None
        }
    }
}

/// Cloneable sender side of the hub's event queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Wrap an existing event queue (when driving [`Hub::run`] manually).
    pub fn from_sender(events: mpsc::Sender<HubEvent>) -> Self {
        Self { events }
    }

    pub async fn register(&self, registration: Registration) -> Result<(), HubClosed> {
        self.send(HubEvent::Register(registration)).await
    }

    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Hand a raw inbound frame to the hub. Waits while the hub is busy.
    pub async fn forward(&self, from: ConnectionId, frame: String) -> Result<(), HubClosed> {
        self.send(HubEvent::Inbound { from, frame }).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubEvent::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubClosed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.events.send(event).await.map_err(|_| HubClosed)
    }
}
