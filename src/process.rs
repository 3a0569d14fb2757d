//! Module that contains the per-process protocol core.
//!
//! [`ProcessCore`] owns the clock and both protocol engines. It is not thread-safe on purpose:
//! the [`Actor`](crate::actor::Actor) feeds it one action at a time.

use crate::{
    clock::LamportClock,
    error::{LockError, ProcessError},
    log,
    message::Message,
    mutex::{GrantNotifier, LockState, MutexEngine},
    peer::{Peer, PeerTransport},
    sink::SnapshotSink,
    snapshot::SnapshotEngine,
    ProcessId, SnapshotId, Timestamp,
};
use color_print::cformat;
use std::sync::Arc;

/// What an engine needs to talk to the outside world while handling one action.
pub struct Context<'a> {
    pub id: ProcessId,
    pub peers: &'a [Peer],
    clock: &'a mut LamportClock,
    transport: &'a dyn PeerTransport,
}

impl<'a> Context<'a> {
    pub fn new(
        id: ProcessId,
        peers: &'a [Peer],
        clock: &'a mut LamportClock,
        transport: &'a dyn PeerTransport,
    ) -> Self {
        Self {
            id,
            peers,
            clock,
            transport,
        }
    }

    pub fn time(&self) -> Timestamp {
        self.clock.time()
    }

    pub fn tick(&mut self) -> Timestamp {
        self.clock.tick()
    }

    /// Function that sends a message to one peer. Failures are logged and the message dropped.
    pub fn send(&self, to: ProcessId, message: &Message) {
        match self.peers.iter().find(|peer| peer.id == to) {
            Some(peer) => self.deliver(peer, message),
            None => log::warn(&cformat!(
                "No peer <bold>{to}</bold> to send `{message}` to."
            )),
        }
    }

    /// Function that sends the same message to every peer.
    pub fn broadcast(&self, message: &Message) {
        for peer in self.peers {
            self.deliver(peer, message);
        }
    }

    fn deliver(&self, peer: &Peer, message: &Message) {
        if let Err(e) = self.transport.send(peer, message.to_string()) {
            log::warn(&cformat!(
                "Couldn't send <bold>{}</bold> to process <bold>{}</bold>: {e}",
                message.kind(),
                peer.id
            ));
        }
    }
}

pub struct ProcessCore {
    id: ProcessId,
    peers: Vec<Peer>,
    clock: LamportClock,
    mutex: MutexEngine,
    snapshot: SnapshotEngine,
    transport: Arc<dyn PeerTransport>,
}

impl ProcessCore {
    pub fn new(
        id: ProcessId,
        peers: Vec<Peer>,
        transport: Arc<dyn PeerTransport>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            id,
            peers,
            clock: LamportClock::new(),
            mutex: MutexEngine::new(id),
            snapshot: SnapshotEngine::new(id, sink),
            transport,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn time(&self) -> Timestamp {
        self.clock.time()
    }

    pub fn lock_state(&self) -> LockState {
        self.mutex.state()
    }

    pub fn mutex(&self) -> &MutexEngine {
        &self.mutex
    }

    pub fn snapshot(&self) -> &SnapshotEngine {
        &self.snapshot
    }

    pub fn request_lock(&mut self, notify: GrantNotifier) -> Result<Timestamp, LockError> {
        let (mut ctx, mutex, _) = self.split();
        mutex.request_lock(&mut ctx, notify)
    }

    pub fn release_lock(&mut self) -> Result<Vec<ProcessId>, LockError> {
        let (mut ctx, mutex, _) = self.split();
        mutex.release_lock(&mut ctx)
    }

    /// Returns the new snapshot id, or `None` when a snapshot is already in progress.
    pub fn initiate_snapshot(&mut self) -> Option<SnapshotId> {
        let local = self.mutex.capture(self.clock.time());
        let (mut ctx, _, snapshot) = self.split();
        snapshot.initiate(&mut ctx, local)
    }

    /// Handles one inbound line.
    ///
    /// Lines that fail to parse or come from outside the peer set are rejected before the clock
    /// moves. Everything else observes the sender's time first.
    pub fn handle_line(&mut self, line: &str) -> Result<(), ProcessError> {
        let message: Message = line.parse()?;
        let sender = message.sender();
        if !self.peers.iter().any(|peer| peer.id == sender) {
            return Err(ProcessError::UnknownSender(sender));
        }

        self.clock.observe(message.time());

        if message.is_channel_traffic() {
            self.snapshot.record_channel_message(sender, line);
        }

        match message {
            Message::Request { time, sender } => {
                let (mut ctx, mutex, _) = self.split();
                mutex.on_request(&mut ctx, time, sender);
            }
            Message::Reply { sender, .. } => {
                let (mut ctx, mutex, _) = self.split();
                mutex.on_reply(&mut ctx, sender);
            }
            Message::TakeSnapshot {
                sender,
                snapshot_id,
                initiator,
                ..
            } => {
                let local = self.mutex.capture(self.clock.time());
                let (mut ctx, _, snapshot) = self.split();
                snapshot.on_marker(&mut ctx, sender, snapshot_id, initiator, local);
            }
            Message::SnapshotData {
                sender,
                snapshot_id,
                payload,
                ..
            } => {
                let (mut ctx, _, snapshot) = self.split();
                snapshot.on_data(&mut ctx, sender, snapshot_id, &payload);
            }
        }

        Ok(())
    }

    fn split(&mut self) -> (Context<'_>, &mut MutexEngine, &mut SnapshotEngine) {
        (
            Context::new(
                self.id,
                &self.peers,
                &mut self.clock,
                self.transport.as_ref(),
            ),
            &mut self.mutex,
            &mut self.snapshot,
        )
    }
}
