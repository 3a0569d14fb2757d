//! Chandy-Lamport global snapshots.
//!
//! The initiator records its local state and floods `TAKE_SNAPSHOT` markers. Every other process
//! records its own state on the first marker it sees and forwards the marker to everyone. From
//! then on, mutual exclusion traffic arriving on a channel whose marker has not been seen yet is
//! logged as in transit. Once all of its channels are closed, a process ships its record to the
//! initiator, which assembles the global document and hands it to the [`SnapshotSink`].

use crate::{
    log,
    message::{decode_payload, encode_payload, Message},
    process::Context,
    request::Request,
    sink::SnapshotSink,
    ProcessId, SnapshotId, Timestamp,
};
use color_print::cformat;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Mutex state frozen at the instant recording starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    pub time: Timestamp,
    pub in_critical_section: bool,
    pub wants_critical_section: bool,
    /// Requests other processes are waiting on us to answer.
    pub requests: Vec<Request>,
    pub replies: Vec<ProcessId>,
}

/// One process's contribution to a snapshot, as shipped in `SNAPSHOT_DATA`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub time: Timestamp,
    pub is_in_critical_section: bool,
    pub wants_critical_section: bool,
    pub requests_this_process_must_reply_to: Vec<Request>,
    pub replies_this_process_received: Vec<ProcessId>,
    pub messages_that_were_in_transit: BTreeMap<ProcessId, Vec<String>>,
}

impl ProcessRecord {
    pub fn new(local: &LocalState, in_transit: BTreeMap<ProcessId, Vec<String>>) -> Self {
        Self {
            time: local.time,
            is_in_critical_section: local.in_critical_section,
            wants_critical_section: local.wants_critical_section,
            requests_this_process_must_reply_to: local.requests.clone(),
            replies_this_process_received: local.replies.clone(),
            messages_that_were_in_transit: in_transit,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The assembled global snapshot, keyed by process id.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub snapshot: BTreeMap<ProcessId, ProcessRecord>,
}

impl SnapshotDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Bookkeeping for the snapshot in progress. Dropped as soon as the snapshot is assembled or
/// forwarded.
#[derive(Debug)]
pub struct SnapshotState {
    pub snapshot_id: SnapshotId,
    pub initiator: ProcessId,
    pub pending_channels: BTreeSet<ProcessId>,
    pub channel_log: BTreeMap<ProcessId, Vec<String>>,
    pub local: LocalState,
    pub collected: BTreeMap<ProcessId, ProcessRecord>,
}

impl SnapshotState {
    fn new(
        snapshot_id: SnapshotId,
        initiator: ProcessId,
        peers: impl Iterator<Item = ProcessId>,
        local: LocalState,
    ) -> Self {
        let pending_channels: BTreeSet<ProcessId> = peers.collect();
        let channel_log = pending_channels.iter().map(|&id| (id, Vec::new())).collect();

        Self {
            snapshot_id,
            initiator,
            pending_channels,
            channel_log,
            local,
            collected: BTreeMap::new(),
        }
    }

    fn record(&self) -> ProcessRecord {
        ProcessRecord::new(&self.local, self.channel_log.clone())
    }
}

pub struct SnapshotEngine {
    id: ProcessId,
    sink: Arc<dyn SnapshotSink>,
    active: Option<SnapshotState>,
    /// Highest snapshot id initiated or seen; new initiations go above it.
    last_seen: SnapshotId,
    last_completed: Option<SnapshotId>,
}

impl SnapshotEngine {
    pub fn new(id: ProcessId, sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            id,
            sink,
            active: None,
            last_seen: 0,
            last_completed: None,
        }
    }

    pub fn active(&self) -> Option<&SnapshotState> {
        self.active.as_ref()
    }

    pub fn is_in_progress(&self) -> bool {
        self.active.is_some()
    }

    pub fn last_completed(&self) -> Option<SnapshotId> {
        self.last_completed
    }

    /// Starts a new snapshot from this process. Returns `None` if one is already in progress.
    pub fn initiate(&mut self, ctx: &mut Context<'_>, local: LocalState) -> Option<SnapshotId> {
        if let Some(active) = &self.active {
            log::debug(&cformat!(
                "Snapshot <bold>{}</bold> already in progress, not initiating another.",
                active.snapshot_id
            ));
            return None;
        }

        let snapshot_id = self.last_seen + 1;
        self.last_seen = snapshot_id;
        self.active = Some(SnapshotState::new(
            snapshot_id,
            self.id,
            ctx.peers.iter().map(|peer| peer.id),
            local,
        ));

        log::info(&cformat!(
            "Initiating snapshot <cyan, bold>{snapshot_id}</cyan, bold>."
        ));
        let time = ctx.tick();
        ctx.broadcast(&Message::TakeSnapshot {
            time,
            sender: self.id,
            snapshot_id,
            initiator: Some(self.id),
        });

        self.try_complete(ctx);
        Some(snapshot_id)
    }

    /// Handles a marker. The first marker for a snapshot starts recording and is flooded on;
    /// later ones close the channel they arrived on.
    pub fn on_marker(
        &mut self,
        ctx: &mut Context<'_>,
        sender: ProcessId,
        snapshot_id: SnapshotId,
        initiator: Option<ProcessId>,
        local: LocalState,
    ) {
        match self.active.as_mut() {
            None => {
                if self.last_completed.is_some_and(|done| snapshot_id <= done) {
                    log::debug(&cformat!(
                        "Ignoring stale marker for snapshot <bold>{snapshot_id}</bold> from process {sender}."
                    ));
                    return;
                }

                let initiator = initiator.unwrap_or(sender);
                let mut state = SnapshotState::new(
                    snapshot_id,
                    initiator,
                    ctx.peers.iter().map(|peer| peer.id),
                    local,
                );
                // the marker itself delimits the sender's channel
                state.pending_channels.remove(&sender);
                self.active = Some(state);
                self.last_seen = self.last_seen.max(snapshot_id);

                log::info(&cformat!(
                    "Recording snapshot <cyan, bold>{snapshot_id}</cyan, bold> (initiator {initiator}, first marker from {sender})."
                ));
                let time = ctx.tick();
                ctx.broadcast(&Message::TakeSnapshot {
                    time,
                    sender: self.id,
                    snapshot_id,
                    initiator: Some(initiator),
                });
            }
            Some(state) if state.snapshot_id == snapshot_id => {
                state.pending_channels.remove(&sender);
            }
            Some(state) => {
                log::warn(&cformat!(
                    "Ignoring marker for snapshot <bold>{snapshot_id}</bold> from process {sender} while recording snapshot {}.",
                    state.snapshot_id
                ));
                return;
            }
        }

        self.try_complete(ctx);
    }

    /// Logs mutual exclusion traffic from `sender` if its channel is still being recorded.
    /// Must run before the message is processed so the last pre-marker message is kept.
    pub fn record_channel_message(&mut self, sender: ProcessId, line: &str) {
        if let Some(state) = self.active.as_mut() {
            if state.pending_channels.contains(&sender) {
                state
                    .channel_log
                    .entry(sender)
                    .or_default()
                    .push(line.to_string());
            }
        }
    }

    /// Collects a peer's record at the initiator.
    pub fn on_data(
        &mut self,
        ctx: &mut Context<'_>,
        sender: ProcessId,
        snapshot_id: SnapshotId,
        payload: &str,
    ) {
        let Some(state) = self.active.as_mut() else {
            log::warn(&cformat!(
                "Discarding data for snapshot <bold>{snapshot_id}</bold> from process {sender}: no snapshot in progress."
            ));
            return;
        };
        if state.initiator != self.id || state.snapshot_id != snapshot_id {
            log::warn(&cformat!(
                "Discarding data for snapshot <bold>{snapshot_id}</bold> from process {sender}: not collecting it here."
            ));
            return;
        }

        let record = match decode_payload(payload)
            .map_err(|e| e.to_string())
            .and_then(|json| ProcessRecord::from_json(&json).map_err(|e| e.to_string()))
        {
            Ok(record) => record,
            Err(e) => {
                log::warn(&cformat!(
                    "Discarding unreadable snapshot data from process <bold>{sender}</bold>: {e}"
                ));
                return;
            }
        };

        state.collected.insert(sender, record);
        self.try_complete(ctx);
    }

    fn try_complete(&mut self, ctx: &mut Context<'_>) {
        let Some(state) = self.active.as_ref() else {
            return;
        };

        let done = if state.initiator == self.id {
            ctx.peers
                .iter()
                .all(|peer| state.collected.contains_key(&peer.id))
        } else {
            state.pending_channels.is_empty()
        };
        if !done {
            return;
        }

        if let Some(state) = self.active.take() {
            self.last_completed = Some(state.snapshot_id);
            if state.initiator == self.id {
                self.assemble(state);
            } else {
                self.forward(ctx, state);
            }
        }
    }

    fn forward(&self, ctx: &mut Context<'_>, state: SnapshotState) {
        let json = match state.record().to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error(&cformat!(
                    "Couldn't encode the record for snapshot <bold>{}</bold>: {e}",
                    state.snapshot_id
                ));
                return;
            }
        };

        let time = ctx.tick();
        ctx.send(
            state.initiator,
            &Message::SnapshotData {
                time,
                sender: self.id,
                snapshot_id: state.snapshot_id,
                payload: encode_payload(&json),
            },
        );
        log::info(&cformat!(
            "Sent snapshot <cyan, bold>{}</cyan, bold> data to process {}.",
            state.snapshot_id,
            state.initiator
        ));
    }

    fn assemble(&self, state: SnapshotState) {
        let mut snapshot = state.collected.clone();
        snapshot.insert(self.id, state.record());
        let document = SnapshotDocument { snapshot };

        match self.sink.persist(self.id, state.snapshot_id, &document) {
            Ok(()) => log::info(&cformat!(
                "Snapshot <cyan, bold>{}</cyan, bold> complete with {} process(es).",
                state.snapshot_id,
                document.snapshot.len()
            )),
            Err(e) => log::error(&cformat!(
                "Couldn't persist snapshot <bold>{}</bold>: {e}",
                state.snapshot_id
            )),
        }
    }
}
