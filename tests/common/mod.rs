//! Deterministic in-memory cluster of `ProcessCore`s connected by FIFO channels.

#![allow(dead_code)]

use lamport_mutex::{
    error::{LockError, TransportError},
    mutex::LockState,
    peer::{Peer, PeerTransport},
    process::ProcessCore,
    sink::MemorySnapshotSink,
    ProcessId, SnapshotId, Timestamp,
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
};
use tokio::sync::oneshot;

pub type Channel = (ProcessId, ProcessId);

#[derive(Default)]
pub struct Network {
    channels: Mutex<BTreeMap<Channel, VecDeque<String>>>,
    sent: Mutex<Vec<(ProcessId, ProcessId, String)>>,
}

impl Network {
    fn push(&self, from: ProcessId, to: ProcessId, line: String) {
        self.sent.lock().unwrap().push((from, to, line.clone()));
        self.channels
            .lock()
            .unwrap()
            .entry((from, to))
            .or_default()
            .push_back(line);
    }

    fn pop(&self, channel: Channel) -> Option<String> {
        self.channels
            .lock()
            .unwrap()
            .get_mut(&channel)
            .and_then(VecDeque::pop_front)
    }

    pub fn busy_channels(&self) -> Vec<Channel> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(&channel, _)| channel)
            .collect()
    }

    pub fn queued(&self, channel: Channel) -> Vec<String> {
        self.channels
            .lock()
            .unwrap()
            .get(&channel)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every line sent since the last call, in send order.
    pub fn take_sent(&self) -> Vec<(ProcessId, ProcessId, String)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

pub struct SimTransport {
    from: ProcessId,
    network: Arc<Network>,
}

impl PeerTransport for SimTransport {
    fn send(&self, peer: &Peer, line: String) -> Result<(), TransportError> {
        self.network.push(self.from, peer.id, line);
        Ok(())
    }
}

pub struct Cluster {
    pub processes: BTreeMap<ProcessId, ProcessCore>,
    pub network: Arc<Network>,
    pub sink: Arc<MemorySnapshotSink>,
    grants: BTreeMap<ProcessId, oneshot::Receiver<Result<(), LockError>>>,
    fired: BTreeSet<ProcessId>,
}

impl Cluster {
    /// Processes `1..=n`, fully connected.
    pub fn new(n: ProcessId) -> Self {
        let network = Arc::new(Network::default());
        let sink = Arc::new(MemorySnapshotSink::default());

        let processes = (1..=n)
            .map(|id| {
                let peers = (1..=n)
                    .filter(|&other| other != id)
                    .map(|other| Peer::new(other, "localhost", 8000 + other as u16))
                    .collect();
                let transport = Arc::new(SimTransport {
                    from: id,
                    network: network.clone(),
                });
                (id, ProcessCore::new(id, peers, transport, sink.clone()))
            })
            .collect();

        Self {
            processes,
            network,
            sink,
            grants: BTreeMap::new(),
            fired: BTreeSet::new(),
        }
    }

    pub fn process(&self, id: ProcessId) -> &ProcessCore {
        &self.processes[&id]
    }

    fn process_mut(&mut self, id: ProcessId) -> &mut ProcessCore {
        self.processes.get_mut(&id).expect("unknown process")
    }

    pub fn request(&mut self, id: ProcessId) -> Timestamp {
        let (tx, rx) = oneshot::channel();
        let time = self.process_mut(id).request_lock(tx).unwrap();
        self.grants.insert(id, rx);
        self.fired.remove(&id);
        time
    }

    pub fn release(&mut self, id: ProcessId) -> Vec<ProcessId> {
        self.process_mut(id).release_lock().unwrap()
    }

    pub fn initiate_snapshot(&mut self, id: ProcessId) -> Option<SnapshotId> {
        self.process_mut(id).initiate_snapshot()
    }

    /// Whether the grant notification for `id`'s latest request has fired.
    pub fn granted(&mut self, id: ProcessId) -> bool {
        if let Some(rx) = self.grants.get_mut(&id) {
            if matches!(rx.try_recv(), Ok(Ok(()))) {
                self.grants.remove(&id);
                self.fired.insert(id);
            }
        }
        self.fired.contains(&id)
    }

    /// Delivers the oldest message on `channel`. Returns the delivered line.
    pub fn deliver(&mut self, channel: Channel) -> Option<String> {
        let line = self.network.pop(channel)?;
        self.process_mut(channel.1)
            .handle_line(&line)
            .unwrap_or_else(|e| panic!("process {} rejected `{line}`: {e}", channel.1));
        Some(line)
    }

    /// Delivers messages, lowest channel first, until the network is quiet.
    pub fn deliver_all(&mut self) {
        while let Some(&channel) = self.network.busy_channels().first() {
            self.deliver(channel);
        }
    }

    pub fn holders(&self) -> Vec<ProcessId> {
        self.processes
            .iter()
            .filter(|(_, core)| core.lock_state() == LockState::Holding)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn state(&self, id: ProcessId) -> LockState {
        self.process(id).lock_state()
    }
}
