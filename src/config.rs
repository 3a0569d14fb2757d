//! Command-line configuration of a process.

use crate::{peer::Peer, ProcessId, RATE};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "lamport-mutex",
    about = "Ricart-Agrawala mutual exclusion with Chandy-Lamport snapshots"
)]
pub struct Config {
    /// Id of this process.
    pub id: ProcessId,

    /// Other processes, as `id:host:port`.
    pub peers: Vec<Peer>,

    /// Port to listen on. Defaults to 8000 + id.
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, default_value = "shared_file.txt")]
    pub shared_file: PathBuf,

    #[arg(long, default_value = "snapshot")]
    pub snapshot_dir: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub snapshot_interval_ms: u64,

    /// Periodically initiate snapshots. Defaults to true on process 1.
    #[arg(long)]
    pub initiator: Option<bool>,

    /// Expected critical sections per second.
    #[arg(long, default_value_t = RATE)]
    pub rate: f64,

    /// Stop after this many critical sections.
    #[arg(long)]
    pub writes: Option<u64>,

    /// Append to the shared file without taking the distributed lock.
    #[arg(long)]
    pub no_dme: bool,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl Config {
    pub fn listen_port(&self) -> Result<u16, String> {
        match self.port {
            Some(port) => Ok(port),
            None => u16::try_from(self.id)
                .ok()
                .and_then(|id| 8000u16.checked_add(id))
                .ok_or_else(|| {
                    format!("process {} has no default port, pass --port", self.id)
                }),
        }
    }

    pub fn listen_address(&self) -> Result<String, String> {
        Ok(format!("0.0.0.0:{}", self.listen_port()?))
    }

    pub fn use_dme(&self) -> bool {
        !self.no_dme
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator.unwrap_or(self.id == 1)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// Rejects a peer list that contains this process or the same id twice, and settings the
    /// process could not run with.
    pub fn validate(&self) -> Result<(), String> {
        self.listen_port()?;
        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if peer.id == self.id {
                return Err(format!("peer list must not contain this process ({})", self.id));
            }
            if !seen.insert(peer.id) {
                return Err(format!("peer {} is listed twice", peer.id));
            }
        }
        if self.rate.is_nan() || self.rate <= 0.0 {
            return Err(format!("rate must be positive, got {}", self.rate));
        }
        if self.snapshot_interval_ms == 0 {
            return Err("snapshot interval must be at least 1ms".to_string());
        }
        Ok(())
    }
}
