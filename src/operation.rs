//! Module that contains the critical-section payload and the workload loop driving it.

use crate::{actor::ActorHandle, log, poisson::Poisson};
use color_print::cformat;
use rand::rngs::SmallRng;
use std::{error::Error, path::PathBuf};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, time::sleep};

/// File shared by every process. Only the lock holder appends to it.
#[derive(Debug, Clone)]
pub struct SharedFile {
    pub path: PathBuf,
}

impl SharedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Function that appends `|` and then `.`: interleaved writers would show up as `||` or `..`.
    pub async fn append(&self) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(b"|").await?;
        file.flush().await?;
        file.write_all(b".").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Repeatedly takes the distributed lock and appends to the shared file.
pub struct Writer {
    pub handle: ActorHandle,
    pub file: SharedFile,
    pub think_time: Poisson<SmallRng>,
    /// Stop after this many critical sections. `None` runs forever.
    pub limit: Option<u64>,
    /// When false, appends skip the distributed lock entirely.
    pub use_dme: bool,
}

impl Writer {
    /// Function that runs a single critical section. The lock is released even if the append
    /// fails.
    pub async fn write_once(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.use_dme {
            self.file.append().await?;
            log::info(&cformat!("Process wrote <bold>|.</bold> without the lock."));
            return Ok(());
        }

        self.handle.request_lock().acquired().await?;

        log::info(&cformat!("<green>Entering critical section.</green>"));
        let written = self.file.append().await;
        self.handle.release_lock().await?;

        written?;
        log::info(&cformat!("Process wrote <bold>|.</bold>"));
        Ok(())
    }

    pub async fn run(mut self) -> Result<u64, Box<dyn Error + Send + Sync>> {
        let mut completed = 0;

        while self.limit.map_or(true, |limit| completed < limit) {
            if let Err(e) = self.write_once().await {
                log::error(&cformat!("Critical section failed: {e}"));
                if self.handle.status().await.is_err() {
                    return Err(e);
                }
            } else {
                completed += 1;
            }

            sleep(self.think_time.delay_for_next_event()).await;
        }

        Ok(completed)
    }
}
