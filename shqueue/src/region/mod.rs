//! The external side of the queue: creating or opening the OS shared-memory
//! mapping, the config the binaries load, and the signal-driven shutdown
//! flag their loops poll.
//!
//! The queue core never touches any of this; it is handed a base address
//! and a length and nothing else. Region lifetime belongs to whoever holds
//! the [`Shmem`] mapping.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use signal_hook::iterator::Signals;

use crate::errors::QueueError;

pub static QUEUE_FILE_NAME: &'static str = "shqueue";

static DEFAULT_DATA_DIR: Lazy<String> =
    Lazy::new(|| env::var("SHQUEUE_DATA_DIR").unwrap_or_else(|_| "/dev/shm".to_string()));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub data_dir: String,
    pub queue_file_name: String,
    /// Size of the mapping to create; the queue capacity is derived from it
    /// at attach time unless an explicit capacity is requested.
    pub region_size: usize,
}

impl Default for QueueConfig {
    fn default() -> QueueConfig {
        QueueConfig {
            data_dir: DEFAULT_DATA_DIR.clone(),
            queue_file_name: QUEUE_FILE_NAME.to_string(),
            region_size: 1 << 20,
        }
    }
}

impl QueueConfig {
    pub fn link_path(&self) -> String {
        format!("{}/{}", &self.data_dir, &self.queue_file_name)
    }
}

/// Create the file-linked mapping, or open it if another process already
/// created it. Whoever wins the create also wins nothing special: queue
/// construction is decided by the attach handshake, not by mapping order.
pub fn map_region(cfg: &QueueConfig) -> Result<Shmem, QueueError> {
    match ShmemConf::new()
        .size(cfg.region_size)
        .flink(cfg.link_path())
        .create()
    {
        Ok(m) => Ok(m),
        Err(ShmemError::LinkExists) => open_region(cfg),
        Err(e) => Err(QueueError::SharedMemory(e)),
    }
}

/// Open an existing mapping; fails if no process has created it yet.
pub fn open_region(cfg: &QueueConfig) -> Result<Shmem, QueueError> {
    match ShmemConf::new().flink(cfg.link_path()).open() {
        Ok(m) => Ok(m),
        Err(e) => Err(QueueError::SharedMemory(e)),
    }
}

/// Cooperative shutdown flag flipped by SIGHUP/SIGINT/SIGQUIT/SIGTERM.
///
/// The long-running binaries poll [`is_closing`](Self::is_closing) in their
/// loops so an interrupted process stops enqueuing instead of dying with a
/// half-written progress line.
pub struct Shutdown {
    closing: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn install() -> Result<Shutdown, QueueError> {
        let closing = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closing);
        let mut signals = Signals::new(&[libc::SIGHUP, libc::SIGINT, libc::SIGQUIT, libc::SIGTERM])?;
        thread::spawn(move || {
            for _ in signals.forever() {
                flag.store(true, Ordering::SeqCst);
            }
        });
        Ok(Shutdown { closing })
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }
}
