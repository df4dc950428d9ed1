use std::{fmt, io};

#[derive(Debug)]
pub enum QueueError {
    /// The supplied region cannot hold a control block plus at least one slot.
    RegionTooSmall { region_size: usize, required: usize },
    /// The region base address does not satisfy the slot alignment.
    Misaligned { addr: usize, align: usize },
    SharedMemory(shared_memory::ShmemError),
    Io(io::Error),
    Logic(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::RegionTooSmall {
                region_size,
                required,
            } => write!(
                f,
                "region of {} bytes is too small, need at least {} bytes",
                region_size, required
            ),
            QueueError::Misaligned { addr, align } => {
                write!(f, "region base {:#x} is not {}-byte aligned", addr, align)
            }
            QueueError::SharedMemory(e) => write!(f, "Shared memory error: {}", e),
            QueueError::Io(e) => write!(f, "IO error: {}", e),
            QueueError::Logic(s) => write!(f, "Logic error: {}", s),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::SharedMemory(e) => Some(e),
            QueueError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shared_memory::ShmemError> for QueueError {
    fn from(err: shared_memory::ShmemError) -> Self {
        QueueError::SharedMemory(err)
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> Self {
        QueueError::Io(err)
    }
}
