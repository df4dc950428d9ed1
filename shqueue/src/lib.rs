mod core;
pub mod errors;
pub mod layout;
pub mod queue;
pub mod region;

#[cfg(test)]
mod tests;

pub use crate::core::InitState;
pub use crate::errors::QueueError;
pub use crate::layout::required_region_size;
pub use crate::queue::SharedQueue;
pub use crate::region::{map_region, open_region, QueueConfig, Shutdown, QUEUE_FILE_NAME};
