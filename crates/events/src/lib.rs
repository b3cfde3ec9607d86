//! `fbwatch-events`: the message bus seam between pipeline stages.
//!
//! Stages never call each other; they exchange JSON bodies over named durable
//! queues with manual acknowledgment.

pub mod bus;
pub mod delivery;
pub mod in_memory_bus;
pub mod queues;

pub use bus::{QueueError, WorkQueue, WorkQueueExt};
pub use delivery::Delivery;
pub use in_memory_bus::{DeadLetter, InMemoryWorkQueue};
pub use queues::{dead_letter_queue, COMMENTS_CLASSIFY, COMMENTS_STORE, COMMENT_FETCH, PAGE_FETCH};
