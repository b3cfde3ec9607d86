//! Pipeline stages and the consumer loop that drives them.
//!
//! The scheduler runs on an interval; fetchers, the storer, and the
//! classifier are [`DeliveryHandler`]s driven by a [`Consumer`].

pub mod backoff;
pub mod classifier;
pub mod consumer;
pub mod fetcher;
pub mod scheduler;
pub mod shutdown;
pub mod storer;

pub use backoff::Backoff;
pub use classifier::{Classifier, ClassifierSettings};
pub use consumer::{Consumer, ConsumerStats, DeliveryHandler, Disposition};
pub use fetcher::{FetchKind, Fetcher};
pub use scheduler::{CycleReport, Scheduler, SchedulerSettings};
pub use shutdown::Shutdown;
pub use storer::Storer;
