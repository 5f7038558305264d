//! Queue transport: the client seam, its SQS implementation and queue spec
//! resolution.
//!
//! ## Flow
//!
//! ```text
//! queue specs → QueueResolver (list once) → ResolvedQueue → Listener poll loop
//! ```

pub mod client;
pub mod resolver;
pub mod sqs;
pub mod types;

pub use client::QueueClient;
pub use resolver::{QueueResolver, QueueSpec};
pub use sqs::SqsQueueClient;
pub use types::{queue_name, RawMessage, ResolvedQueue, MAX_BATCH_SIZE};
