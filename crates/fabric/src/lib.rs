//! Zero-copy message fabric: 16-byte blocks, packed message headers, and the
//! single-producer/single-consumer queues TaskMasters talk through.

pub mod block;
pub mod error;
pub mod message;
pub mod queue;
pub mod ring;

pub use block::{Block, Cell};
pub use error::FabricError;
pub use message::{Message, MessageFlags, MAX_MESSAGE_BLOCKS, MAX_TRAILING_BLOCKS};
pub use queue::{message_queue, MessageConsumer, MessageProducer, MessageRef, MessageWriter};
