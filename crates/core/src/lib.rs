pub mod config;
pub mod error;
pub mod ids;
pub mod message_id;

pub use config::{load_dotenv, KestrelConfig};
pub use error::KestrelError;
pub use ids::{next_task_id, TaskId, ThreadId, MAX_THREADS, TASK_ID_MAX};
pub use message_id::{msg, register_name, MessageId};
