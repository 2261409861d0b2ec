use thiserror::Error;

use crate::ids::ThreadId;

/// Errors raised while configuring and bootstrapping the scheduler.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("TaskMaster already initialized")]
    AlreadyInitialized,

    #[error("failed to spawn TaskMaster thread {thread}: {source}")]
    ThreadSpawn {
        thread: ThreadId,
        #[source]
        source: std::io::Error,
    },

    #[error("TaskMaster thread {0} panicked")]
    ThreadPanicked(ThreadId),
}
