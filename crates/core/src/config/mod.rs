mod loading;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use loading::load_dotenv;
pub use types::{FrameConfig, KestrelConfig, QueuesConfig, TasksConfig, ThreadsConfig};
