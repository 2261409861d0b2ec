use super::types::KestrelConfig;
use crate::error::KestrelError;
use crate::ids::MAX_THREADS;

/// A queue must hold at least one maximal message (header + 15 blocks).
const MIN_QUEUE_BLOCKS: usize = 16;

impl KestrelConfig {
    /// Validate the config: thread bounds, queue sizing, frame settings.
    pub fn validate(&self) -> Result<(), KestrelError> {
        self.validate_thread_count()?;
        self.validate_queue_capacity()?;
        self.validate_frame()?;
        Ok(())
    }

    fn validate_thread_count(&self) -> Result<(), KestrelError> {
        let count = self.threads.count;
        if count == 0 || count > MAX_THREADS {
            return Err(KestrelError::Config(format!(
                "threads.count = {count} is out of range, expected 1..={MAX_THREADS}"
            )));
        }
        Ok(())
    }

    fn validate_queue_capacity(&self) -> Result<(), KestrelError> {
        let capacity = self.queues.capacity_blocks;
        if !capacity.is_power_of_two() {
            return Err(KestrelError::Config(format!(
                "queues.capacity_blocks = {capacity} must be a power of two"
            )));
        }
        if capacity < MIN_QUEUE_BLOCKS {
            return Err(KestrelError::Config(format!(
                "queues.capacity_blocks = {capacity} cannot hold a full message, \
                 minimum is {MIN_QUEUE_BLOCKS}"
            )));
        }
        Ok(())
    }

    fn validate_frame(&self) -> Result<(), KestrelError> {
        if self.frame.max_delta_ms == 0 {
            return Err(KestrelError::Config(
                "frame.max_delta_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
