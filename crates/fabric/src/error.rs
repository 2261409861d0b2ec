use thiserror::Error;

/// Errors that can occur in the ring buffer and message queue layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    #[error("queue full: requested {requested} slots, {free} free")]
    QueueFull { requested: usize, free: usize },

    #[error("ring capacity {0} must be a non-zero power of two")]
    InvalidCapacity(usize),

    #[error("queue capacity {capacity} cannot hold a {required}-block message")]
    CapacityTooSmall { capacity: usize, required: usize },
}
