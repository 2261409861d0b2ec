//! Packed 16-byte message header.
//!
//! Layout (four little 32-bit words):
//!
//! ```text
//! word 0: message id (hash)
//! word 1: flags:4      | source:28
//! word 2: blocks:4     | target:28
//! word 3: payload cell
//! ```
//!
//! A message with `N` trailing blocks occupies `N + 1` consecutive ring slots.

use std::fmt;
use std::ops::BitOr;

use kestrel_core::ids::{TaskId, TASK_ID_BITS, TASK_ID_MAX};
use kestrel_core::MessageId;

use crate::block::Cell;

/// Most trailing blocks a single message may carry.
pub const MAX_TRAILING_BLOCKS: usize = 15;

/// Slots needed by the largest possible message.
pub const MAX_MESSAGE_BLOCKS: usize = MAX_TRAILING_BLOCKS + 1;

const ID_MASK: u32 = TASK_ID_MAX;

/// 4-bit routing flags carried alongside the source id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0);
    /// The recipient may decline (return `Propagate`) without it being fatal.
    pub const FORCE_PROPAGATE: MessageFlags = MessageFlags(0b0001);
    /// Queued on the sender's own loopback because the target's owner was unknown.
    pub const DEFERRED: MessageFlags = MessageFlags(0b0010);

    pub const fn from_bits(bits: u8) -> Self {
        assert!(bits < 16, "message flags exceed 4 bits");
        MessageFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: Self) -> Self {
        MessageFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageFlags({:#06b})", self.0)
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Message {
    msg_id: u32,
    flags_source: u32,
    blocks_target: u32,
    payload: Cell,
}

const _: () = assert!(std::mem::size_of::<Message>() == 16);

impl Message {
    /// Build a header. Panics if `block_count` exceeds [`MAX_TRAILING_BLOCKS`].
    pub fn new(
        msg_id: MessageId,
        flags: MessageFlags,
        source: TaskId,
        target: TaskId,
        payload: Cell,
        block_count: usize,
    ) -> Self {
        assert!(
            block_count <= MAX_TRAILING_BLOCKS,
            "message {msg_id} carries {block_count} blocks, limit is {MAX_TRAILING_BLOCKS}"
        );
        Message {
            msg_id: msg_id.raw(),
            flags_source: (u32::from(flags.bits()) << TASK_ID_BITS) | source.raw(),
            blocks_target: ((block_count as u32) << TASK_ID_BITS) | target.raw(),
            payload,
        }
    }

    pub(crate) fn from_words(words: [u32; 4]) -> Self {
        Message {
            msg_id: words[0],
            flags_source: words[1],
            blocks_target: words[2],
            payload: Cell::from_u32(words[3]),
        }
    }

    pub(crate) fn to_words(self) -> [u32; 4] {
        [
            self.msg_id,
            self.flags_source,
            self.blocks_target,
            self.payload.u32(),
        ]
    }

    pub fn msg_id(&self) -> MessageId {
        MessageId::from_raw(self.msg_id)
    }

    pub fn flags(&self) -> MessageFlags {
        MessageFlags((self.flags_source >> TASK_ID_BITS) as u8)
    }

    pub fn has_flag(&self, flag: MessageFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn source(&self) -> TaskId {
        TaskId::new(self.flags_source & ID_MASK)
    }

    pub fn target(&self) -> TaskId {
        TaskId::new(self.blocks_target & ID_MASK)
    }

    pub fn block_count(&self) -> usize {
        (self.blocks_target >> TASK_ID_BITS) as usize
    }

    pub fn payload(&self) -> Cell {
        self.payload
    }

    /// Same header addressed to a different target.
    pub fn with_target(mut self, target: TaskId) -> Self {
        self.blocks_target = (self.blocks_target & !ID_MASK) | target.raw();
        self
    }

    /// Same header with `flags` added.
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        let merged = self.flags() | flags;
        self.flags_source =
            (u32::from(merged.bits()) << TASK_ID_BITS) | (self.flags_source & ID_MASK);
        self
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_id", &self.msg_id())
            .field("flags", &self.flags())
            .field("source", &self.source())
            .field("target", &self.target())
            .field("blocks", &self.block_count())
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    #[test]
    fn header_is_one_block() {
        assert_eq!(std::mem::size_of::<Message>(), std::mem::size_of::<Block>());
        assert_eq!(std::mem::size_of::<Message>(), 16);
    }

    #[test]
    fn fields_survive_packing() {
        let id = MessageId::from_name("spawn");
        let source = TaskId::new(TASK_ID_MAX);
        let target = TaskId::new(77);
        let flags = MessageFlags::FORCE_PROPAGATE | MessageFlags::DEFERRED;
        let m = Message::new(id, flags, source, target, Cell::from_i32(-3), MAX_TRAILING_BLOCKS);

        let back = Block::from_message(&m).to_message();
        assert_eq!(back, m);
        assert_eq!(back.msg_id(), id);
        assert_eq!(back.source(), source);
        assert_eq!(back.target(), target);
        assert_eq!(back.block_count(), 15);
        assert_eq!(back.payload().i32(), -3);
        assert!(back.has_flag(MessageFlags::DEFERRED));
        assert!(back.has_flag(MessageFlags::FORCE_PROPAGATE));
    }

    #[test]
    fn retargeting_keeps_other_fields() {
        let m = Message::new(
            MessageId::from_name("ping"),
            MessageFlags::NONE,
            TaskId::new(20),
            TaskId::new(21),
            Cell::from_u32(9),
            2,
        );
        let r = m.with_target(TaskId::new(3)).with_flags(MessageFlags::DEFERRED);
        assert_eq!(r.target(), TaskId::new(3));
        assert_eq!(r.source(), TaskId::new(20));
        assert_eq!(r.block_count(), 2);
        assert!(r.has_flag(MessageFlags::DEFERRED));
        assert!(!r.has_flag(MessageFlags::FORCE_PROPAGATE));
    }

    #[test]
    #[should_panic(expected = "limit is 15")]
    fn too_many_blocks_panics() {
        let _ = Message::new(
            MessageId::from_name("big"),
            MessageFlags::NONE,
            TaskId::new(20),
            TaskId::new(21),
            Cell::ZERO,
            16,
        );
    }
}
