//! Message-granular queue over the SPSC ring.
//!
//! A message is one header block plus up to 15 payload blocks, pushed and
//! popped as a unit: the header of a partially written message is never
//! visible to the consumer because all of its slots are published by a
//! single `push_commit`.

use kestrel_core::{MessageId, TaskId};

use crate::block::{Block, Cell};
use crate::error::FabricError;
use crate::message::{Message, MessageFlags, MAX_MESSAGE_BLOCKS};
use crate::ring::{self, Consumer, Producer, PushWindow};

/// Create a queue holding `capacity_blocks` blocks.
pub fn message_queue(
    capacity_blocks: usize,
) -> Result<(MessageProducer, MessageConsumer), FabricError> {
    let (producer, consumer) = ring::channel::<Block>(capacity_blocks)?;
    if capacity_blocks < MAX_MESSAGE_BLOCKS {
        return Err(FabricError::CapacityTooSmall {
            capacity: capacity_blocks,
            required: MAX_MESSAGE_BLOCKS,
        });
    }
    Ok((
        MessageProducer {
            ring: producer,
            pending: 0,
        },
        MessageConsumer {
            ring: consumer,
            current: 0,
        },
    ))
}

// ── Accessor ─────────────────────────────────────────────────────────

/// Read access to one message: its header and trailing blocks.
///
/// Queued messages are read in place from the ring and may be split at the
/// buffer end; immediate messages are a single contiguous slice. Handlers see
/// the same type either way.
#[derive(Clone, Copy)]
pub struct MessageRef<'a> {
    header: Message,
    first: &'a [Block],
    second: &'a [Block],
}

impl<'a> MessageRef<'a> {
    /// Wrap a header and contiguous payload (immediate delivery).
    pub fn contiguous(header: Message, blocks: &'a [Block]) -> Self {
        assert_eq!(
            blocks.len(),
            header.block_count(),
            "block slice does not match header of {}",
            header.msg_id()
        );
        MessageRef {
            header,
            first: blocks,
            second: &[],
        }
    }

    pub fn header(&self) -> &Message {
        &self.header
    }

    pub fn msg_id(&self) -> MessageId {
        self.header.msg_id()
    }

    pub fn flags(&self) -> MessageFlags {
        self.header.flags()
    }

    pub fn source(&self) -> TaskId {
        self.header.source()
    }

    pub fn target(&self) -> TaskId {
        self.header.target()
    }

    pub fn payload(&self) -> Cell {
        self.header.payload()
    }

    pub fn block_count(&self) -> usize {
        self.header.block_count()
    }

    /// Payload block `i`.
    pub fn block(&self, i: usize) -> &'a Block {
        if i < self.first.len() {
            &self.first[i]
        } else {
            &self.second[i - self.first.len()]
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &'a Block> {
        self.first.iter().chain(self.second.iter())
    }

    /// True when the payload was not split across the ring end.
    pub fn is_contiguous(&self) -> bool {
        self.second.is_empty()
    }

    /// Copy the payload into `out`, which must have room for every block.
    pub fn copy_blocks_into(&self, out: &mut [Block]) {
        let n = self.first.len();
        out[..n].copy_from_slice(self.first);
        out[n..n + self.second.len()].copy_from_slice(self.second);
    }
}

impl std::fmt::Debug for MessageRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRef")
            .field("header", &self.header)
            .field("blocks", &self.blocks().collect::<Vec<_>>())
            .finish()
    }
}

// ── Producer ─────────────────────────────────────────────────────────

pub struct MessageProducer {
    ring: Producer<Block>,
    /// Slots reserved by the last push_begin, header included.
    pending: usize,
}

impl MessageProducer {
    /// Reserve room for a message and pre-fill its header.
    ///
    /// The caller fills the payload through the returned writer and then
    /// calls [`push_commit`](Self::push_commit).
    pub fn push_begin(
        &mut self,
        msg_id: MessageId,
        flags: MessageFlags,
        source: TaskId,
        target: TaskId,
        payload: Cell,
        block_count: usize,
    ) -> Result<MessageWriter<'_>, FabricError> {
        let header = Message::new(msg_id, flags, source, target, payload, block_count);
        self.push_begin_header(header)
    }

    /// Like [`push_begin`](Self::push_begin) with a prebuilt header.
    pub fn push_begin_header(&mut self, header: Message) -> Result<MessageWriter<'_>, FabricError> {
        let total = header.block_count() + 1;
        let mut window = self.ring.push_begin(total)?;
        window[0] = Block::from_message(&header);
        self.pending = total;
        Ok(MessageWriter { window, header })
    }

    /// Publish the message reserved by the last `push_begin`.
    pub fn push_commit(&mut self) {
        assert!(self.pending > 0, "push_commit without a pending message");
        self.ring.push_commit(self.pending);
        self.pending = 0;
    }

    /// Push a complete message in one call.
    pub fn push(&mut self, header: Message, blocks: &[Block]) -> Result<(), FabricError> {
        assert_eq!(
            blocks.len(),
            header.block_count(),
            "block slice does not match header of {}",
            header.msg_id()
        );
        {
            let mut writer = self.push_begin_header(header)?;
            writer.fill(blocks);
        }
        self.push_commit();
        Ok(())
    }

    /// Copy an already received message verbatim into this queue.
    pub fn transcribe(&mut self, message: &MessageRef<'_>) -> Result<(), FabricError> {
        {
            let mut writer = self.push_begin_header(*message.header())?;
            for (i, block) in message.blocks().enumerate() {
                writer.set_block(i, *block);
            }
        }
        self.push_commit();
        Ok(())
    }

    /// Free blocks as of now.
    pub fn free_blocks(&mut self) -> usize {
        self.ring.free()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// In-place writer for the payload of a reserved message.
pub struct MessageWriter<'a> {
    window: PushWindow<'a, Block>,
    header: Message,
}

impl MessageWriter<'_> {
    pub fn header(&self) -> &Message {
        &self.header
    }

    pub fn block_count(&self) -> usize {
        self.header.block_count()
    }

    /// Payload block `i` (the header occupies the slot before block 0).
    pub fn block_mut(&mut self, i: usize) -> &mut Block {
        assert!(i < self.block_count(), "block {i} outside message");
        &mut self.window[i + 1]
    }

    pub fn set_block(&mut self, i: usize, block: Block) {
        *self.block_mut(i) = block;
    }

    /// Copy `blocks` into the payload, starting at block 0.
    pub fn fill(&mut self, blocks: &[Block]) {
        assert!(blocks.len() <= self.block_count(), "payload exceeds message");
        self.window.copy_from_slice(1, blocks);
    }
}

// ── Consumer ─────────────────────────────────────────────────────────

pub struct MessageConsumer {
    ring: Consumer<Block>,
    /// Slots of the message last returned by pop_begin, header included.
    current: usize,
}

impl MessageConsumer {
    /// Next fully published message, if any.
    ///
    /// Returns `None` when nothing is visible or when fewer slots than the
    /// header announces are visible.
    pub fn pop_begin(&mut self) -> Option<MessageRef<'_>> {
        let window = self.ring.pop_begin();
        if window.is_empty() {
            return None;
        }
        let header = window[0].to_message();
        let total = header.block_count() + 1;
        if window.len() < total {
            return None;
        }
        self.current = total;
        let (first, second) = window.range(1, total - 1);
        Some(MessageRef {
            header,
            first,
            second,
        })
    }

    /// Release the message returned by the last `pop_begin`.
    pub fn pop_commit(&mut self) {
        assert!(self.current > 0, "pop_commit without a popped message");
        self.ring.pop_commit(self.current);
        self.current = 0;
    }

    /// Blocks currently published and not yet popped.
    pub fn pending_blocks(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(seed: u8) -> Block {
        let mut bytes = [0u8; 16];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8).wrapping_mul(31);
        }
        Block::from_bytes(bytes)
    }

    #[test]
    fn message_round_trip_with_two_blocks() {
        let (mut tx, mut rx) = message_queue(64).unwrap();
        let id = MessageId::from_name("payload_test");
        let a = pattern(1);
        let b = pattern(200);

        {
            let mut w = tx
                .push_begin(
                    id,
                    MessageFlags::NONE,
                    TaskId::new(12),
                    TaskId::new(13),
                    Cell::from_u32(20),
                    2,
                )
                .unwrap();
            w.set_block(0, a);
            w.set_block(1, b);
        }
        tx.push_commit();

        let msg = rx.pop_begin().expect("message should be visible");
        assert_eq!(msg.msg_id(), id);
        assert_eq!(msg.source(), TaskId::new(12));
        assert_eq!(msg.target(), TaskId::new(13));
        assert_eq!(msg.payload().u32(), 20);
        assert_eq!(msg.block_count(), 2);
        assert_eq!(msg.block(0).to_bytes(), a.to_bytes());
        assert_eq!(msg.block(1).to_bytes(), b.to_bytes());
        rx.pop_commit();
        assert!(rx.pop_begin().is_none());
    }

    #[test]
    fn uncommitted_message_is_invisible() {
        let (mut tx, mut rx) = message_queue(16).unwrap();
        drop(
            tx.push_begin(
                MessageId::from_name("half"),
                MessageFlags::NONE,
                TaskId::new(20),
                TaskId::new(21),
                Cell::ZERO,
                3,
            )
            .unwrap(),
        );
        assert!(rx.pop_begin().is_none());
        tx.push_commit();
        assert_eq!(rx.pop_begin().unwrap().block_count(), 3);
    }

    #[test]
    fn messages_wrap_around_ring_end() {
        let (mut tx, mut rx) = message_queue(16).unwrap();
        let id = MessageId::from_name("wrap");
        for round in 0..10u8 {
            let blocks = [pattern(round), pattern(round + 1), pattern(round + 2)];
            let header = Message::new(
                id,
                MessageFlags::NONE,
                TaskId::new(20),
                TaskId::new(30 + round as u32),
                Cell::from_u32(round as u32),
                blocks.len(),
            );
            tx.push(header, &blocks).unwrap();

            let msg = rx.pop_begin().unwrap();
            assert_eq!(msg.target(), TaskId::new(30 + round as u32));
            let mut out = [Block::ZERO; 3];
            msg.copy_blocks_into(&mut out);
            assert_eq!(out, blocks);
            rx.pop_commit();
        }
    }

    #[test]
    fn transcribe_copies_verbatim() {
        let (mut a_tx, mut a_rx) = message_queue(32).unwrap();
        let (mut b_tx, mut b_rx) = message_queue(32).unwrap();
        let header = Message::new(
            MessageId::from_name("forward"),
            MessageFlags::FORCE_PROPAGATE,
            TaskId::new(40),
            TaskId::new(41),
            Cell::from_f32(2.5),
            1,
        );
        a_tx.push(header, &[pattern(9)]).unwrap();

        let msg = a_rx.pop_begin().unwrap();
        b_tx.transcribe(&msg).unwrap();
        a_rx.pop_commit();

        let fwd = b_rx.pop_begin().unwrap();
        assert_eq!(*fwd.header(), header);
        assert_eq!(*fwd.block(0), pattern(9));
    }

    #[test]
    fn full_queue_reports_error() {
        let (mut tx, _rx) = message_queue(16).unwrap();
        let header = Message::new(
            MessageId::from_name("fill"),
            MessageFlags::NONE,
            TaskId::new(20),
            TaskId::new(21),
            Cell::ZERO,
            15,
        );
        tx.push(header, &[Block::ZERO; 15]).unwrap();
        let err = tx.push(header, &[Block::ZERO; 15]).unwrap_err();
        assert_eq!(err, FabricError::QueueFull { requested: 16, free: 0 });
    }

    #[test]
    fn tiny_capacity_rejected() {
        assert_eq!(
            message_queue(8).err(),
            Some(FabricError::CapacityTooSmall { capacity: 8, required: 16 })
        );
    }

    #[test]
    fn contiguous_ref_matches_queued_view() {
        let blocks = [pattern(3), pattern(4)];
        let header = Message::new(
            MessageId::from_name("immediate"),
            MessageFlags::NONE,
            TaskId::new(50),
            TaskId::new(51),
            Cell::from_u32(7),
            2,
        );
        let msg = MessageRef::contiguous(header, &blocks);
        assert!(msg.is_contiguous());
        assert_eq!(msg.blocks().count(), 2);
        assert_eq!(*msg.block(1), pattern(4));
    }
}
