//! 16-byte storage unit shared by message headers and payload.

use std::fmt;

use crate::message::Message;

/// A 4-byte payload cell. Interpretation is up to the message author.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Cell(u32);

impl Cell {
    pub const ZERO: Cell = Cell(0);

    pub const fn from_u32(v: u32) -> Self {
        Cell(v)
    }

    pub const fn from_i32(v: i32) -> Self {
        Cell(v as u32)
    }

    pub fn from_f32(v: f32) -> Self {
        Cell(v.to_bits())
    }

    pub const fn from_bool(v: bool) -> Self {
        Cell(v as u32)
    }

    pub const fn u32(self) -> u32 {
        self.0
    }

    pub const fn i32(self) -> i32 {
        self.0 as i32
    }

    pub fn f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub const fn bool(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for Cell {
    fn from(v: u32) -> Self {
        Cell(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::from_i32(v)
    }
}

impl From<f32> for Cell {
    fn from(v: f32) -> Self {
        Cell::from_f32(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::from_bool(v)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:#010x})", self.0)
    }
}

/// Fixed-size ring slot. Either raw payload or, in slot 0 of a message, the
/// packed [`Message`] header.
#[repr(C, align(16))]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Block {
    pub cells: [Cell; 4],
}

const _: () = assert!(std::mem::size_of::<Block>() == 16);

impl Block {
    pub const ZERO: Block = Block { cells: [Cell::ZERO; 4] };

    pub const fn from_u32s(words: [u32; 4]) -> Self {
        Block {
            cells: [
                Cell(words[0]),
                Cell(words[1]),
                Cell(words[2]),
                Cell(words[3]),
            ],
        }
    }

    pub const fn u32s(&self) -> [u32; 4] {
        [
            self.cells[0].0,
            self.cells[1].0,
            self.cells[2].0,
            self.cells[3].0,
        ]
    }

    /// Little-endian, cell by cell.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Block::from_u32s(words)
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (chunk, cell) in bytes.chunks_exact_mut(4).zip(self.cells.iter()) {
            chunk.copy_from_slice(&cell.0.to_le_bytes());
        }
        bytes
    }

    /// View this block as a message header.
    pub fn to_message(&self) -> Message {
        Message::from_words(self.u32s())
    }

    pub fn from_message(message: &Message) -> Self {
        Block::from_u32s(message.to_words())
    }
}

impl From<Message> for Block {
    fn from(message: Message) -> Self {
        Block::from_message(&message)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.u32s();
        write!(f, "Block[{a:08x} {b:08x} {c:08x} {d:08x}]")
    }
}
