//! Hub command frames.
//!
//! Every command written to the hub's command characteristic starts with a
//! one-byte opcode. Multi-byte integers are little-endian.
//!
//! ```text
//! +--------+--------------------+------------------+
//! | Opcode |   u32 (LE) field   |     Payload      |
//! +--------+--------------------+------------------+
//! | 1 byte |  0 or 4 bytes      |  0..=100 bytes   |
//! +--------+--------------------+------------------+
//!
//! StopUserProgram       0x00
//! StartUserProgram      0x01
//! WriteUserProgramMeta  0x03  size
//! WriteUserRam          0x04  offset  chunk
//! ```

use byteorder::{LittleEndian, WriteBytesExt};
use std::fmt;

/// Size of the opcode plus the 32-bit field carried by meta and RAM writes.
pub const HEADER_LEN: usize = 5;

/// Command opcodes (first byte of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Halt the running user program (0x00).
    StopUserProgram = 0x00,
    /// Run the program currently held in user RAM (0x01).
    StartUserProgram = 0x01,
    /// Declare the size of the program about to be written (0x03).
    WriteUserProgramMeta = 0x03,
    /// Write a slice of the program image into user RAM (0x04).
    WriteUserRam = 0x04,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::StopUserProgram),
            0x01 => Some(Self::StartUserProgram),
            0x03 => Some(Self::WriteUserProgramMeta),
            0x04 => Some(Self::WriteUserRam),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopUserProgram => write!(f, "STOP"),
            Self::StartUserProgram => write!(f, "START"),
            Self::WriteUserProgramMeta => write!(f, "META"),
            Self::WriteUserRam => write!(f, "RAM"),
        }
    }
}

/// A single command destined for the hub.
///
/// Commands borrow their payload and are built fresh for every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Stop whatever user program is running.
    StopUserProgram,
    /// Start the program in user RAM.
    StartUserProgram,
    /// Announce the total program size in bytes.
    WriteUserProgramMeta {
        /// Total program length.
        size: u32,
    },
    /// Write `data` at `offset` within the program image.
    WriteUserRam {
        /// Byte position of `data` within the program.
        offset: u32,
        /// Chunk payload.
        data: &'a [u8],
    },
}

impl Command<'_> {
    /// Opcode of this command.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::StopUserProgram => Opcode::StopUserProgram,
            Self::StartUserProgram => Opcode::StartUserProgram,
            Self::WriteUserProgramMeta { .. } => Opcode::WriteUserProgramMeta,
            Self::WriteUserRam { .. } => Opcode::WriteUserRam,
        }
    }

    /// Length of the encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::StopUserProgram | Self::StartUserProgram => 1,
            Self::WriteUserProgramMeta { .. } => HEADER_LEN,
            Self::WriteUserRam { data, .. } => HEADER_LEN + data.len(),
        }
    }

    /// Serialize the command into its wire representation.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.opcode() as u8);

        match self {
            Self::StopUserProgram | Self::StartUserProgram => {},
            Self::WriteUserProgramMeta { size } => {
                buf.write_u32::<LittleEndian>(*size).unwrap();
            },
            Self::WriteUserRam { offset, data } => {
                buf.write_u32::<LittleEndian>(*offset).unwrap();
                buf.extend_from_slice(data);
            },
        }

        buf
    }
}
