//! Hub command protocol.

pub mod chunk;
pub mod command;

// Re-export common types
pub use chunk::{CHUNK_SIZE, Chunk, Chunks, chunk_count};
pub use command::{Command, HEADER_LEN, Opcode};
