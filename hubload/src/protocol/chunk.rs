//! Splitting a program image into RAM-write sized chunks.

/// Maximum payload carried by one `WriteUserRam` frame.
pub const CHUNK_SIZE: usize = 100;

/// A contiguous slice of the program together with its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Byte position of `data` within the program.
    pub offset: usize,
    /// Chunk payload (at most [`CHUNK_SIZE`] bytes).
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// Offset just past the end of this chunk.
    pub fn end(&self) -> usize {
        self.offset + self.data.len()
    }
}

/// Iterator over the chunks of a program, in ascending offset order.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    program: &'a [u8],
    offset: usize,
}

impl<'a> Chunks<'a> {
    /// Chunk `program` into [`CHUNK_SIZE`] slices.
    pub fn new(program: &'a [u8]) -> Self {
        Self { program, offset: 0 }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.program.len() {
            return None;
        }

        let end = (self.offset + CHUNK_SIZE).min(self.program.len());
        let chunk = Chunk {
            offset: self.offset,
            data: &self.program[self.offset..end],
        };
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = chunk_count(self.program.len() - self.offset);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Number of chunks a program of `len` bytes is split into.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_empty_program_has_no_chunks() {
        assert_eq!(Chunks::new(&[]).count(), 0);
        assert_eq!(chunk_count(0), 0);
    }

    #[test]
    fn test_250_bytes() {
        let data = program(250);
        let chunks: Vec<_> = Chunks::new(&data).collect();

        let offsets: Vec<_> = chunks.iter().map(|c| c.offset).collect();
        let lens: Vec<_> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(offsets, vec![0, 100, 200]);
        assert_eq!(lens, vec![100, 100, 50]);
    }

    #[test]
    fn test_exact_multiple_ends_with_full_chunk() {
        let data = program(300);
        let chunks: Vec<_> = Chunks::new(&data).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.last().map(|c| c.data.len()), Some(CHUNK_SIZE));
    }

    #[test]
    fn test_chunks_reassemble_program() {
        for len in [1, 99, 100, 101, 199, 1000, 1234] {
            let data = program(len);
            let chunks = Chunks::new(&data);
            assert_eq!(chunks.len(), chunk_count(len));

            let mut rebuilt = Vec::with_capacity(len);
            let mut expected_offset = 0;
            for chunk in chunks {
                assert_eq!(chunk.offset, expected_offset, "gap or overlap at len {len}");
                assert!(chunk.data.len() <= CHUNK_SIZE);
                rebuilt.extend_from_slice(chunk.data);
                expected_offset = chunk.end();
            }
            assert_eq!(rebuilt, data);
        }
    }

    #[test]
    fn test_last_chunk_length() {
        let data = program(1234);
        let last = Chunks::new(&data).last().map(|c| c.data.len());
        assert_eq!(last, Some(1234 % CHUNK_SIZE));
    }
}
