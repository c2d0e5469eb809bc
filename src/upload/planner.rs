//! Chunk planning
//!
//! Splits `[0, size)` into consecutive ranges of `chunk_size` bytes; the last
//! range holds the remainder. Planning is a pure function of its inputs, so a
//! retried task simply plans again.

/// One byte range of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

impl ChunkSpec {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// `ceil(size / chunk_size)`; zero for an empty file or a zero chunk size.
pub fn total_chunks(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// The chunk at `index`, or `None` past the end
pub fn chunk_at(size: u64, chunk_size: u64, index: u64) -> Option<ChunkSpec> {
    if index >= total_chunks(size, chunk_size) {
        return None;
    }
    let offset = index * chunk_size;
    Some(ChunkSpec {
        index,
        offset,
        len: chunk_size.min(size - offset),
    })
}

/// All chunks of a file, in index order
pub fn plan(size: u64, chunk_size: u64) -> Vec<ChunkSpec> {
    (0..total_chunks(size, chunk_size))
        .filter_map(|index| chunk_at(size, chunk_size, index))
        .collect()
}
