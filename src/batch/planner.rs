//! Splits an ordered working set into fixed-size chunks.

use crate::error::{Error, Result};
use crate::model::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    chunk_size: usize,
}

impl ChunkPlanner {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidChunkSize(chunk_size));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// How many chunks `len` items produce.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Lazily yield chunks of at most `chunk_size` items, preserving order.
    pub fn plan<T>(&self, items: Vec<T>) -> Chunks<T> {
        Chunks {
            items: items.into_iter(),
            chunk_size: self.chunk_size,
            next_index: 0,
        }
    }
}

/// Iterator returned by [`ChunkPlanner::plan`].
pub struct Chunks<T> {
    items: std::vec::IntoIter<T>,
    chunk_size: usize,
    next_index: usize,
}

impl<T> Iterator for Chunks<T> {
    type Item = Chunk<T>;

    fn next(&mut self) -> Option<Chunk<T>> {
        let items: Vec<T> = self.items.by_ref().take(self.chunk_size).collect();
        if items.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(Chunk { index, items })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.items.len().div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for Chunks<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            ChunkPlanner::new(0),
            Err(Error::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let planner = ChunkPlanner::new(50).unwrap();
        assert_eq!(planner.plan(Vec::<u32>::new()).count(), 0);
        assert_eq!(planner.chunk_count(0), 0);
    }

    #[test]
    fn small_input_yields_one_chunk() {
        let planner = ChunkPlanner::new(50).unwrap();
        let chunks: Vec<_> = planner.plan(vec![1, 2, 3]).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].items, vec![1, 2, 3]);
    }

    #[test]
    fn chunks_concatenate_back_to_input() {
        for size in [1, 3, 7, 50] {
            let planner = ChunkPlanner::new(size).unwrap();
            let input: Vec<u32> = (0..123).collect();
            let chunks: Vec<_> = planner.plan(input.clone()).collect();
            assert_eq!(chunks.len(), planner.chunk_count(input.len()));
            assert!(chunks.iter().all(|c| c.len() <= size && !c.is_empty()));
            assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i));
            let joined: Vec<u32> = chunks.into_iter().flat_map(|c| c.items).collect();
            assert_eq!(joined, input);
        }
    }
}
