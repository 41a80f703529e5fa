//! Index addressed storage that can be shared between one writer and many
//! readers.
//!
//! A [ChunkedArena] is a table of lazily created chunks. A chunk, once
//! created, never moves and is never freed before the arena itself, so a
//! reference to an element stays valid for as long as the arena lives.
//! Elements are expected to consist of atomics: the arena hands out shared
//! references only.
//!
//! Reuse of indexes is not the arena's concern. The owners of the arena
//! (the trie and the adjacency counters) keep their own free lists.

mod once_box;

pub use once_box::OnceBox;

use crate::types::errors::FatalError;

/// The number of elements in one chunk.
pub const CHUNK_SIZE: usize = 64;

//------------ ChunkedArena --------------------------------------------------

pub struct ChunkedArena<T> {
    chunks: Box<[OnceBox<Box<[T]>>]>,
    create: fn() -> T,
}

impl<T> ChunkedArena<T> {
    /// Create an arena that can hold at least `capacity` elements. No chunk
    /// is allocated yet. New elements are created with `create`.
    pub fn new(capacity: usize, create: fn() -> T) -> Self {
        let n_chunks = capacity.div_ceil(CHUNK_SIZE).max(1);
        let chunks = (0..n_chunks)
            .map(|_| OnceBox::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { chunks, create }
    }

    pub fn capacity(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    /// Returns the element at `idx`, if its chunk has been created.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.chunks
            .get(idx / CHUNK_SIZE)?
            .get()?
            .get(idx % CHUNK_SIZE)
    }

    /// Returns the element at `idx`, creating its chunk if needed. Returns
    /// an error if `idx` lies beyond the capacity of the arena.
    pub fn get_or_create(&self, idx: usize) -> Result<&T, FatalError> {
        let Some(slot) = self.chunks.get(idx / CHUNK_SIZE) else {
            log::error!(
                "arena index {} beyond capacity {}",
                idx,
                self.capacity()
            );
            return Err(FatalError);
        };
        let create = self.create;
        let (chunk, created) = slot.get_or_init(|| {
            (0..CHUNK_SIZE)
                .map(|_| create())
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        if created {
            log::trace!("created arena chunk {}", idx / CHUNK_SIZE);
        }
        chunk.get(idx % CHUNK_SIZE).ok_or(FatalError)
    }

    /// Iterate over all elements in created chunks, with their index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.chunks.iter().enumerate().flat_map(|(c, slot)| {
            slot.get()
                .into_iter()
                .flat_map(move |chunk| {
                    chunk
                        .iter()
                        .enumerate()
                        .map(move |(i, t)| (c * CHUNK_SIZE + i, t))
                })
        })
    }
}

impl<T> std::fmt::Debug for ChunkedArena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let created = self.chunks.iter().filter(|c| c.get().is_some()).count();
        f.debug_struct("ChunkedArena")
            .field("chunks", &self.chunks.len())
            .field("created", &created)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn chunks_are_created_lazily() -> Result<(), FatalError> {
        let arena: ChunkedArena<AtomicU32> =
            ChunkedArena::new(200, || AtomicU32::new(7));
        assert_eq!(arena.capacity(), 256);
        assert!(arena.get(130).is_none());

        let e = arena.get_or_create(130)?;
        assert_eq!(e.load(Ordering::Relaxed), 7);
        e.store(9, Ordering::Relaxed);
        assert_eq!(arena.get(130).map(|e| e.load(Ordering::Relaxed)), Some(9));

        // Same chunk, created together.
        assert!(arena.get(128).is_some());
        assert!(arena.get(0).is_none());
        assert_eq!(arena.iter().count(), CHUNK_SIZE);
        assert!(arena.get_or_create(256).is_err());
        Ok(())
    }

    #[test]
    fn concurrent_creation_yields_one_chunk() -> Result<(), FatalError> {
        let arena: std::sync::Arc<ChunkedArena<AtomicU32>> =
            std::sync::Arc::new(ChunkedArena::new(64, || AtomicU32::new(0)));
        let handles = (0..4)
            .map(|i| {
                let arena = arena.clone();
                std::thread::spawn(move || {
                    arena
                        .get_or_create(i)
                        .map(|e| e.fetch_add(1, Ordering::Relaxed))
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            assert!(h.join().map(|r| r.is_ok()).unwrap_or(false));
        }
        let sum: u32 = arena
            .iter()
            .map(|(_, e)| e.load(Ordering::Relaxed))
            .sum();
        assert_eq!(sum, 4);
        Ok(())
    }
}
