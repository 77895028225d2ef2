use std::sync::{Condvar, Mutex};
use std::time::Duration;

use redolink_common::{RedoError, Result, Shutdown, Xid, CHUNK_SIZE};
use tracing::debug;

/// One arena page. Always exactly `CHUNK_SIZE` bytes.
pub type Chunk = Box<[u8]>;

#[derive(Clone, Copy, Debug)]
pub struct ArenaConfig {
    /// `memory-min-mb`: chunks allocated up front.
    pub min_mb: usize,
    /// `memory-max-mb`: hard ceiling.
    pub max_mb: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self { min_mb: 32, max_mb: 1024 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub allocated: usize,
    pub free: usize,
}

struct ArenaState {
    free: Vec<Chunk>,
    allocated: usize,
    writer_active: bool,
}

/// Process-wide fixed-size page allocator with a free list. Grows one chunk
/// at a time from min to max; at the ceiling, allocation blocks while the
/// writer is still draining (its commits return chunks) and fails with
/// `MemoryExhausted` otherwise. The mutex is held only for alloc/free.
pub struct Arena {
    state: Mutex<ArenaState>,
    released: Condvar,
    max_chunks: usize,
    shutdown: Shutdown,
}

impl Arena {
    pub fn new(config: ArenaConfig, shutdown: Shutdown) -> Result<Arena> {
        if config.min_mb == 0 || config.min_mb > config.max_mb {
            return Err(RedoError::Configuration(format!(
                "memory-min-mb {} must be within 1..=memory-max-mb {}",
                config.min_mb, config.max_mb
            )));
        }
        let chunk_mb = CHUNK_SIZE / (1024 * 1024);
        let min_chunks = config.min_mb / chunk_mb;
        let max_chunks = config.max_mb / chunk_mb;

        let free: Vec<Chunk> = (0..min_chunks).map(|_| new_chunk()).collect();
        Ok(Arena {
            state: Mutex::new(ArenaState {
                allocated: free.len(),
                free,
                writer_active: false,
            }),
            released: Condvar::new(),
            max_chunks,
            shutdown,
        })
    }

    /// Take a chunk, growing by one when the free list is empty and the
    /// ceiling is not reached. `xid` identifies the transaction for the
    /// exhaustion hint.
    pub fn alloc(&self, xid: Xid) -> Result<Chunk> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(chunk) = state.free.pop() {
                return Ok(chunk);
            }
            if state.allocated < self.max_chunks {
                state.allocated += 1;
                debug!(allocated = state.allocated, max = self.max_chunks, "arena grew");
                return Ok(new_chunk());
            }
            if !state.writer_active {
                return Err(RedoError::MemoryExhausted { xid });
            }
            // the writer is draining commits; wait for a release
            let (next, timeout) = self
                .released
                .wait_timeout(state, Duration::from_millis(100))
                .unwrap();
            state = next;
            if timeout.timed_out() && self.shutdown.is_requested() {
                return Err(RedoError::MemoryExhausted { xid });
            }
        }
    }

    /// Return a chunk to the free list.
    pub fn free(&self, mut chunk: Chunk) {
        chunk.fill(0);
        let mut state = self.state.lock().unwrap();
        state.free.push(chunk);
        drop(state);
        self.released.notify_one();
    }

    /// Marks whether a writer task is draining the emitter queue; decides
    /// between blocking and failing on exhaustion.
    pub fn set_writer_active(&self, active: bool) {
        let mut state = self.state.lock().unwrap();
        state.writer_active = active;
        drop(state);
        self.released.notify_all();
    }

    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock().unwrap();
        ArenaStats {
            allocated: state.allocated,
            free: state.free.len(),
        }
    }
}

fn new_chunk() -> Chunk {
    vec![0u8; CHUNK_SIZE].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(min_mb: usize, max_mb: usize) -> Arena {
        Arena::new(ArenaConfig { min_mb, max_mb }, Shutdown::new()).unwrap()
    }

    #[test]
    fn test_preallocates_minimum() {
        let arena = arena(2, 4);
        assert_eq!(arena.stats(), ArenaStats { allocated: 2, free: 2 });
    }

    #[test]
    fn test_grows_one_chunk_at_a_time() {
        let arena = arena(1, 3);
        let a = arena.alloc(Xid::default()).unwrap();
        assert_eq!(arena.stats().allocated, 1);
        let b = arena.alloc(Xid::default()).unwrap();
        assert_eq!(arena.stats().allocated, 2);
        arena.free(a);
        arena.free(b);
        assert_eq!(arena.stats(), ArenaStats { allocated: 2, free: 2 });
    }

    #[test]
    fn test_exhaustion_without_writer_fails_fast() {
        let arena = arena(1, 1);
        let xid = Xid::new(1, 2, 3);
        let held = arena.alloc(xid).unwrap();
        match arena.alloc(xid) {
            Err(RedoError::MemoryExhausted { xid: failed }) => assert_eq!(failed, xid),
            other => panic!("expected MemoryExhausted, got {:?}", other.map(|_| ())),
        }
        arena.free(held);
        assert!(arena.alloc(xid).is_ok());
    }

    #[test]
    fn test_exhaustion_with_writer_blocks_until_release() {
        use std::sync::Arc;
        let arena = Arc::new(arena(1, 1));
        arena.set_writer_active(true);
        let held = arena.alloc(Xid::default()).unwrap();

        let release_side = Arc::clone(&arena);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            release_side.free(held);
        });

        // blocks until the writer-side free lands
        let chunk = arena.alloc(Xid::default()).unwrap();
        handle.join().unwrap();
        assert_eq!(chunk.len(), CHUNK_SIZE);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(Arena::new(ArenaConfig { min_mb: 0, max_mb: 4 }, Shutdown::new()).is_err());
        assert!(Arena::new(ArenaConfig { min_mb: 8, max_mb: 4 }, Shutdown::new()).is_err());
    }

    #[test]
    fn test_freed_chunks_are_zeroed() {
        let arena = arena(1, 1);
        let mut chunk = arena.alloc(Xid::default()).unwrap();
        chunk[0] = 0xAB;
        arena.free(chunk);
        let again = arena.alloc(Xid::default()).unwrap();
        assert_eq!(again[0], 0);
    }
}
