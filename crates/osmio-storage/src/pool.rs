use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide pool of erasure block buffers. Encode borrows one buffer
/// per part upload and returns it on every exit path; parts smaller than a
/// block allocate a fresh exact-size buffer instead and bypass the pool.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    capacity: usize,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(buf_size: usize, capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            buf_size,
            capacity,
            misses: AtomicU64::new(0),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn get(&self) -> Vec<u8> {
        if let Some(buf) = self.buffers.lock().expect("buffer pool poisoned").pop() {
            return buf;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        vec![0_u8; self.buf_size]
    }

    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() != self.buf_size {
            return;
        }
        let mut buffers = self.buffers.lock().expect("buffer pool poisoned");
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
