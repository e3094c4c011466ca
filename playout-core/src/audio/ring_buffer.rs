//! Transfer ring buffer between the feed path and the real-time sink.
//!
//! Fixed-capacity circular store of interleaved f32 frames. Exactly one
//! writer (the feed controller) and one reader (the sink callback) touch it.
//! The storage sits behind a short mutex; the reader only ever `try_lock`s
//! it, so the audio callback never waits on the producer. Fill level and
//! diagnostic counters are mirrored in atomics for lock-free observation.
//!
//! Overflow policy is "evict oldest": a write never blocks and never fails,
//! it advances the read position over the oldest frames instead.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Upper bound on ring storage (64 MB of f32 samples).
const MAX_CAPACITY_SAMPLES: usize = 64 * 1024 * 1024 / std::mem::size_of::<f32>();

/// Index state guarded by the storage lock. Positions are frame indices,
/// already wrapped with `mask`.
struct RingStorage {
    data: Box<[f32]>,
    write_pos: usize,
    read_pos: usize,
    /// Frames currently holding valid data.
    available: usize,
    generation: u64,
}

/// Single-producer / single-consumer ring of interleaved samples.
pub struct TransferRing {
    storage: Mutex<RingStorage>,
    channels: usize,
    capacity_frames: usize,
    /// `capacity_frames - 1`; capacity is a power of two.
    mask: usize,
    /// Mirror of `RingStorage::available`, in samples.
    available: AtomicUsize,
    /// Mirror of `RingStorage::generation`.
    generation: AtomicU64,
    /// Frames evicted by overflowing writes.
    overflow_count: AtomicU64,
    /// Reads that could not be fully served.
    underrun_count: AtomicU64,
    /// Reads that found the writer holding the lock.
    contended_reads: AtomicU64,
}

impl TransferRing {
    /// Create a ring holding at least `requested_samples` samples.
    ///
    /// The frame count is rounded up to the next power of two, so the real
    /// capacity (see [`capacity`](Self::capacity)) may be larger.
    pub fn new(requested_samples: usize, channels: usize) -> anyhow::Result<Self> {
        if channels == 0 {
            anyhow::bail!("Ring buffer needs at least one channel");
        }
        if requested_samples == 0 {
            anyhow::bail!("Ring buffer capacity must be greater than 0");
        }

        let capacity_frames = requested_samples.div_ceil(channels).next_power_of_two();
        let capacity = capacity_frames * channels;
        if capacity > MAX_CAPACITY_SAMPLES {
            anyhow::bail!(
                "Ring buffer capacity {capacity} exceeds maximum safe size {MAX_CAPACITY_SAMPLES}"
            );
        }

        Ok(Self {
            storage: Mutex::new(RingStorage {
                data: vec![0.0; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                available: 0,
                generation: 0,
            }),
            channels,
            capacity_frames,
            mask: capacity_frames - 1,
            available: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            overflow_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            contended_reads: AtomicU64::new(0),
        })
    }

    /// Capacity in samples (frames × channels).
    pub fn capacity(&self) -> usize {
        self.capacity_frames * self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples currently buffered. Lock-free.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Fill level in `0.0..=1.0`.
    pub fn fill_ratio(&self) -> f32 {
        self.available() as f32 / self.capacity() as f32
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Ticks served as silence because the writer held the lock.
    pub fn contended_reads(&self) -> u64 {
        self.contended_reads.load(Ordering::Relaxed)
    }

    /// Incremented by every [`clear`](Self::clear). Writers tagged with an
    /// older generation are rejected by [`write_for`](Self::write_for).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Write interleaved samples, evicting the oldest frames on overflow.
    ///
    /// A trailing partial frame is dropped. Returns the number of samples
    /// accepted (always whole frames).
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut storage = self.lock_storage();
        self.write_locked(&mut storage, samples)
    }

    /// Like [`write`](Self::write), but only if no `clear` happened since
    /// `generation` was observed. Returns `None` for a stale writer.
    pub fn write_for(&self, generation: u64, samples: &[f32]) -> Option<usize> {
        let mut storage = self.lock_storage();
        if storage.generation != generation {
            return None;
        }
        Some(self.write_locked(&mut storage, samples))
    }

    /// Run `f` under the storage lock if no `clear` happened since
    /// `generation` was observed. Returns whether `f` ran.
    pub fn if_generation(&self, generation: u64, f: impl FnOnce()) -> bool {
        let storage = self.lock_storage();
        if storage.generation != generation {
            return false;
        }
        f();
        true
    }

    fn write_locked(&self, storage: &mut RingStorage, samples: &[f32]) -> usize {
        let ch = self.channels;
        let frames = samples.len() / ch;
        if frames == 0 {
            return 0;
        }

        let evicted = (storage.available + frames).saturating_sub(self.capacity_frames);

        // Frames that would be overwritten by this same write are skipped.
        let skip = frames.saturating_sub(self.capacity_frames);
        let incoming = frames - skip;
        let src = &samples[skip * ch..frames * ch];

        let drop_existing = (storage.available + incoming).saturating_sub(self.capacity_frames);
        if drop_existing > 0 {
            storage.read_pos = (storage.read_pos + drop_existing) & self.mask;
            storage.available -= drop_existing;
        }

        let start = storage.write_pos * ch;
        let capacity = self.capacity();
        if start + src.len() <= capacity {
            storage.data[start..start + src.len()].copy_from_slice(src);
        } else {
            let first = capacity - start;
            storage.data[start..].copy_from_slice(&src[..first]);
            storage.data[..src.len() - first].copy_from_slice(&src[first..]);
        }

        storage.write_pos = (storage.write_pos + incoming) & self.mask;
        storage.available += incoming;
        self.available
            .store(storage.available * ch, Ordering::Release);

        if evicted > 0 {
            self.overflow_count
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }

        frames * ch
    }

    /// Drain up to `dest.len() / channels` frames into `dest`.
    ///
    /// Any shortfall is zero-filled and counted as one underrun. If the
    /// writer currently holds the storage lock the whole tick is silence
    /// and counted as a contended read; it is an underrun as well only if
    /// the buffered samples would not have covered the request. This call
    /// never waits. Returns the number of frames delivered.
    pub fn read(&self, dest: &mut [f32]) -> usize {
        let ch = self.channels;
        let wanted = dest.len() / ch;

        let mut storage = match self.storage.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                dest.fill(0.0);
                if wanted > 0 {
                    self.contended_reads.fetch_add(1, Ordering::Relaxed);
                    if self.available() < wanted * ch {
                        self.underrun_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                return 0;
            }
        };

        let frames = wanted.min(storage.available);
        if frames > 0 {
            let start = storage.read_pos * ch;
            let len = frames * ch;
            let capacity = self.capacity();
            if start + len <= capacity {
                dest[..len].copy_from_slice(&storage.data[start..start + len]);
            } else {
                let first = capacity - start;
                dest[..first].copy_from_slice(&storage.data[start..]);
                dest[first..len].copy_from_slice(&storage.data[..len - first]);
            }
            storage.read_pos = (storage.read_pos + frames) & self.mask;
            storage.available -= frames;
            self.available
                .store(storage.available * ch, Ordering::Release);
        }
        drop(storage);

        dest[frames * ch..].fill(0.0);
        if frames < wanted {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }

        frames
    }

    /// Discard all buffered samples and start a new generation.
    ///
    /// Waits for an in-progress read to finish (the reader holds the lock
    /// only for one copy), so it is safe to call from the control thread.
    pub fn clear(&self) {
        let mut storage = self.lock_storage();
        storage.write_pos = 0;
        storage.read_pos = 0;
        storage.available = 0;
        storage.generation += 1;
        self.available.store(0, Ordering::Release);
        self.generation
            .store(storage.generation, Ordering::Release);
    }

    fn lock_storage(&self) -> MutexGuard<'_, RingStorage> {
        self.storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TransferRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRing")
            .field("capacity", &self.capacity())
            .field("channels", &self.channels)
            .field("available", &self.available())
            .field("overflow_count", &self.overflow_count())
            .field("underrun_count", &self.underrun_count())
            .field("contended_reads", &self.contended_reads())
            .finish()
    }
}
