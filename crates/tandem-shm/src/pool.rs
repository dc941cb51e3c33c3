//! The shared-memory arena: bump allocator plus self-describing directory.
//!
//! Payload regions are bump-allocated upward from the segment base; 12-byte
//! control blocks describing them grow downward from the tail, anchored by
//! the [`DirectoryHeader`]. Each attached process keeps a local id → region
//! cache and lazily resyncs it whenever the shared directory version has
//! advanced, walking the newly appended blocks tail-inward until the
//! terminal marker.
//!
//! The directory spinlock (a single `0x0000 ↔ 0xFFFF` CAS flag) guards
//! metadata only — id, size, offset, version. It never guards payload bytes;
//! those belong to the slot handshake.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::fatal;
use crate::layout::{
    self, ControlBlock, DirectoryHeader, DIR_LOCK_FREE, DIR_LOCK_HELD, MARK_FOLLOW, MARK_TERMINAL,
    MAX_ID, REGION_ALIGN, SLOT_HEADER_SIZE,
};
use crate::region::RawRegion;
use crate::segment::{Segment, SegmentError};
use crate::slot::Slot;

/// Segment identity and size, supplied as process configuration. Both
/// processes must use identical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Numeric System V key.
    pub key: i32,
    /// Total segment size in bytes.
    pub size: u32,
}

/// Environment variable naming the segment key.
pub const ENV_KEY: &str = "TANDEM_SHM_KEY";
/// Environment variable naming the segment size.
pub const ENV_SIZE: &str = "TANDEM_SHM_SIZE";

impl PoolConfig {
    pub const DEFAULT_KEY: i32 = 1234;
    pub const DEFAULT_SIZE: u32 = 4096;

    pub fn new(key: i32, size: u32) -> Self {
        Self { key, size }
    }

    /// Read `TANDEM_SHM_KEY` / `TANDEM_SHM_SIZE`, falling back to the
    /// defaults. Unparsable values are fatal: a half-applied configuration
    /// would silently attach to the wrong segment.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> T {
            match std::env::var(name) {
                Ok(raw) => match raw.parse() {
                    Ok(v) => v,
                    Err(_) => fatal!("invalid {}: {:?}", name, raw),
                },
                Err(_) => default,
            }
        }
        Self {
            key: var(ENV_KEY, Self::DEFAULT_KEY),
            size: var(ENV_SIZE, Self::DEFAULT_SIZE),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY, Self::DEFAULT_SIZE)
    }
}

#[derive(Clone, Copy)]
struct CachedBlock {
    offset: u32,
    size: u32,
}

struct DirCache {
    /// How many control blocks this process has walked so far.
    version: u32,
    blocks: HashMap<u16, CachedBlock>,
}

/// The arena over one shared segment. Construct once per process and pass
/// the `Arc` handle to every channel.
pub struct ShmPool {
    segment: Segment,
    /// Offset of the directory header.
    tail: usize,
    cache: Mutex<DirCache>,
}

impl ShmPool {
    /// Attach to (or create) the configured segment and sync the directory.
    pub fn open(config: PoolConfig) -> Result<Arc<Self>, SegmentError> {
        let segment = Segment::open(config.key, config.size as usize)?;
        Ok(Arc::new(Self::from_segment(segment)))
    }

    /// Two pools over one heap buffer, for in-process tests of the
    /// two-party protocol. The first plays the creator role.
    pub fn heap_pair(size: usize) -> (Arc<Self>, Arc<Self>) {
        let (a, b) = Segment::heap_pair(size);
        (
            Arc::new(Self::from_segment(a)),
            Arc::new(Self::from_segment(b)),
        )
    }

    fn from_segment(segment: Segment) -> Self {
        let tail = layout::directory_tail(segment.size());
        let pool = Self {
            segment,
            tail,
            cache: Mutex::new(DirCache {
                version: 0,
                blocks: HashMap::new(),
            }),
        };
        // Pick up whatever the peer registered before we attached.
        let mut cache = pool.cache.lock();
        pool.lock_directory();
        pool.resync_locked(&mut cache);
        pool.unlock_directory();
        drop(cache);
        pool
    }

    /// Register a raw region of `size` bytes under `id`, or return the
    /// already-registered region if `id` is known — to this process or to
    /// the peer. A repeat registration with a different size is fatal, as is
    /// exhausting the space between the bump pointer and the directory.
    pub fn register(self: &Arc<Self>, id: u16, size: u32) -> RawRegion {
        if id >= MAX_ID {
            fatal!("register: id {} out of range (max {})", id, MAX_ID - 1);
        }
        if size == 0 {
            fatal!("register: id {} requested an empty region", id);
        }
        tracing::trace!(id, size, "register");

        let mut cache = self.cache.lock();
        self.lock_directory();
        self.resync_locked(&mut cache);

        if let Some(known) = cache.blocks.get(&id) {
            if known.size != size {
                // The directory lock dies with the process here; the shared
                // state is no longer trustworthy either way.
                fatal!(
                    "register: id {} already registered with size {}, requested {}",
                    id,
                    known.size,
                    size
                );
            }
            let offset = known.offset as usize;
            self.unlock_directory();
            return RawRegion::new(self.clone(), offset, size as usize);
        }

        // Directory lock held: plain ordering suffices for all fields below,
        // the lock release publishes them.
        let header = self.header();
        let version = header.version.load(Ordering::Relaxed);
        let free = header.free_offset.load(Ordering::Relaxed) as usize;
        let advance = layout::align_up(size as usize, REGION_ALIGN);
        let floor = layout::directory_floor(self.tail, version);

        if free + advance > floor {
            fatal!(
                "pool full: id {} needs {} bytes, {} left below the directory",
                id,
                advance,
                floor.saturating_sub(free)
            );
        }

        let block = self.block(version);
        block.continuation.store(MARK_TERMINAL, Ordering::Relaxed);
        block.id.store(id, Ordering::Relaxed);
        block.size.store(size, Ordering::Relaxed);
        block.offset.store(free as u32, Ordering::Relaxed);

        // Link the new block into the walk chain, then publish the count.
        if version == 0 {
            header.continuation.store(MARK_FOLLOW, Ordering::Relaxed);
        } else {
            self.block(version - 1)
                .continuation
                .store(MARK_FOLLOW, Ordering::Relaxed);
        }
        header
            .free_offset
            .store((free + advance) as u32, Ordering::Relaxed);
        header.version.store(version + 1, Ordering::Relaxed);

        cache.blocks.insert(
            id,
            CachedBlock {
                offset: free as u32,
                size,
            },
        );
        cache.version = version + 1;
        self.unlock_directory();

        tracing::debug!(id, size, offset = free, "region registered");
        RawRegion::new(self.clone(), free, size as usize)
    }

    /// Register a slot-bearing region: an 8-byte handshake header followed
    /// by `payload_size` bytes of 8-byte-aligned payload.
    pub fn register_slot(self: &Arc<Self>, id: u16, payload_size: u32) -> Slot {
        let payload = layout::align_up(payload_size as usize, REGION_ALIGN);
        let region = self.register(id, (SLOT_HEADER_SIZE + payload) as u32);
        Slot::new(id, region)
    }

    /// Tear the pool down. Refuses while channels, slots, or regions still
    /// hold the pool. The creator waits for every other attacher to detach,
    /// then removes the segment; attachers just detach.
    pub fn teardown(self: Arc<Self>) -> Result<(), SegmentError> {
        let pool = Arc::into_inner(self).ok_or(SegmentError::HandlesOutstanding)?;
        if pool.segment.is_creator() {
            tracing::info!(key = pool.segment.key(), "waiting for peers to detach");
            while pool.segment.attach_count()? > 1 {
                std::thread::yield_now();
            }
            pool.segment.remove()?;
        }
        Ok(())
    }

    /// Whether this process created the segment.
    #[inline]
    pub fn is_creator(&self) -> bool {
        self.segment.is_creator()
    }

    /// Current attach count, as reported by the OS.
    pub fn attach_count(&self) -> Result<u64, SegmentError> {
        self.segment.attach_count()
    }

    /// Number of directory entries this process has observed.
    pub fn known_regions(&self) -> usize {
        self.cache.lock().blocks.len()
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.segment.base()
    }

    #[inline]
    pub(crate) fn segment_size(&self) -> usize {
        self.segment.size()
    }

    fn header(&self) -> &DirectoryHeader {
        // SAFETY: tail is in bounds and 8-aligned (layout::directory_tail);
        // DirectoryHeader is all-atomics plus padding, any bytes are valid.
        unsafe { &*(self.base().add(self.tail) as *const DirectoryHeader) }
    }

    fn block(&self, index: u32) -> &ControlBlock {
        let offset = layout::control_block_offset(self.tail, index);
        // SAFETY: callers only pass indices at or below the published
        // version, all of which sit between the floor check and the tail.
        unsafe { &*(self.base().add(offset) as *const ControlBlock) }
    }

    fn lock_directory(&self) {
        let lock = &self.header().lock;
        while lock
            .compare_exchange_weak(
                DIR_LOCK_FREE,
                DIR_LOCK_HELD,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock_directory(&self) {
        self.header().lock.store(DIR_LOCK_FREE, Ordering::Release);
    }

    /// Walk control blocks the peer appended since our last look, following
    /// the continuation chain until the terminal marker. Directory lock must
    /// be held.
    fn resync_locked(&self, cache: &mut DirCache) {
        let header = self.header();
        let shared = header.version.load(Ordering::Relaxed);
        if shared == cache.version {
            return;
        }

        let from = cache.version;
        let mut k = cache.version;
        loop {
            let marker = if k == 0 {
                header.continuation.load(Ordering::Relaxed)
            } else {
                self.block(k - 1).continuation.load(Ordering::Relaxed)
            };
            if marker != MARK_FOLLOW {
                break;
            }
            let block = self.block(k);
            let id = block.id.load(Ordering::Relaxed);
            if cache.blocks.contains_key(&id) {
                fatal!("directory sync: id {} appears twice in the shared directory", id);
            }
            cache.blocks.insert(
                id,
                CachedBlock {
                    offset: block.offset.load(Ordering::Relaxed),
                    size: block.size.load(Ordering::Relaxed),
                },
            );
            k += 1;
        }

        debug_assert_eq!(k, shared, "walk chain disagrees with published version");
        cache.version = k;
        tracing::debug!(from, to = k, "directory cache resynced");
    }
}
