//! System V shared-memory segment lifecycle.
//!
//! One process is the *creator* — the one whose pid matches the segment's
//! OS-reported creating pid — and is responsible for zeroing the segment at
//! open and removing it at teardown, after every other attacher has detached.
//! Attachers merely map and unmap.
//!
//! A heap-backed variant exists so the allocator and handshake protocol can
//! be exercised in-process (two endpoints over one buffer) without touching
//! the OS namespace.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use crate::layout::{self, LayoutError};

/// How long an attacher waits after mapping for the creator to finish
/// zeroing, before first touching the directory.
const SETTLE_WAIT: Duration = Duration::from_millis(200);

/// A mapped shared-memory segment.
pub struct Segment {
    base: NonNull<u8>,
    size: usize,
    key: i32,
    creator: bool,
    backing: Backing,
}

enum Backing {
    SysV { shmid: libc::c_int },
    Heap { buf: Arc<HeapBuffer> },
}

// SAFETY: Segment hands out raw pointers into shared memory; all access to
// the shared bytes is synchronized by the directory lock and the slot
// handshake protocol, never by Rust references held across both processes.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Attach to (or create) the segment identified by `key`.
    ///
    /// The creator zeroes the whole segment; any other attacher sleeps
    /// briefly so it never observes a half-zeroed directory.
    pub fn open(key: i32, size: usize) -> Result<Self, SegmentError> {
        if size < layout::MIN_SEGMENT_SIZE {
            return Err(SegmentError::Layout(LayoutError::SegmentTooSmall {
                required: layout::MIN_SEGMENT_SIZE,
                found: size,
            }));
        }

        // SAFETY: plain syscall, no memory handed over.
        let shmid = unsafe { libc::shmget(key as libc::key_t, size, 0o666 | libc::IPC_CREAT) };
        if shmid < 0 {
            return Err(SegmentError::Create(io::Error::last_os_error()));
        }

        // SAFETY: shmid is valid (shmget succeeded); the kernel picks the address.
        let base = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if base == usize::MAX as *mut libc::c_void {
            return Err(SegmentError::Attach(io::Error::last_os_error()));
        }
        let base = NonNull::new(base as *mut u8).expect("shmat returned null");

        let stat = stat(shmid)?;
        // SAFETY: getpid never fails.
        let creator = stat.shm_cpid == unsafe { libc::getpid() };

        if creator {
            // SAFETY: base..base+size is our freshly attached mapping.
            unsafe { std::ptr::write_bytes(base.as_ptr(), 0, size) };
        } else {
            std::thread::sleep(SETTLE_WAIT);
        }

        tracing::info!(key, size, creator, "shared segment attached");

        Ok(Self {
            base,
            size,
            key,
            creator,
            backing: Backing::SysV { shmid },
        })
    }

    /// Create two endpoints over one zeroed heap buffer, for in-process
    /// testing of the two-party protocol. The first endpoint plays the
    /// creator role.
    pub fn heap_pair(size: usize) -> (Self, Self) {
        assert!(size >= layout::MIN_SEGMENT_SIZE, "heap segment too small");
        let buf = Arc::new(HeapBuffer::zeroed(size));
        let make = |creator: bool, buf: Arc<HeapBuffer>| Segment {
            base: buf.ptr,
            size,
            key: 0,
            creator,
            backing: Backing::Heap { buf },
        };
        (make(true, buf.clone()), make(false, buf))
    }

    /// Base address of the mapping.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Segment size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Key this segment was opened with (0 for heap-backed pairs).
    #[inline]
    pub fn key(&self) -> i32 {
        self.key
    }

    /// Whether this process created the segment.
    #[inline]
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Number of processes currently attached, as reported by the OS.
    /// For heap-backed segments, the number of live endpoints.
    pub fn attach_count(&self) -> Result<u64, SegmentError> {
        match &self.backing {
            Backing::SysV { shmid } => Ok(stat(*shmid)?.shm_nattch as u64),
            Backing::Heap { buf } => Ok(Arc::strong_count(buf) as u64),
        }
    }

    /// Remove the segment from the OS namespace. Creator-only by convention;
    /// callers go through `ShmPool::teardown`, which polls the attach count
    /// down to one first.
    pub(crate) fn remove(&self) -> Result<(), SegmentError> {
        match &self.backing {
            Backing::SysV { shmid } => {
                // SAFETY: plain syscall.
                let rc = unsafe { libc::shmctl(*shmid, libc::IPC_RMID, std::ptr::null_mut()) };
                if rc < 0 {
                    return Err(SegmentError::Remove(io::Error::last_os_error()));
                }
                tracing::info!(key = self.key, "shared segment removed");
                Ok(())
            }
            Backing::Heap { .. } => Ok(()),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Backing::SysV { .. } = self.backing {
            // SAFETY: base is the address returned by shmat for this mapping.
            let rc = unsafe { libc::shmdt(self.base.as_ptr() as *const libc::c_void) };
            if rc < 0 {
                tracing::warn!(
                    key = self.key,
                    "shmdt failed: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }
}

fn stat(shmid: libc::c_int) -> Result<libc::shmid_ds, SegmentError> {
    // SAFETY: zeroed shmid_ds is a valid out-param for IPC_STAT.
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) };
    if rc < 0 {
        return Err(SegmentError::Stat(io::Error::last_os_error()));
    }
    Ok(ds)
}

/// An owned, zero-initialized, 8-byte-aligned buffer standing in for an OS
/// segment in tests and in-process pairs.
struct HeapBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer is plain bytes; synchronization is the protocol's job,
// exactly as for the OS-backed mapping.
unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl HeapBuffer {
    fn zeroed(size: usize) -> Self {
        let layout = Layout::from_size_align(size, layout::REGION_ALIGN)
            .expect("invalid heap segment layout");
        // SAFETY: layout has non-zero size (checked by caller against
        // MIN_SEGMENT_SIZE).
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).expect("heap segment allocation failed");
        Self { ptr, layout }
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated with the same layout in `zeroed`.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from segment lifecycle operations.
#[derive(Debug)]
pub enum SegmentError {
    /// `shmget` failed (permissions, ENOMEM, invalid size).
    Create(io::Error),
    /// `shmat` failed.
    Attach(io::Error),
    /// `shmctl(IPC_STAT)` failed.
    Stat(io::Error),
    /// `shmctl(IPC_RMID)` failed.
    Remove(io::Error),
    /// The configured size cannot hold the directory layout.
    Layout(LayoutError),
    /// Teardown requested while other handles into the pool are still alive.
    HandlesOutstanding,
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create(e) => write!(f, "cannot create shared segment: {}", e),
            Self::Attach(e) => write!(f, "cannot attach shared segment: {}", e),
            Self::Stat(e) => write!(f, "cannot stat shared segment: {}", e),
            Self::Remove(e) => write!(f, "cannot remove shared segment: {}", e),
            Self::Layout(e) => write!(f, "{}", e),
            Self::HandlesOutstanding => {
                write!(f, "teardown refused: pool handles still outstanding")
            }
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<LayoutError> for SegmentError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}
