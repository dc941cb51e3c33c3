//! Typed views over registered arena regions.
//!
//! All typed access to shared bytes funnels through this module: a
//! [`RawRegion`] is the handle (pool + offset + size) produced by
//! registration, and [`RawRegion::cast`] is the single audited conversion to
//! a typed [`Region<T>`]. Nothing else in the crate reinterprets shared
//! memory.

use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::{AnyBitPattern, NoUninit};

use crate::fatal;
use crate::layout::REGION_ALIGN;
use crate::pool::ShmPool;

/// Marker for types that may live in a shared region: fixed layout, any bit
/// pattern valid, no uninitialized bytes, no pointers. Derive
/// `bytemuck::AnyBitPattern` and `bytemuck::NoUninit` on `#[repr(C)]`
/// records to satisfy it; both processes must compile the identical record.
pub trait Payload: AnyBitPattern + NoUninit {}

impl<T: AnyBitPattern + NoUninit> Payload for T {}

/// A registered span of the shared segment.
///
/// Holds the pool alive; cheap to clone. The handle itself is always valid —
/// whether the *bytes* may currently be read or written is governed by the
/// slot handshake (or, for raw regions, by caller convention).
#[derive(Clone)]
pub struct RawRegion {
    pool: Arc<ShmPool>,
    offset: usize,
    len: usize,
}

impl RawRegion {
    pub(crate) fn new(pool: Arc<ShmPool>, offset: usize, len: usize) -> Self {
        debug_assert!(offset % REGION_ALIGN == 0);
        debug_assert!(offset + len <= pool.segment_size());
        Self { pool, offset, len }
    }

    /// Region length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this region from the segment base.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Raw pointer to the first byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: offset + len were validated against the segment at
        // construction and the pool (hence the mapping) is held alive.
        unsafe { self.pool.base().add(self.offset) }
    }

    /// Borrow the pool this region belongs to.
    #[inline]
    pub fn pool(&self) -> &Arc<ShmPool> {
        &self.pool
    }

    /// A sub-span of this region.
    pub(crate) fn subregion(&self, offset: usize, len: usize) -> RawRegion {
        assert!(offset + len <= self.len, "subregion out of bounds");
        RawRegion::new(self.pool.clone(), self.offset + offset, len)
    }

    /// View the bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold whatever turn or convention makes the peer not
    /// write these bytes concurrently.
    #[inline]
    pub unsafe fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Convert to a typed view. This is the audited path: it checks once
    /// that `T` fits the region and that the region's guaranteed alignment
    /// suffices for `T`. A mismatch means the two sides disagree about the
    /// schema, which is fatal.
    pub fn cast<T: Payload>(&self) -> Region<T> {
        if core::mem::size_of::<T>() > self.len {
            fatal!(
                "region at offset {} is {} bytes, payload type needs {}",
                self.offset,
                self.len,
                core::mem::size_of::<T>()
            );
        }
        if core::mem::align_of::<T>() > REGION_ALIGN {
            fatal!(
                "payload type alignment {} exceeds region alignment {}",
                core::mem::align_of::<T>(),
                REGION_ALIGN
            );
        }
        Region {
            raw: self.clone(),
            _marker: PhantomData,
        }
    }
}

/// A typed view over a [`RawRegion`], validated once at construction.
pub struct Region<T> {
    raw: RawRegion,
    _marker: PhantomData<T>,
}

impl<T: Payload> Region<T> {
    /// Typed pointer to the record.
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.raw.as_ptr() as *mut T
    }

    /// Read the record out by value.
    ///
    /// # Safety
    ///
    /// The caller must hold the turn (or equivalent convention) so the peer
    /// is not writing concurrently.
    #[inline]
    pub unsafe fn read(&self) -> T {
        // SAFETY: pointer validity and alignment established at cast time;
        // exclusion is the caller's contract.
        unsafe { self.as_ptr().read() }
    }

    /// Write the record by value.
    ///
    /// # Safety
    ///
    /// Same contract as [`Region::read`].
    #[inline]
    pub unsafe fn write(&self, value: T) {
        unsafe { self.as_ptr().write(value) };
    }

    /// The underlying raw region.
    #[inline]
    pub fn raw(&self) -> &RawRegion {
        &self.raw
    }
}

impl<T> Clone for Region<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}
