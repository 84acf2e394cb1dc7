//! Shared-memory frame pool
//!
//! One anonymous memory file holds two equally sized buffers. The compositor
//! maps the same file, so everything written through a [`PixelView`] becomes
//! visible once the matching buffer is attached and committed.

use std::ffi::CStr;
use std::fs::File;
use std::ops::Range;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use thiserror::Error;
use tracing::debug;

/// Bytes per pixel (ARGB8888)
pub const BYTES_PER_PIXEL: usize = 4;

/// Name given to the memfd backing the pool
const SHM_NAME: &CStr = c"wlo-shm";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("surface size {width}x{height} has no pixels")]
    EmptySurface { width: u32, height: u32 },

    #[error("pool of {0} bytes does not fit the shared memory protocol")]
    TooLarge(usize),

    #[error("failed to create shared memory file")]
    Create(#[source] std::io::Error),

    #[error("failed to size shared memory file to {size} bytes")]
    Resize {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to map shared memory file")]
    Map(#[source] std::io::Error),
}

/// One of the two buffers in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::First, Slot::Second];

    pub fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    /// The counterpart slot
    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }
}

/// Size of a pool holding two `width`x`height` buffers
pub fn pool_size(width: u32, height: u32) -> usize {
    2 * height as usize * stride_for(width)
}

/// Row stride in bytes for a buffer `width` pixels wide
pub fn stride_for(width: u32) -> usize {
    width as usize * BYTES_PER_PIXEL
}

/// Double-buffer pool backed by a memfd mapping
pub struct FramePool {
    file: File,
    map: NonNull<u8>,
    len: usize,
    width: u32,
    height: u32,
}

impl FramePool {
    /// Create and map a pool for two `width`x`height` buffers.
    ///
    /// Contents are not guaranteed to be zero until [`FramePool::clear`] runs.
    pub fn allocate(width: u32, height: u32) -> Result<Self, PoolError> {
        if width == 0 || height == 0 {
            return Err(PoolError::EmptySurface { width, height });
        }

        let len = pool_size(width, height);
        if i32::try_from(len).is_err() {
            return Err(PoolError::TooLarge(len));
        }

        let raw = unsafe {
            libc::memfd_create(SHM_NAME.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING)
        };
        if raw < 0 {
            return Err(PoolError::Create(std::io::Error::last_os_error()));
        }
        let file = File::from(unsafe { OwnedFd::from_raw_fd(raw) });

        file.set_len(len as u64)
            .map_err(|source| PoolError::Resize { size: len, source })?;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(PoolError::Map(std::io::Error::last_os_error()));
        }
        let map = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| PoolError::Map(std::io::Error::other("mmap returned null")))?;

        debug!("Allocated {}x{} frame pool ({} bytes)", width, height, len);

        Ok(Self {
            file,
            map,
            len,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        stride_for(self.width)
    }

    /// Total size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Bytes occupied by a single slot
    pub fn slot_len(&self) -> usize {
        self.height as usize * self.stride()
    }

    /// Byte range of `slot` within the pool
    pub fn slot_range(&self, slot: Slot) -> Range<usize> {
        let start = slot.index() * self.slot_len();
        start..start + self.slot_len()
    }

    /// Descriptor to hand to the compositor's shm global
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    /// Writable view over one slot
    pub fn slot_view(&mut self, slot: Slot) -> PixelView<'_> {
        let (width, height, stride) = (self.width, self.height, self.stride());
        let range = self.slot_range(slot);
        PixelView::new(&mut self.bytes_mut()[range], width, height, stride)
    }

    /// Raw bytes of one slot
    #[cfg(test)]
    pub fn slot_bytes(&self, slot: Slot) -> &[u8] {
        let range = self.slot_range(slot);
        &self.bytes()[range]
    }

    /// Zero every byte of `slot`
    pub fn clear(&mut self, slot: Slot) {
        let range = self.slot_range(slot);
        self.bytes_mut()[range].fill(0);
    }

    #[cfg(test)]
    fn bytes(&self) -> &[u8] {
        // The mapping lives as long as `self` and is only touched by this thread.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.map.as_ptr(), self.len) }
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map.as_ptr().cast(), self.len);
        }
    }
}

/// Bounds-aware window onto packed 4-byte pixels.
///
/// Writes outside `[0, width) x [0, height)` are dropped.
pub struct PixelView<'a> {
    data: &'a mut [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> PixelView<'a> {
    pub fn new(data: &'a mut [u8], width: u32, height: u32, stride: usize) -> Self {
        assert!(stride >= stride_for(width), "stride shorter than a row");
        assert!(data.len() >= height as usize * stride, "view exceeds backing buffer");
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    #[cfg(test)]
    pub fn height(&self) -> u32 {
        self.height
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width)?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height)?;
        Some(y as usize * self.stride + x as usize * BYTES_PER_PIXEL)
    }

    /// Store a packed pixel, clipping out-of-bounds coordinates.
    /// Returns whether the pixel landed inside the view.
    pub fn put(&mut self, x: i32, y: i32, value: u32) -> bool {
        match self.offset(x, y) {
            Some(at) => {
                self.data[at..at + BYTES_PER_PIXEL].copy_from_slice(&value.to_ne_bytes());
                true
            }
            None => false,
        }
    }

    /// Read a packed pixel back, `None` outside the view
    #[cfg(test)]
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        let at = self.offset(x, y)?;
        let mut bytes = [0u8; BYTES_PER_PIXEL];
        bytes.copy_from_slice(&self.data[at..at + BYTES_PER_PIXEL]);
        Some(u32::from_ne_bytes(bytes))
    }

    #[cfg(test)]
    pub fn fill(&mut self, value: u32) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                self.put(x, y, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_holds_two_slots() {
        assert_eq!(pool_size(200, 200), 2 * 200 * 800);
        assert_eq!(pool_size(1, 3), 24);
        assert_eq!(stride_for(200), 800);
    }

    #[test]
    fn test_slot_ranges_are_adjacent() {
        let pool = FramePool::allocate(200, 200).unwrap();
        assert_eq!(pool.len(), 320_000);
        assert_eq!(pool.slot_range(Slot::First), 0..160_000);
        assert_eq!(pool.slot_range(Slot::Second), 160_000..320_000);
    }

    #[test]
    fn test_empty_surface_rejected() {
        assert!(matches!(
            FramePool::allocate(0, 10),
            Err(PoolError::EmptySurface { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_clear_only_touches_one_slot() {
        let mut pool = FramePool::allocate(4, 4).unwrap();
        pool.slot_view(Slot::First).fill(0xffff_ffff);
        pool.slot_view(Slot::Second).fill(0x0101_0101);

        pool.clear(Slot::First);

        assert!(pool.slot_bytes(Slot::First).iter().all(|&b| b == 0));
        assert!(pool.slot_bytes(Slot::Second).iter().all(|&b| b == 1));
    }

    #[test]
    fn test_view_writes_land_in_slot() {
        let mut pool = FramePool::allocate(3, 2).unwrap();
        pool.clear(Slot::Second);
        assert!(pool.slot_view(Slot::Second).put(2, 1, 0x0a0a_0a0a));

        let bytes = pool.slot_bytes(Slot::Second);
        let at = pool.stride() + 2 * BYTES_PER_PIXEL;
        assert_eq!(&bytes[at..at + 4], &[0x0a; 4]);
    }

    #[test]
    fn test_view_clips_out_of_bounds() {
        let mut data = vec![0u8; 2 * 2 * 4];
        let mut view = PixelView::new(&mut data, 2, 2, 8);

        assert!(!view.put(-1, 0, 0xffff_ffff));
        assert!(!view.put(0, -1, 0xffff_ffff));
        assert!(!view.put(2, 0, 0xffff_ffff));
        assert!(!view.put(0, 2, 0xffff_ffff));
        assert!(view.put(1, 1, 0x1111_1111));

        assert_eq!(view.pixel(1, 1), Some(0x1111_1111));
        assert_eq!(view.pixel(5, 5), None);
        assert_eq!(data.iter().filter(|&&b| b != 0).count(), 4);
    }

    #[test]
    fn test_slot_alternation() {
        assert_eq!(Slot::First.other(), Slot::Second);
        assert_eq!(Slot::Second.other(), Slot::First);
        assert_eq!(Slot::Second.index(), 1);
    }
}
