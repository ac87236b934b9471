//! Guest RAM shared between emulated hardware threads.
//!
//! Every access to the backing store goes through host atomics. Plain guest
//! loads/stores use relaxed byte (or aligned word) atomics; LOCK-prefixed
//! read-modify-write sequences get either a native compare-and-swap through
//! [`HostRef::atomic_u32`]/[`HostRef::atomic_u64`] or the system-wide fallback
//! lock.
//!
//! Accesses of different sizes may overlap the same word (a byte store racing a
//! qword compare-and-swap, for instance). Rust's memory model does not define
//! such mixed-size races; they behave as the hardware does on the supported
//! hosts, and only same-size LOCK accesses are guaranteed atomic against each
//! other.
//!
//! Guest memory is little-endian. The `load_*`/`store_*` helpers convert to and
//! from host order; the raw atomic views do not.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Errors returned while constructing or bulk-accessing [`GuestMemory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuestMemoryError {
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
    #[error("invalid guest page size {page_size}")]
    InvalidPageSize { page_size: u64 },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let end = paddr
        .checked_add(len as u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Page-granular guest RAM.
///
/// All pages start mapped. Unmapping a page only hides it from
/// [`GuestMemory::translate`]; its contents are retained.
pub struct GuestMemory {
    /// Backing store. `AtomicU64` guarantees 8-byte alignment of the base, so the
    /// host alignment of a guest address equals `paddr % 8`.
    words: Box<[AtomicU64]>,
    size: u64,
    page_shift: u32,
    mapped: Box<[AtomicBool]>,
}

impl fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestMemory")
            .field("size", &self.size)
            .field("page_size", &self.page_size())
            .finish_non_exhaustive()
    }
}

impl GuestMemory {
    /// Allocates zeroed guest RAM. `size` is rounded up to a whole number of pages.
    pub fn new(size: u64, page_size: u64) -> GuestMemoryResult<Self> {
        if !page_size.is_power_of_two() || page_size < 8 {
            return Err(GuestMemoryError::InvalidPageSize { page_size });
        }
        let size = size
            .checked_next_multiple_of(page_size)
            .ok_or(GuestMemoryError::SizeTooLarge { size })?;
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        let pages = usize::try_from(size / page_size)
            .map_err(|_| GuestMemoryError::SizeTooLarge { size })?;

        let words = (0..size_usize / 8).map(|_| AtomicU64::new(0)).collect();
        let mapped = (0..pages).map(|_| AtomicBool::new(true)).collect();
        Ok(Self {
            words,
            size,
            page_shift: page_size.trailing_zeros(),
            mapped,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        1u64 << self.page_shift
    }

    fn page_slot(&self, paddr: u64) -> Option<&AtomicBool> {
        let page = usize::try_from(paddr >> self.page_shift).ok()?;
        self.mapped.get(page)
    }

    /// Maps the page containing `paddr`. Returns `false` if the address is outside RAM.
    pub fn map_page(&self, paddr: u64) -> bool {
        match self.page_slot(paddr) {
            Some(slot) => {
                slot.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Unmaps the page containing `paddr`. Returns `false` if the address is outside RAM.
    pub fn unmap_page(&self, paddr: u64) -> bool {
        match self.page_slot(paddr) {
            Some(slot) => {
                slot.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn is_mapped(&self, paddr: u64) -> bool {
        self.page_slot(paddr)
            .is_some_and(|slot| slot.load(Ordering::Acquire))
    }

    /// Resolves `len` bytes at `paddr` to a host location.
    ///
    /// Returns `None` if the range leaves RAM or touches an unmapped page.
    pub fn translate(&self, paddr: u64, len: usize) -> Option<HostRef<'_>> {
        if len == 0 || check_range(self.size, paddr, len).is_err() {
            return None;
        }
        let last = paddr + (len as u64 - 1);
        if !self.is_mapped(paddr) || !self.is_mapped(last) {
            return None;
        }
        Some(HostRef {
            mem: self,
            offset: usize::try_from(paddr).ok()?,
            len,
        })
    }

    /// Copies up to `dst.len()` instruction bytes starting at `paddr`, stopping at
    /// the first unmapped byte. Returns the number of bytes copied.
    pub fn fetch(&self, paddr: u64, dst: &mut [u8]) -> usize {
        for (i, slot) in dst.iter_mut().enumerate() {
            match paddr
                .checked_add(i as u64)
                .and_then(|addr| self.translate(addr, 1))
            {
                Some(host) => *slot = host.load_u8(),
                None => return i,
            }
        }
        dst.len()
    }

    /// Bulk read that ignores page mappings (loader/debugger access).
    pub fn read_bytes(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        let base = paddr as usize;
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.byte(base + i).load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Bulk write that ignores page mappings (loader/debugger access).
    pub fn write_bytes(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        let base = paddr as usize;
        for (i, byte) in src.iter().copied().enumerate() {
            self.byte(base + i).store(byte, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64_le(&self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_bytes(paddr, &value.to_le_bytes())
    }

    #[inline]
    fn base_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast::<u8>()
    }

    #[inline]
    fn byte(&self, offset: usize) -> &AtomicU8 {
        assert!(offset < self.words.len() * 8);
        // Safety: `offset` is inside the backing allocation (checked above), `AtomicU8`
        // has alignment 1, and the store is only ever accessed through atomics.
        unsafe { &*self.base_ptr().add(offset).cast::<AtomicU8>() }
    }
}

/// A resolved, bounds-checked host location for one guest access.
#[derive(Clone, Copy)]
pub struct HostRef<'a> {
    mem: &'a GuestMemory,
    offset: usize,
    len: usize,
}

impl fmt::Debug for HostRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("paddr", &self.paddr())
            .field("len", &self.len)
            .finish()
    }
}

impl<'a> HostRef<'a> {
    #[inline]
    pub fn paddr(&self) -> u64 {
        self.offset as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_aligned(&self, align: usize) -> bool {
        self.offset % align == 0
    }

    /// Native 32-bit atomic view, available when the location is 4 bytes long and
    /// 4-byte aligned. The value is in guest (little-endian) byte order.
    pub fn atomic_u32(&self) -> Option<&'a AtomicU32> {
        if self.len != 4 || !self.is_aligned(4) {
            return None;
        }
        // Safety: `translate` bounds-checked `offset..offset + 4`, the base of the
        // backing store is 8-byte aligned so `offset % 4 == 0` gives a 4-byte aligned
        // pointer, and all accesses to the store are atomic.
        Some(unsafe { &*self.mem.base_ptr().add(self.offset).cast::<AtomicU32>() })
    }

    /// Native 64-bit atomic view, available when the location is 8 bytes long and
    /// 8-byte aligned. The value is in guest (little-endian) byte order.
    pub fn atomic_u64(&self) -> Option<&'a AtomicU64> {
        if self.len != 8 || !self.is_aligned(8) {
            return None;
        }
        self.mem.words.get(self.offset / 8)
    }

    fn read_into(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.len);
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.mem.byte(self.offset + i).load(Ordering::Relaxed);
        }
    }

    fn write_from(&self, src: &[u8]) {
        debug_assert!(src.len() <= self.len);
        for (i, byte) in src.iter().copied().enumerate() {
            self.mem.byte(self.offset + i).store(byte, Ordering::Relaxed);
        }
    }

    pub fn load_u8(&self) -> u8 {
        self.mem.byte(self.offset).load(Ordering::Relaxed)
    }

    pub fn load_u16(&self) -> u16 {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf);
        u16::from_le_bytes(buf)
    }

    pub fn load_u32(&self) -> u32 {
        if let Some(cell) = self.atomic_u32() {
            return u32::from_le(cell.load(Ordering::Acquire));
        }
        let mut buf = [0u8; 4];
        self.read_into(&mut buf);
        u32::from_le_bytes(buf)
    }

    pub fn load_u64(&self) -> u64 {
        if let Some(cell) = self.atomic_u64() {
            return u64::from_le(cell.load(Ordering::Acquire));
        }
        let mut buf = [0u8; 8];
        self.read_into(&mut buf);
        u64::from_le_bytes(buf)
    }

    pub fn store_u8(&self, value: u8) {
        self.mem.byte(self.offset).store(value, Ordering::Relaxed);
    }

    pub fn store_u16(&self, value: u16) {
        self.write_from(&value.to_le_bytes());
    }

    pub fn store_u32(&self, value: u32) {
        if let Some(cell) = self.atomic_u32() {
            cell.store(value.to_le(), Ordering::Release);
            return;
        }
        self.write_from(&value.to_le_bytes());
    }

    pub fn store_u64(&self, value: u64) {
        if let Some(cell) = self.atomic_u64() {
            cell.store(value.to_le(), Ordering::Release);
            return;
        }
        self.write_from(&value.to_le_bytes());
    }
}
