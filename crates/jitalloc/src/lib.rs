//! Arena allocator for JIT generated code.
//!
//! Code is written into freshly mapped pages and the pages are protected before the allocation is
//! handed out, so callers never observe writable code. Regions are unmapped once the allocator
//! and every allocation carved out of them are gone.
use easyerr::{Error, ResultExt};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache, Memory, Threading::GetCurrentProcess,
};

const REGION_MIN_LEN: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("cannot allocate zero bytes")]
    Empty,
    #[error(transparent)]
    Map { source: std::io::Error },
    #[error(transparent)]
    Protect { source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadExec,
    ReadWrite,
}

#[cfg(target_family = "unix")]
fn page_size() -> usize {
    rustix::param::page_size()
}

#[cfg(target_family = "windows")]
fn page_size() -> usize {
    4096
}

/// A memory mapped region.
struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is only written through the allocator, which requires exclusive access
unsafe impl Send for Region {}
// SAFETY: shared references never write to the region
unsafe impl Sync for Region {}

impl Region {
    fn new(addr_hint: Option<usize>, len: usize) -> Result<Self, AllocError> {
        let len = len.max(REGION_MIN_LEN).next_multiple_of(page_size());

        #[cfg(target_family = "unix")]
        let region = unsafe {
            mman::mmap_anonymous(
                addr_hint
                    .map(std::ptr::without_provenance_mut)
                    .unwrap_or_default(),
                len,
                ProtFlags::empty(),
                MapFlags::PRIVATE,
            )
        }
        .map_err(std::io::Error::from)
        .context(AllocCtx::Map)?;

        #[cfg(target_family = "windows")]
        let region = unsafe {
            let addr_hint_ptr = addr_hint.map(|addr| std::ptr::without_provenance(addr));
            let result = Memory::VirtualAlloc(
                addr_hint_ptr,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_NOACCESS,
            );

            if !result.is_null() {
                result
            } else {
                Memory::VirtualAlloc(
                    None,
                    len,
                    Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                    Memory::PAGE_NOACCESS,
                )
            }
        };

        let ptr = NonNull::new(region.cast::<u8>()).ok_or_else(|| AllocError::Map {
            source: std::io::Error::last_os_error(),
        })?;

        Ok(Self { ptr, len })
    }

    fn end(&self) -> usize {
        self.ptr.addr().get() + self.len
    }

    /// Changes the protection of `length` bytes starting at `offset`. Both must be page aligned.
    unsafe fn protect(
        &self,
        offset: usize,
        length: usize,
        protection: Protection,
    ) -> Result<(), AllocError> {
        let start = unsafe { self.ptr.as_ptr().add(offset) };

        #[cfg(target_family = "unix")]
        let result = unsafe {
            let flags = match protection {
                Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
            };

            mman::mprotect(start.cast(), length, flags).map_err(std::io::Error::from)
        };

        #[cfg(target_family = "windows")]
        let result = unsafe {
            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);
            let flags = match protection {
                Protection::ReadExec => Memory::PAGE_EXECUTE_READ,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
            };

            Memory::VirtualProtect(start.cast(), length, flags, &raw mut previous)
                .map_err(std::io::Error::from)
        };

        result.context(AllocCtx::Protect)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        #[cfg(target_family = "unix")]
        let result = unsafe { mman::munmap(self.ptr.as_ptr().cast(), self.len) };

        #[cfg(target_family = "windows")]
        let result = unsafe { Memory::VirtualFree(self.ptr.as_ptr().cast(), 0, Memory::MEM_RELEASE) };

        debug_assert!(result.is_ok(), "failed to unmap region");
    }
}

/// An allocation inside a region. Keeps the region mapped for as long as it lives.
pub struct Allocation<K> {
    ptr: NonNull<[u8]>,
    _region: Arc<Region>,
    _kind: PhantomData<K>,
}

impl<K> Allocation<K> {
    /// Returns a pointer to the allocation.
    #[inline(always)]
    pub fn as_ptr(&self) -> NonNull<[u8]> {
        self.ptr
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ptr.len()
    }
}

// SAFETY: the allocation is immutable once handed out
unsafe impl<K> Send for Allocation<K> {}

pub trait AllocKind {
    const PROTECTION: Protection;
}

pub struct Exec;
impl AllocKind for Exec {
    const PROTECTION: Protection = Protection::ReadExec;
}

pub struct ReadWrite;
impl AllocKind for ReadWrite {
    const PROTECTION: Protection = Protection::ReadWrite;
}

pub struct Allocator<K> {
    /// The currently active region
    current: Option<Arc<Region>>,
    /// Offset into the current region
    offset: usize,
    /// Total amount of bytes mapped so far
    mapped: usize,
    /// Phantom
    _phantom: PhantomData<K>,
}

impl<K> Allocator<K>
where
    K: AllocKind,
{
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            current: None,
            offset: 0,
            mapped: 0,
            _phantom: PhantomData,
        }
    }

    /// Total amount of bytes mapped by this allocator.
    pub fn mapped(&self) -> usize {
        self.mapped
    }

    fn next_region(&mut self, length: usize) -> Result<Arc<Region>, AllocError> {
        let hint = self.current.as_ref().map(|r| r.end());
        let region = Arc::new(Region::new(hint, length)?);

        self.mapped += region.len;
        self.current = Some(region.clone());
        self.offset = 0;

        Ok(region)
    }

    /// Reserves `length` bytes starting at a page boundary, so that protecting the allocation never
    /// touches memory handed out before.
    fn reserve(&mut self, alignment: usize, length: usize) -> Result<(Arc<Region>, usize), AllocError> {
        let alignment = alignment.max(page_size()).next_power_of_two();
        let effective_offset = self.offset.next_multiple_of(alignment);

        if let Some(region) = &self.current
            && region
                .len
                .checked_sub(effective_offset)
                .is_some_and(|r| r >= length)
        {
            return Ok((region.clone(), effective_offset));
        }

        Ok((self.next_region(length)?, 0))
    }

    /// Copies `data` into a new allocation and protects it according to the kind of this
    /// allocator before returning it.
    pub fn allocate(&mut self, alignment: usize, data: &[u8]) -> Result<Allocation<K>, AllocError> {
        if data.is_empty() {
            return Err(AllocError::Empty);
        }

        let (region, offset) = self.reserve(alignment, data.len())?;
        let protected_len = data.len().next_multiple_of(page_size());

        let start = unsafe {
            region.protect(offset, protected_len, Protection::ReadWrite)?;

            let start = region.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), start, data.len());
            if K::PROTECTION != Protection::ReadWrite {
                region.protect(offset, protected_len, K::PROTECTION)?;
            }

            #[cfg(target_family = "windows")]
            {
                let process = GetCurrentProcess();
                FlushInstructionCache(process, Some(start.cast()), data.len())
                    .map_err(std::io::Error::from)
                    .context(AllocCtx::Protect)?;
            }

            NonNull::new_unchecked(start)
        };

        self.offset = offset + protected_len;

        Ok(Allocation {
            ptr: NonNull::slice_from_raw_parts(start, data.len()),
            _region: region,
            _kind: PhantomData,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Allocator, Exec, ReadWrite};

    #[test]
    fn allocations_hold_data() {
        let mut allocator = Allocator::<ReadWrite>::new();
        let a = allocator.allocate(16, &[1, 2, 3, 4]).unwrap();
        let b = allocator.allocate(16, &[5; 100]).unwrap();

        let a = unsafe { a.as_ptr().as_ref() };
        let b = unsafe { b.as_ptr().as_ref() };
        assert_eq!(a, &[1, 2, 3, 4]);
        assert!(b.iter().all(|x| *x == 5));
    }

    #[test]
    fn allocations_do_not_share_pages() {
        let mut allocator = Allocator::<Exec>::new();
        let a = allocator.allocate(64, &[0xC3; 8]).unwrap();
        let b = allocator.allocate(64, &[0xC3; 8]).unwrap();

        let page = super::page_size();
        let a = a.as_ptr().cast::<u8>().addr().get();
        let b = b.as_ptr().cast::<u8>().addr().get();
        assert_eq!(a % page, 0);
        assert_eq!(b % page, 0);
        assert_ne!(a / page, b / page);
    }

    #[test]
    fn allocations_outlive_allocator() {
        let mut allocator = Allocator::<ReadWrite>::new();
        let alloc = allocator.allocate(8, &[7; 32]).unwrap();
        drop(allocator);

        let data = unsafe { alloc.as_ptr().as_ref() };
        assert!(data.iter().all(|x| *x == 7));
    }

    #[test]
    fn large_allocation_gets_its_own_region() {
        let mut allocator = Allocator::<ReadWrite>::new();
        let data = vec![9u8; super::REGION_MIN_LEN * 2];
        let alloc = allocator.allocate(8, &data).unwrap();

        assert_eq!(alloc.len(), data.len());
        assert!(allocator.mapped() >= data.len());
    }

    #[test]
    fn empty_allocation_fails() {
        let mut allocator = Allocator::<Exec>::new();
        assert!(allocator.allocate(8, &[]).is_err());
    }
}
