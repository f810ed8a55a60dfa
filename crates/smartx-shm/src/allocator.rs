//! Named-object allocator over a shared-memory region or a heap block.
//!
//! A region is created with a fixed usable size; one extra page in front
//! holds the bookkeeping: a bump offset and a small directory of named
//! allocations, so a connecting process can locate the records the creator
//! placed into the region. Individual deallocation is not supported; the
//! region is an allocate-once aggregate that is torn down as a whole when
//! its creator drops the allocator.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use thiserror::Error;

use crate::fdsignal::{change_group, FdSignalError};
use crate::paths;

const LOG: &str = "shm";

const REGION_MAGIC: u32 = 0x534d_5852; // "SMXR"
const MAX_DIR_ENTRIES: usize = 32;
const MAX_NAME_LEN: usize = 56;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("allocator is not initialized")]
    NotInitialized,
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),
    #[error("shared memory region {0} does not exist")]
    NoSuchRegion(String),
    #[error("region {0} already initialized")]
    AlreadyInitialized(String),
    #[error("out of region memory")]
    OutOfMemory,
    #[error("object {0} not found in region")]
    ObjectNotFound(String),
    #[error("object {0} already exists in region")]
    ObjectExists(String),
    #[error("object {0} has a different item size")]
    TypeMismatch(String),
    #[error("region header is corrupt")]
    BadMagic,
    #[error("cannot change group: {0}")]
    Group(#[from] FdSignalError),
    #[error("shared memory system call failed: {0}")]
    Io(#[from] io::Error),
}

/// Where the region's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Process-private heap block. Supports `Create` only.
    Heap,
    /// Named POSIX shared memory under the shm root.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// Create the region, removing a stale one of the same name first.
    Create,
    /// Connect to a region another process created.
    Connect,
}

#[repr(C)]
struct DirEntry {
    name: [u8; MAX_NAME_LEN],
    name_len: u32,
    offset: u32,
    count: u32,
    item_size: u32,
}

#[repr(C)]
struct RegionHeader {
    magic: u32,
    usable_size: u32,
    bump: AtomicU32,
    num_entries: AtomicU32,
    entries: [DirEntry; MAX_DIR_ENTRIES],
}

enum Storage {
    Unmapped,
    Heap(Vec<u8>),
    Mapped {
        base: *mut u8,
        len: usize,
        fd: libc::c_int,
        owner: bool,
    },
}

/// Uniform allocator for shared or heap memory with typed named objects.
pub struct MemoryAllocator {
    name: String,
    total_size: usize,
    backing: Backing,
    storage: Storage,
    initialized: bool,
}

unsafe impl Send for MemoryAllocator {}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn shm_name(name: &str) -> CString {
    CString::new(format!("/{name}")).expect("region name contains no NUL")
}

impl MemoryAllocator {
    /// `total_size` is the usable payload size; one page of bookkeeping is
    /// added on top.
    pub fn new(name: impl Into<String>, total_size: usize, backing: Backing) -> Self {
        MemoryAllocator {
            name: name.into(),
            total_size,
            backing,
            storage: Storage::Unmapped,
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn init(&mut self, flag: OpenFlag) -> Result<(), ShmError> {
        if self.initialized {
            return Ok(());
        }
        match (self.backing, flag) {
            (Backing::Heap, OpenFlag::Create) => self.init_heap(),
            (Backing::Heap, OpenFlag::Connect) => {
                Err(ShmError::InvalidParam("heap regions cannot be connected to"))
            }
            (Backing::Shared, OpenFlag::Create) => self.init_shared_create(),
            (Backing::Shared, OpenFlag::Connect) => self.init_shared_connect(),
        }
    }

    fn init_heap(&mut self) -> Result<(), ShmError> {
        let len = self.total_size + page_size();
        let mut block = vec![0u8; len];
        unsafe { Self::write_header(block.as_mut_ptr(), self.total_size) };
        self.storage = Storage::Heap(block);
        self.initialized = true;
        Ok(())
    }

    fn init_shared_create(&mut self) -> Result<(), ShmError> {
        let c_name = shm_name(&self.name);
        // A stale region of the same name blocks creation; creators always
        // remove first.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o660,
            )
        };
        if fd < 0 {
            return Err(ShmError::Io(io::Error::last_os_error()));
        }
        let len = self.total_size + page_size();
        let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::Io(e));
        }
        let base = Self::map(fd, len)?;
        unsafe { Self::write_header(base, self.total_size) };
        self.storage = Storage::Mapped {
            base,
            len,
            fd,
            owner: true,
        };
        self.initialized = true;
        debug!(target: LOG, "created region {} ({} bytes)", self.name, len);
        Ok(())
    }

    fn init_shared_connect(&mut self) -> Result<(), ShmError> {
        let abs_path = format!("{}{}", paths::shm_root(), self.name);
        if !std::path::Path::new(&abs_path).exists() {
            return Err(ShmError::NoSuchRegion(self.name.clone()));
        }
        let c_name = shm_name(&self.name);
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(ShmError::Io(io::Error::last_os_error()));
        }
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::fstat(fd, &mut stat) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Io(e));
        }
        let len = stat.st_size as usize;
        let base = Self::map(fd, len).map_err(|e| {
            unsafe { libc::close(fd) };
            e
        })?;
        let header = unsafe { &*(base as *const RegionHeader) };
        if header.magic != REGION_MAGIC {
            unsafe {
                libc::munmap(base as *mut libc::c_void, len);
                libc::close(fd);
            }
            return Err(ShmError::BadMagic);
        }
        self.total_size = header.usable_size as usize;
        self.storage = Storage::Mapped {
            base,
            len,
            fd,
            owner: false,
        };
        self.initialized = true;
        debug!(target: LOG, "connected to region {} ({} bytes)", self.name, len);
        Ok(())
    }

    fn map(fd: libc::c_int, len: usize) -> Result<*mut u8, ShmError> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ShmError::Io(io::Error::last_os_error()));
        }
        Ok(base as *mut u8)
    }

    unsafe fn write_header(base: *mut u8, usable_size: usize) {
        unsafe {
            let header = base as *mut RegionHeader;
            std::ptr::write_bytes(base, 0, std::mem::size_of::<RegionHeader>());
            (*header).magic = REGION_MAGIC;
            (*header).usable_size = usable_size as u32;
        }
    }

    fn base(&self) -> Result<*mut u8, ShmError> {
        match &self.storage {
            Storage::Unmapped => Err(ShmError::NotInitialized),
            Storage::Heap(block) => Ok(block.as_ptr() as *mut u8),
            Storage::Mapped { base, .. } => Ok(*base),
        }
    }

    fn header(&self) -> Result<&RegionHeader, ShmError> {
        Ok(unsafe { &*(self.base()? as *const RegionHeader) })
    }

    fn header_mut(&self) -> Result<*mut RegionHeader, ShmError> {
        Ok(self.base()? as *mut RegionHeader)
    }

    fn data_base(&self) -> Result<*mut u8, ShmError> {
        Ok(unsafe { self.base()?.add(page_size()) })
    }

    /// Reserve `size` bytes with the given alignment; anonymous allocation.
    pub fn allocate(&self, alignment: usize, size: usize) -> Result<*mut u8, ShmError> {
        let (ptr, _) = self.bump_alloc(alignment, size)?;
        Ok(ptr)
    }

    fn bump_alloc(&self, alignment: usize, size: usize) -> Result<(*mut u8, u32), ShmError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(ShmError::InvalidParam("alignment must be a power of two"));
        }
        let header = self.header()?;
        let data = self.data_base()?;
        loop {
            let current = header.bump.load(Ordering::Acquire);
            let aligned = align_up(current as usize, alignment);
            let end = aligned + size;
            if end > self.total_size {
                return Err(ShmError::OutOfMemory);
            }
            if header
                .bump
                .compare_exchange(current, end as u32, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok((unsafe { data.add(aligned) }, aligned as u32));
            }
        }
    }

    /// Allocate `count` zero-initialized items of `T` under `name`, so a
    /// connecting process can locate them with [`find`](Self::find). The
    /// full object name is prefixed with the region name.
    pub fn allocate_named<T>(&self, name: &str, count: u32) -> Result<*mut T, ShmError> {
        let full_name = format!("{}_{}", self.name, name);
        let header = self.header()?;
        if self.lookup_entry(&full_name)?.is_some() {
            return Err(ShmError::ObjectExists(full_name));
        }
        let item_size = std::mem::size_of::<T>();
        let (ptr, offset) = self.bump_alloc(
            std::mem::align_of::<T>().max(8),
            item_size * count as usize,
        )?;

        let slot = header.num_entries.fetch_add(1, Ordering::AcqRel) as usize;
        if slot >= MAX_DIR_ENTRIES {
            return Err(ShmError::OutOfMemory);
        }
        let name_bytes = full_name.as_bytes();
        if name_bytes.len() > MAX_NAME_LEN {
            return Err(ShmError::InvalidParam("object name too long"));
        }
        let entry = unsafe { &mut (*self.header_mut()?).entries[slot] };
        entry.name[..name_bytes.len()].copy_from_slice(name_bytes);
        entry.name_len = name_bytes.len() as u32;
        entry.offset = offset;
        entry.count = count;
        entry.item_size = item_size as u32;
        Ok(ptr as *mut T)
    }

    /// Allocate `count` zero-initialized anonymous items of `T`.
    pub fn allocate_anon<T>(&self, count: u32) -> Result<*mut T, ShmError> {
        let ptr = self.allocate(
            std::mem::align_of::<T>().max(8),
            std::mem::size_of::<T>() * count as usize,
        )?;
        Ok(ptr as *mut T)
    }

    fn lookup_entry(&self, full_name: &str) -> Result<Option<&DirEntry>, ShmError> {
        let header = self.header()?;
        let num = header.num_entries.load(Ordering::Acquire) as usize;
        let name_bytes = full_name.as_bytes();
        for entry in header.entries.iter().take(num.min(MAX_DIR_ENTRIES)) {
            if entry.name_len as usize == name_bytes.len()
                && &entry.name[..name_bytes.len()] == name_bytes
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Locate a named allocation; returns the pointer and the item count.
    pub fn find<T>(&self, name: &str) -> Result<(*mut T, u32), ShmError> {
        let full_name = format!("{}_{}", self.name, name);
        let entry = self
            .lookup_entry(&full_name)?
            .ok_or_else(|| ShmError::ObjectNotFound(full_name.clone()))?;
        if entry.item_size as usize != std::mem::size_of::<T>() {
            return Err(ShmError::TypeMismatch(full_name));
        }
        let ptr = unsafe { self.data_base()?.add(entry.offset as usize) };
        Ok((ptr as *mut T, entry.count))
    }

    /// The region is an allocate-once aggregate: individual deallocation is
    /// a no-op, storage is reclaimed when the creator drops the allocator.
    pub fn deallocate<T>(&self, _ptr: *const T) {}

    pub fn get_free_memory(&self) -> Result<usize, ShmError> {
        let header = self.header()?;
        Ok(self.total_size - header.bump.load(Ordering::Acquire) as usize)
    }

    /// Change the group of the backing shm file and restrict its mode to
    /// 0660. Shared regions only.
    pub fn change_group(&self, group: &str) -> Result<(), ShmError> {
        if self.backing != Backing::Shared {
            return Err(ShmError::InvalidParam("heap regions have no backing file"));
        }
        if !self.initialized {
            return Err(ShmError::NotInitialized);
        }
        let path = format!("{}{}", paths::shm_root(), self.name);
        change_group(&path, group)?;
        let c_path = CString::new(path).expect("path contains no NUL");
        let rc = unsafe { libc::chmod(c_path.as_ptr(), 0o660) };
        if rc < 0 {
            return Err(ShmError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        if let Storage::Mapped {
            base,
            len,
            fd,
            owner,
        } = &self.storage
        {
            unsafe {
                libc::munmap(*base as *mut libc::c_void, *len);
                libc::close(*fd);
                if *owner {
                    let c_name = shm_name(&self.name);
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("smartx_test_{}_{}", std::process::id(), name)
    }

    #[test]
    fn heap_allocate_and_find() {
        let mut alloc = MemoryAllocator::new(unique("heap"), 4096, Backing::Heap);
        alloc.init(OpenFlag::Create).unwrap();

        let ptr: *mut u64 = alloc.allocate_named("values", 4).unwrap();
        unsafe {
            for i in 0..4 {
                *ptr.add(i) = i as u64 + 1;
            }
        }
        let (found, count) = alloc.find::<u64>("values").unwrap();
        assert_eq!(count, 4);
        assert_eq!(found, ptr);
        assert_eq!(unsafe { *found.add(3) }, 4);
    }

    #[test]
    fn heap_cannot_connect() {
        let mut alloc = MemoryAllocator::new(unique("noconnect"), 64, Backing::Heap);
        assert!(matches!(
            alloc.init(OpenFlag::Connect),
            Err(ShmError::InvalidParam(_))
        ));
    }

    #[test]
    fn allocation_is_aligned_and_bounded() {
        let mut alloc = MemoryAllocator::new(unique("align"), 256, Backing::Heap);
        alloc.init(OpenFlag::Create).unwrap();
        let p = alloc.allocate(16, 100).unwrap();
        assert_eq!(p as usize % 16, 0);
        // The remaining space cannot satisfy this request.
        assert!(matches!(alloc.allocate(16, 256), Err(ShmError::OutOfMemory)));
    }

    #[test]
    fn find_unknown_object() {
        let mut alloc = MemoryAllocator::new(unique("missing"), 64, Backing::Heap);
        alloc.init(OpenFlag::Create).unwrap();
        assert!(matches!(
            alloc.find::<u32>("nope"),
            Err(ShmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn shared_create_and_connect() {
        let name = unique("shared");
        let mut creator = MemoryAllocator::new(name.clone(), 4096, Backing::Shared);
        creator.init(OpenFlag::Create).unwrap();
        let ptr: *mut u32 = creator.allocate_named("flag", 1).unwrap();
        unsafe { *ptr = 0xdead_beef };

        let mut client = MemoryAllocator::new(name.clone(), 0, Backing::Shared);
        client.init(OpenFlag::Connect).unwrap();
        let (found, count) = client.find::<u32>("flag").unwrap();
        assert_eq!(count, 1);
        assert_eq!(unsafe { *found }, 0xdead_beef);

        drop(client);
        drop(creator);
        assert!(!std::path::Path::new(&format!("/dev/shm/{name}")).exists());
    }

    #[test]
    fn connect_to_missing_region_fails() {
        let mut alloc = MemoryAllocator::new(unique("absent"), 0, Backing::Shared);
        assert!(matches!(
            alloc.init(OpenFlag::Connect),
            Err(ShmError::NoSuchRegion(_))
        ));
    }

    #[test]
    fn duplicate_named_object_is_rejected() {
        let mut alloc = MemoryAllocator::new(unique("dup"), 1024, Backing::Heap);
        alloc.init(OpenFlag::Create).unwrap();
        let _: *mut u32 = alloc.allocate_named("twice", 1).unwrap();
        assert!(matches!(
            alloc.allocate_named::<u32>("twice", 1),
            Err(ShmError::ObjectExists(_))
        ));
    }
}
