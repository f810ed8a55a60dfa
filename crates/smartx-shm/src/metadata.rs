//! Per-period metadata records co-located with a PCM buffer.
//!
//! A buffer with `n` periods carries `n` user-defined records plus `n`
//! handles; each handle binds a period index to its record. The record type
//! is user-defined but must start with a [`MetaDataHeader`] so a connecting
//! process can verify it found the structure it expects.

use crate::allocator::{MemoryAllocator, ShmError};

/// Tag at the head of every user metadata record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaDataHeader {
    pub magic: u32,
    pub size: u32,
}

const META_MAGIC: u32 = 0x4d45_5441; // "META"

/// Handle binding one period to its metadata record. Offsets are relative
/// to the record array so the handle stays valid across address spaces.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MetaData {
    pub index: u32,
    pub max_index: u32,
    pub record_offset: u32,
}

/// Factory for metadata of a user-defined record type.
pub struct UserMetaDataFactory<'a, T> {
    allocator: &'a MemoryAllocator,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T> UserMetaDataFactory<'a, T> {
    pub fn new(allocator: &'a MemoryAllocator) -> Self {
        UserMetaDataFactory {
            allocator,
            _marker: std::marker::PhantomData,
        }
    }

    /// Bytes the factory will claim from the allocator for `n_periods`.
    pub fn required_size(n_periods: u32) -> usize {
        n_periods as usize * (std::mem::size_of::<T>() + std::mem::size_of::<MetaData>())
    }

    /// Allocate `n_periods` records plus handles under `name`, stamping the
    /// magic tag into every record header.
    pub fn create(&self, name: &str, n_periods: u32) -> Result<*mut MetaData, ShmError> {
        if n_periods == 0 {
            return Err(ShmError::InvalidParam("metadata needs at least one period"));
        }
        let records: *mut T = self
            .allocator
            .allocate_named(&format!("{name}_records"), n_periods)?;
        let handles: *mut MetaData = self.allocator.allocate_named(name, n_periods)?;
        let record_size = std::mem::size_of::<T>() as u32;
        unsafe {
            for i in 0..n_periods {
                let header = records.add(i as usize) as *mut MetaDataHeader;
                (*header).magic = META_MAGIC;
                (*header).size = record_size;
                *handles.add(i as usize) = MetaData {
                    index: i,
                    max_index: n_periods - 1,
                    record_offset: i * record_size,
                };
            }
        }
        Ok(handles)
    }

    /// Re-bind the handles of a previously created metadata block and verify
    /// the record magic.
    pub fn find(&self, name: &str) -> Result<(*mut MetaData, u32), ShmError> {
        let (records, record_count) = self.allocator.find::<T>(&format!("{name}_records"))?;
        let (handles, handle_count) = self.allocator.find::<MetaData>(name)?;
        if record_count != handle_count {
            return Err(ShmError::TypeMismatch(name.to_string()));
        }
        unsafe {
            for i in 0..record_count {
                let header = records.add(i as usize) as *const MetaDataHeader;
                if (*header).magic != META_MAGIC {
                    return Err(ShmError::BadMagic);
                }
            }
        }
        Ok((handles, handle_count))
    }
}

/// Default per-period record attached to every ring buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RingMetaData {
    pub header: MetaDataHeader,
    pub stream_position: u32,
    pub fill_level: u32,
}

/// Concrete factory used by the ring-buffer factory.
pub struct MetaDataFactory<'a> {
    inner: UserMetaDataFactory<'a, RingMetaData>,
}

impl<'a> MetaDataFactory<'a> {
    pub fn new(allocator: &'a MemoryAllocator) -> Self {
        MetaDataFactory {
            inner: UserMetaDataFactory::new(allocator),
        }
    }

    pub fn required_size(n_periods: u32) -> usize {
        UserMetaDataFactory::<RingMetaData>::required_size(n_periods)
    }

    pub fn create(&self, name: &str, n_periods: u32) -> Result<*mut MetaData, ShmError> {
        self.inner.create(name, n_periods)
    }

    pub fn find(&self, name: &str) -> Result<(*mut MetaData, u32), ShmError> {
        self.inner.find(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Backing, OpenFlag};

    #[test]
    fn create_and_find_handles() {
        let mut alloc = MemoryAllocator::new(
            format!("meta_test_{}", std::process::id()),
            MetaDataFactory::required_size(4) + 256,
            Backing::Heap,
        );
        alloc.init(OpenFlag::Create).unwrap();

        let factory = MetaDataFactory::new(&alloc);
        let handles = factory.create("buf_metaData", 4).unwrap();
        unsafe {
            assert_eq!((*handles).index, 0);
            assert_eq!((*handles.add(3)).index, 3);
            assert_eq!((*handles.add(3)).max_index, 3);
        }

        let (found, count) = factory.find("buf_metaData").unwrap();
        assert_eq!(count, 4);
        assert_eq!(found, handles);
    }

    #[test]
    fn zero_periods_rejected() {
        let mut alloc = MemoryAllocator::new(
            format!("meta_zero_{}", std::process::id()),
            1024,
            Backing::Heap,
        );
        alloc.init(OpenFlag::Create).unwrap();
        let factory = MetaDataFactory::new(&alloc);
        assert!(factory.create("m", 0).is_err());
    }
}
