//! Construction and lookup of ring buffers.
//!
//! The factory owns the backing memory region of every buffer it handed
//! out: a map from buffer name to the region's allocator keeps the mapping
//! alive until the buffer is destroyed or lost again. Shared real buffers
//! are created by the router and found by name from the plugin process.

use std::collections::HashMap;
use std::ptr::NonNull;

use log::error;
use parking_lot::Mutex;

use smartx_common::SampleFormat;
use smartx_shm::{Backing, MemoryAllocator, MetaDataFactory, OpenFlag};

use crate::buffer::RingBuffer;
use crate::mirror::RingBufferMirror;
use crate::real::{RingBufferError, RingBufferReal};

const LOG: &str = "ringbuf";

const REAL_RECORD_NAME: &str = "ringBufferReal";
const METADATA_NAME: &str = "metaData";

/// Storage flavour of a new ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferType {
    /// Real buffer in a named shared-memory region.
    Shared,
    /// Real buffer in process-local memory.
    LocalReal,
    /// Facade over a PCM device; no storage of its own.
    LocalMirror,
}

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("invalid ring buffer parameter: {0}")]
    InvalidParam(&'static str),
    #[error("ring buffer error: {0}")]
    RingBuffer(#[from] RingBufferError),
    #[error("shared memory error: {0}")]
    Shm(#[from] smartx_shm::ShmError),
}

/// Process-scoped ring-buffer factory. Passed by reference to everything
/// that creates or finds buffers.
pub struct RingBufferFactory {
    regions: Mutex<HashMap<String, MemoryAllocator>>,
}

impl Default for RingBufferFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBufferFactory {
    pub fn new() -> Self {
        RingBufferFactory {
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a ring buffer of the given type and register its region.
    #[allow(clippy::too_many_arguments)]
    pub fn create_ring_buffer(
        &self,
        period_size: u32,
        num_periods: u32,
        num_channels: u32,
        data_format: SampleFormat,
        buffer_type: RingBufferType,
        name: &str,
        group_name: &str,
    ) -> Result<RingBuffer, FactoryError> {
        if name.is_empty() {
            return Err(FactoryError::InvalidParam("name must not be empty"));
        }
        if period_size == 0 && buffer_type != RingBufferType::LocalMirror {
            return Err(FactoryError::InvalidParam("period size must not be zero"));
        }
        if num_periods == 0 {
            return Err(FactoryError::InvalidParam("period count must not be zero"));
        }
        if num_channels == 0 {
            return Err(FactoryError::InvalidParam("channel count must not be zero"));
        }

        if buffer_type == RingBufferType::LocalMirror {
            // A mirror carries no storage; the device provides the buffer.
            let mirror = RingBufferMirror::new(num_channels)?;
            let mut buffer = RingBuffer::from_mirror(mirror, name);
            buffer.set_name(name);
            return Ok(buffer);
        }

        let sample_size = data_format.sample_size();
        let data_bytes =
            sample_size * num_channels as usize * num_periods as usize * period_size as usize;
        let total_size = data_bytes
            + std::mem::size_of::<RingBufferReal>()
            + MetaDataFactory::required_size(num_periods)
            + 256; // alignment slack

        let backing = match buffer_type {
            RingBufferType::Shared => Backing::Shared,
            _ => Backing::Heap,
        };
        let mut allocator = MemoryAllocator::new(name, total_size, backing);
        allocator.init(OpenFlag::Create)?;
        if backing == Backing::Shared {
            allocator.change_group(group_name).map_err(|e| {
                error!(target: LOG, "cannot change group of buffer {name}: {e}");
                e
            })?;
        }

        let data_ptr = allocator.allocate(16, data_bytes)?;

        let metadata = MetaDataFactory::new(&allocator);
        metadata.create(METADATA_NAME, num_periods)?;

        let record: *mut RingBufferReal = allocator.allocate_named(REAL_RECORD_NAME, 1)?;
        let data_offset = data_ptr as i64 - record as i64;
        unsafe {
            RingBufferReal::init_in_place(
                record,
                period_size,
                num_periods,
                num_channels,
                data_format,
                data_offset,
                backing == Backing::Shared,
            )?;
        }

        let record = NonNull::new(record).expect("allocator returned a valid pointer");
        let buffer = unsafe { RingBuffer::from_real(record, name)? };
        self.regions.lock().insert(name.to_string(), allocator);
        Ok(buffer)
    }

    /// Connect to a shared region another process created and rebuild a
    /// facade over the embedded real record.
    pub fn find_ring_buffer(&self, name: &str) -> Result<RingBuffer, FactoryError> {
        let mut allocator = MemoryAllocator::new(name, 0, Backing::Shared);
        allocator.init(OpenFlag::Connect).map_err(|e| {
            error!(target: LOG, "unable to connect to shared memory of buffer {name}: {e}");
            e
        })?;

        let (record, count) = allocator.find::<RingBufferReal>(REAL_RECORD_NAME)?;
        if count != 1 {
            error!(target: LOG, "buffer record of {name} not found");
            return Err(FactoryError::InvalidParam("embedded buffer record missing"));
        }
        let record = NonNull::new(record)
            .ok_or(FactoryError::InvalidParam("embedded buffer record missing"))?;
        let buffer = unsafe { RingBuffer::from_real(record, name)? };
        self.regions.lock().insert(name.to_string(), allocator);
        Ok(buffer)
    }

    /// Tear a created buffer down and release its region. The creator's
    /// allocator unlinks the shared segment on drop.
    pub fn destroy_ring_buffer(&self, buffer: RingBuffer) {
        if let Some(record) = buffer.real_record() {
            unsafe { RingBufferReal::destroy_in_place(record.as_ptr()) };
        }
        self.regions.lock().remove(buffer.name());
    }

    /// Drop a buffer found via [`find_ring_buffer`](Self::find_ring_buffer)
    /// without touching the region's contents.
    pub fn lose_ring_buffer(&self, buffer: RingBuffer) {
        self.regions.lock().remove(buffer.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_common::RingBufferAccess;

    fn unique(name: &str) -> String {
        format!("smartx_rbf_{}_{}", std::process::id(), name)
    }

    #[test]
    fn create_local_real() {
        let factory = RingBufferFactory::new();
        let mut buffer = factory
            .create_ring_buffer(
                64,
                4,
                2,
                SampleFormat::Float32,
                RingBufferType::LocalReal,
                &unique("local"),
                "audio",
            )
            .unwrap();
        assert!(buffer.is_real());
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.update_available(RingBufferAccess::Write).unwrap(), 256);
        assert_eq!(buffer.areas().len(), 2);
        factory.destroy_ring_buffer(buffer);
    }

    #[test]
    fn create_local_mirror() {
        let factory = RingBufferFactory::new();
        let buffer = factory
            .create_ring_buffer(
                0,
                4,
                2,
                SampleFormat::Int16,
                RingBufferType::LocalMirror,
                &unique("mirror"),
                "audio",
            )
            .unwrap();
        assert!(!buffer.is_real());
        assert!(matches!(
            buffer.wait_read(1, 100).unwrap_err(),
            RingBufferError::NotAllowed
        ));
    }

    #[test]
    fn parameter_validation() {
        let factory = RingBufferFactory::new();
        assert!(factory
            .create_ring_buffer(
                0,
                4,
                2,
                SampleFormat::Int16,
                RingBufferType::LocalReal,
                &unique("zero_period"),
                "audio",
            )
            .is_err());
        assert!(factory
            .create_ring_buffer(
                64,
                0,
                2,
                SampleFormat::Int16,
                RingBufferType::LocalReal,
                &unique("zero_periods"),
                "audio",
            )
            .is_err());
        assert!(factory
            .create_ring_buffer(
                64,
                4,
                0,
                SampleFormat::Int16,
                RingBufferType::LocalReal,
                &unique("zero_channels"),
                "audio",
            )
            .is_err());
        assert!(factory
            .create_ring_buffer(
                64,
                4,
                2,
                SampleFormat::Int16,
                RingBufferType::LocalReal,
                "",
                "audio",
            )
            .is_err());
    }

    #[test]
    fn find_missing_buffer_fails() {
        let factory = RingBufferFactory::new();
        assert!(factory.find_ring_buffer(&unique("nothere")).is_err());
    }
}
