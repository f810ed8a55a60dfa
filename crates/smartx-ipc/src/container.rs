//! Fixed-size message container with CRC integrity.

use crc::{Crc, CRC_32_ISO_HDLC};

/// Payload capacity of one container in bytes. Messages larger than this
/// cannot be transported; [`IpcMessage`] implementations assert the bound
/// at compile time.
pub const PAYLOAD_CAPACITY: usize = 100;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A record that can travel through the command channel.
///
/// # Safety
/// Implementations must be plain `#[repr(C)]` data without references or
/// padding-dependent semantics: the container stores the raw object bytes
/// and reconstructs the value on the other side of the process boundary.
/// `ID` must be nonzero and unique within the protocol.
pub unsafe trait IpcMessage: Copy {
    const ID: u32;
}

/// One serialized message: type tag, payload bytes and a CRC32 over both.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MessageContainer {
    type_id: u32,
    payload: [u8; PAYLOAD_CAPACITY],
    crc: u32,
}

impl Default for MessageContainer {
    fn default() -> Self {
        MessageContainer {
            type_id: 0,
            payload: [0; PAYLOAD_CAPACITY],
            crc: 0,
        }
    }
}

impl MessageContainer {
    /// Serialize `msg` into the container and stamp the CRC.
    /// Fails when the record does not fit the payload.
    pub fn load<T: IpcMessage>(&mut self, msg: &T) -> bool {
        let size = std::mem::size_of::<T>();
        if size > PAYLOAD_CAPACITY {
            return false;
        }
        self.type_id = T::ID;
        self.payload = [0; PAYLOAD_CAPACITY];
        unsafe {
            std::ptr::copy_nonoverlapping(
                msg as *const T as *const u8,
                self.payload.as_mut_ptr(),
                size,
            );
        }
        self.crc = self.compute_crc();
        true
    }

    /// Reconstruct a `T` from the payload. Does not verify the CRC; call
    /// [`is_good`](Self::is_good) first. Returns `None` when the container
    /// carries a different message type.
    pub fn extract<T: IpcMessage>(&self) -> Option<T> {
        if self.type_id != T::ID {
            return None;
        }
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.payload.as_ptr(),
                value.as_mut_ptr() as *mut u8,
                std::mem::size_of::<T>(),
            );
            Some(value.assume_init())
        }
    }

    /// Whether the container carries a message of type `T`.
    pub fn matches<T: IpcMessage>(&self) -> bool {
        self.type_id == T::ID
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// Recompute the CRC over (tag, payload) and compare with the stored one.
    pub fn is_good(&self) -> bool {
        self.crc == self.compute_crc()
    }

    fn compute_crc(&self) -> u32 {
        let mut digest = CRC32.digest();
        digest.update(&self.type_id.to_le_bytes());
        digest.update(&self.payload);
        digest.finalize()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&mut self) {
        self.payload[0] ^= 0xff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Debug)]
    #[repr(C)]
    struct Probe {
        a: u32,
        b: f32,
    }
    unsafe impl IpcMessage for Probe {
        const ID: u32 = 77;
    }

    #[test]
    fn load_extract_round_trip() {
        let mut container = MessageContainer::default();
        let msg = Probe { a: 42, b: 1.5 };
        assert!(container.load(&msg));
        assert!(container.is_good());
        assert_eq!(container.extract::<Probe>(), Some(msg));
    }

    #[test]
    fn corruption_is_detected() {
        let mut container = MessageContainer::default();
        container.load(&Probe { a: 1, b: 2.0 });
        container.corrupt();
        assert!(!container.is_good());
    }

    #[test]
    fn wrong_type_is_rejected() {
        #[derive(Clone, Copy)]
        #[repr(C)]
        struct Other(u8);
        unsafe impl IpcMessage for Other {
            const ID: u32 = 78;
        }

        let mut container = MessageContainer::default();
        container.load(&Probe { a: 1, b: 2.0 });
        assert!(container.extract::<Other>().is_none());
        assert!(container.matches::<Probe>());
    }
}
