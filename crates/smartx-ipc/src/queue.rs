//! Bounded lock-free container queue, placeable in shared memory.
//!
//! A sequence-numbered ring (Vyukov-style bounded MPMC queue): every slot
//! carries an atomic sequence that encodes whether the slot is free for the
//! producer or holds a value for the consumer at a given position. All
//! state lives in place, so the queue can be constructed inside a
//! shared-memory region and used concurrently from both processes without
//! any heap pointers. A process that dies in the middle of an operation
//! leaves at most its own slot unpublished; it never corrupts the peers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::container::MessageContainer;

/// Number of containers a queue can hold.
pub const QUEUE_CAPACITY: usize = 100;

#[repr(C)]
struct Slot {
    sequence: AtomicU64,
    value: UnsafeCell<MessageContainer>,
}

/// In-place bounded queue of [`MessageContainer`]s.
#[repr(C)]
pub struct ShmQueue {
    enqueue_pos: AtomicU64,
    dequeue_pos: AtomicU64,
    slots: [Slot; QUEUE_CAPACITY],
}

unsafe impl Send for ShmQueue {}
unsafe impl Sync for ShmQueue {}

impl ShmQueue {
    /// Initialize a queue in place; creator side only.
    ///
    /// # Safety
    /// `this` must point to memory valid for a `ShmQueue` that no other
    /// thread or process accesses yet.
    pub unsafe fn init_in_place(this: *mut ShmQueue) {
        unsafe {
            (*this).enqueue_pos = AtomicU64::new(0);
            (*this).dequeue_pos = AtomicU64::new(0);
            let slots = std::ptr::addr_of_mut!((*this).slots) as *mut Slot;
            for i in 0..QUEUE_CAPACITY {
                let slot = slots.add(i);
                (*slot).sequence = AtomicU64::new(i as u64);
                *(*slot).value.get() = MessageContainer::default();
            }
        }
    }

    /// Try to enqueue a container; `false` when the queue is full.
    pub fn try_push(&self, value: &MessageContainer) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos % QUEUE_CAPACITY as u64) as usize];
            let seq = slot.sequence.load(Ordering::Acquire);
            if seq == pos {
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe { *slot.value.get() = *value };
                    slot.sequence.store(pos + 1, Ordering::Release);
                    return true;
                }
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            } else if seq < pos {
                // The slot still holds an unconsumed value: queue full.
                return false;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Try to dequeue a container; `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<MessageContainer> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos % QUEUE_CAPACITY as u64) as usize];
            let seq = slot.sequence.load(Ordering::Acquire);
            if seq == pos + 1 {
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = unsafe { *slot.value.get() };
                    slot.sequence
                        .store(pos + QUEUE_CAPACITY as u64, Ordering::Release);
                    return Some(value);
                }
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            } else if seq <= pos {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let slot = &self.slots[(pos % QUEUE_CAPACITY as u64) as usize];
        slot.sequence.load(Ordering::Acquire) != pos + 1
    }

    /// Drop every queued container.
    pub fn drain(&self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::IpcMessage;

    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Num(u64);
    unsafe impl IpcMessage for Num {
        const ID: u32 = 9;
    }

    fn boxed_queue() -> Box<ShmQueue> {
        let mut boxed: Box<std::mem::MaybeUninit<ShmQueue>> = Box::new(std::mem::MaybeUninit::uninit());
        unsafe {
            ShmQueue::init_in_place(boxed.as_mut_ptr());
            Box::from_raw(Box::into_raw(boxed) as *mut ShmQueue)
        }
    }

    fn container_for(n: u64) -> MessageContainer {
        let mut c = MessageContainer::default();
        c.load(&Num(n));
        c
    }

    #[test]
    fn fifo_order() {
        let q = boxed_queue();
        for i in 0..10 {
            assert!(q.try_push(&container_for(i)));
        }
        for i in 0..10 {
            let c = q.try_pop().unwrap();
            assert_eq!(c.extract::<Num>().unwrap().0, i);
        }
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn full_queue_rejects() {
        let q = boxed_queue();
        for i in 0..QUEUE_CAPACITY as u64 {
            assert!(q.try_push(&container_for(i)));
        }
        assert!(!q.try_push(&container_for(999)));
        assert_eq!(q.try_pop().unwrap().extract::<Num>().unwrap().0, 0);
        assert!(q.try_push(&container_for(999)));
    }

    #[test]
    fn concurrent_producers_and_consumer() {
        let q: &'static ShmQueue = Box::leak(boxed_queue());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        let c = container_for(t * 10_000 + i);
                        while !q.try_push(&c) {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        let mut received = 0;
        while received < 4000 {
            if let Some(c) = q.try_pop() {
                assert!(c.is_good());
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for p in producers {
            p.join().unwrap();
        }
        assert!(q.is_empty());
    }
}
