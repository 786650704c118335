//! Module `spinlock` implement read-write-spinlock, useful for
//! non-blocking concurrency.
//!
//! When a critical section is going to be quick and short, blocking
//! primitives cost more than they protect. The [Spinlock] type keeps a
//! single atomic word: bits [0-29] count active readers, bit 30 is the
//! latch a writer raises to stop new readers, bit 31 is the lock the
//! writer takes once the last reader has left. Both readers and writers
//! spin, never park.

use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

/// Spinlock implements latch-and-spin mechanism for non-blocking
/// concurrency.
pub struct Spinlock<T> {
    latchlock: AtomicU32,
    value: T,
}

impl<T> Spinlock<T> {
    const LATCH_FLAG: u32 = 0x40000000;
    const LOCK_FLAG: u32 = 0x80000000;
    const LATCH_LOCK_FLAG: u32 = 0xC0000000;
    const READERS_FLAG: u32 = 0x3FFFFFFF;

    /// Create a new Spinlock over `value`.
    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latchlock: AtomicU32::new(0),
            value,
        }
    }

    /// Acquire latch for read permission.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_LOCK_FLAG) == 0 {
                // latch is not acquired by a writer
                if self
                    .latchlock
                    .compare_exchange(old, old + 1, SeqCst, SeqCst)
                    .is_ok()
                {
                    break ReadGuard { door: self };
                }
            }
        }
    }

    /// Acquire latch for write permission.
    pub fn write(&self) -> WriteGuard<T> {
        // acquire latch
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_FLAG) == 0 {
                if (old & Self::LOCK_FLAG) != 0 {
                    panic!("if latch is off, lock can't be on");
                }
                let new = old | Self::LATCH_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
        }
        // wait for readers to drain, then lock
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::READERS_FLAG) == 0 {
                let new = old | Self::LOCK_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    let door = unsafe {
                        let door = self as *const Self as *mut Self;
                        door.as_mut().unwrap()
                    };
                    break WriteGuard { door };
                }
                panic!("latch is acquired, ZERO readers, but unable to lock");
            }
        }
    }
}

/// Type to handle read-latch, the latch is released when value goes out
/// of scope.
pub struct ReadGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

/// Type to handle write-latch, the lock is released when value goes out
/// of scope.
pub struct WriteGuard<'a, T> {
    door: &'a mut Spinlock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.door.value
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        let old = self.door.latchlock.load(SeqCst);
        if (old & Spinlock::<T>::READERS_FLAG) > 0 {
            panic!("can't have active readers, when lock is held");
        }
        if self
            .door
            .latchlock
            .compare_exchange(old, 0, SeqCst, SeqCst)
            .is_err()
        {
            panic!("can't have readers/writers to modify when locked");
        }
    }
}

#[cfg(test)]
#[path = "spinlock_test.rs"]
mod spinlock_test;
