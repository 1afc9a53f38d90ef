use std::cell::UnsafeCell;
use std::fmt;

/// Interior-mutable cell whose exclusivity is guaranteed by the scheduler
/// rather than by a lock.
///
/// A unit and its ports are touched by exactly one worker per cycle: the
/// refcount gate in the graph hands a node to a single thread, and every
/// upstream writer has finished before the node becomes runnable. Outside a
/// cycle only the coordinator or the control thread holding the sole
/// reference may call [`UnsafeMutex::lock`].
pub struct UnsafeMutex<T> {
    data: UnsafeCell<T>,
}

impl<T> UnsafeMutex<T> {
    pub fn new(data: T) -> Self {
        UnsafeMutex {
            data: UnsafeCell::new(data),
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for UnsafeMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for UnsafeMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnsafeMutex { .. }")
    }
}

unsafe impl<T: Send> Send for UnsafeMutex<T> {}
unsafe impl<T: Send> Sync for UnsafeMutex<T> {}
