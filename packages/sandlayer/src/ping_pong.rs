//! Double-buffered state slots.
//!
//! A `PingPong` holds two equally shaped values. One is read while the other
//! is written, and `swap` hands the freshly written slot over to the reader:
//!
//! ```text
//! frame N:   read = A, write = B   →  step(A) → B  →  swap
//! frame N+1: read = B, write = A   →  step(B) → A  →  swap
//! ```
//!
//! The GPU particle buffers, their bind groups and the blur scratch textures
//! all go through this type, so the "never read and write the same slot"
//! invariant lives in one place.

/// Two slots with alternating read/write roles.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    /// Index of the slot currently read from.
    read: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            read: 0,
        }
    }

    /// Build both slots from the same constructor.
    pub fn from_fn(mut make: impl FnMut(usize) -> T) -> Self {
        Self::new(make(0), make(1))
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[1 - self.read]
    }

    pub fn read_mut(&mut self) -> &mut T {
        &mut self.slots[self.read]
    }

    pub fn write_mut(&mut self) -> &mut T {
        &mut self.slots[1 - self.read]
    }

    /// Borrow both slots at once: `(read, write)`.
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.read == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// Index (0 or 1) of the current read slot.
    pub fn read_index(&self) -> usize {
        self.read
    }

    /// The slot just written becomes the read slot.
    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    /// Run `step(read, write)` and swap.
    pub fn apply(&mut self, step: impl FnOnce(&T, &mut T)) {
        let (read, write) = self.split_mut();
        step(read, write);
        self.swap();
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}
