//! Generational handles
//!
//! A handle is a slot index paired with a generation. Releasing a slot bumps
//! its generation, so a stale handle to a reused slot never validates.

use alloc::vec::Vec;
use core::marker::PhantomData;

// ============================================================================
// Handle
// ============================================================================

/// A typed, generational handle.
///
/// The type parameter only prevents mixing handles of different kinds; it is
/// never stored.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Invalid handle.
    pub const INVALID: Self = Self::from_raw_parts(u32::MAX, 0);

    /// Builds a handle from its raw parts.
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Is this the invalid handle.
    pub const fn is_invalid(&self) -> bool {
        self.index == u32::MAX
    }
}

// Manual impls: derives would require `T: Clone` etc.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> core::hash::Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> core::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

// ============================================================================
// Handle Allocator
// ============================================================================

/// Hands out generational handles and recycles released slots.
#[derive(Debug)]
pub struct HandleAllocator<T> {
    /// Current generation of each slot.
    generations: Vec<u32>,
    /// Released slots, reused LIFO.
    free_slots: Vec<u32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HandleAllocator<T> {
    /// Creates an empty allocator.
    pub const fn new() -> Self {
        Self {
            generations: Vec::new(),
            free_slots: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Allocates a handle, reusing a released slot when one exists.
    pub fn allocate(&mut self) -> Handle<T> {
        match self.free_slots.pop() {
            Some(index) => Handle::from_raw_parts(index, self.generations[index as usize]),
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                Handle::from_raw_parts(index, 0)
            },
        }
    }

    /// Releases a handle.
    ///
    /// Returns `false` for stale or foreign handles.
    pub fn release(&mut self, handle: Handle<T>) -> bool {
        if !self.contains(handle) {
            return false;
        }

        let slot = &mut self.generations[handle.index() as usize];
        *slot = slot.wrapping_add(1);
        self.free_slots.push(handle.index());
        true
    }

    /// Checks that a handle refers to a live slot.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        if handle.is_invalid() {
            return false;
        }
        match self.generations.get(handle.index() as usize) {
            Some(&generation) => {
                generation == handle.generation() && !self.free_slots.contains(&handle.index())
            },
            None => false,
        }
    }

    /// Number of live handles.
    pub fn live_count(&self) -> usize {
        self.generations.len() - self.free_slots.len()
    }

    /// Number of slots ever created (live or released).
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }
}

impl<T> Default for HandleAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn test_released_handle_is_stale() {
        let mut handles = HandleAllocator::<Marker>::new();
        let a = handles.allocate();
        assert!(handles.contains(a));
        assert!(handles.release(a));
        assert!(!handles.contains(a));
        assert!(!handles.release(a));

        let b = handles.allocate();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!handles.contains(a));
        assert!(handles.contains(b));
    }

    #[test]
    fn test_live_count() {
        let mut handles = HandleAllocator::<Marker>::new();
        let a = handles.allocate();
        let _b = handles.allocate();
        assert_eq!(handles.live_count(), 2);
        handles.release(a);
        assert_eq!(handles.live_count(), 1);
        assert_eq!(handles.slot_count(), 2);
        assert!(Handle::<Marker>::INVALID.is_invalid());
        assert!(!handles.contains(Handle::INVALID));
        assert!(!handles.release(Handle::INVALID));
    }
}
