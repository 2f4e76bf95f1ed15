//! Dynamic memory allocator over a heap that grows in whole pages.
//!
//! Blocks are described by mirrored header/footer words stored in the heap itself, free blocks
//! are tracked by a segregated explicit free list with 13 exponential size classes, and freed
//! blocks are immediately coalesced with their free physical neighbors.
//!
//! Use [Allocator] directly to own an allocation context, or the functions of this module to
//! work with a per-thread one backed by [DefaultSegment] (stable memory on the Internet Computer,
//! a plain vector elsewhere).

#[macro_use]
mod macros;

pub mod mem;
pub mod types;
pub mod utils;

use std::cell::RefCell;

pub use crate::mem::allocator::Allocator;
pub use crate::types::{
    BlockInfo, HeapPtr, HeapStats, InvariantViolation, OutOfBounds, OutOfMemory, ALIGNMENT,
    MIN_BLOCK_SIZE, NUM_BUCKETS, PAGE_SIZE_BYTES,
};
pub use crate::utils::mem_context::{DefaultSegment, SegmentProvider, VecSegment};

#[cfg(target_family = "wasm")]
pub use crate::utils::mem_context::StableSegment;

thread_local! {
    static ALLOCATOR: RefCell<Option<Allocator<DefaultSegment>>> = RefCell::new(None);
}

fn with_allocator<R>(f: impl FnOnce(&mut Allocator<DefaultSegment>) -> R) -> R {
    ALLOCATOR.with(|it| match it.borrow_mut().as_mut() {
        Some(allocator) => f(allocator),
        None => unreachable!("Allocator is not initialized"),
    })
}

/// Creates the per-thread allocator, or wipes it if it already exists.
pub fn init() {
    ALLOCATOR.with(|it| {
        let mut slot = it.borrow_mut();

        if let Some(allocator) = slot.as_mut() {
            allocator.init();
            return;
        }

        *slot = Some(Allocator::new(DefaultSegment::default()));
    })
}

pub fn allocate(size: usize) -> Result<HeapPtr, OutOfMemory> {
    with_allocator(|it| it.allocate(size))
}

pub fn free(ptr: Option<HeapPtr>) {
    with_allocator(|it| it.free(ptr))
}

pub fn reallocate(ptr: Option<HeapPtr>, new_size: usize) -> Result<Option<HeapPtr>, OutOfMemory> {
    with_allocator(|it| it.reallocate(ptr, new_size))
}

pub fn read(ptr: HeapPtr, offset: usize, buf: &mut [u8]) -> Result<(), OutOfBounds> {
    with_allocator(|it| it.read(ptr, offset, buf))
}

pub fn write(ptr: HeapPtr, offset: usize, buf: &[u8]) -> Result<(), OutOfBounds> {
    with_allocator(|it| it.write(ptr, offset, buf))
}

pub fn validate() -> bool {
    with_allocator(|it| it.validate())
}

pub fn get_allocated_size() -> u64 {
    with_allocator(|it| it.get_allocated_size())
}

pub fn get_free_size() -> u64 {
    with_allocator(|it| it.get_free_size())
}

pub fn _debug_print_allocator() {
    with_allocator(|it| utils::isoprint(&format!("{:?}", it)))
}

#[cfg(test)]
mod tests {
    use crate::{
        _debug_print_allocator, allocate, free, get_allocated_size, get_free_size, init, read,
        reallocate, validate, write,
    };

    #[test]
    fn global_allocator_works_fine() {
        init();

        let a = allocate(100).unwrap();
        write(a, 0, &[1, 3, 3, 7]).unwrap();

        let b = reallocate(Some(a), 10_000).unwrap().unwrap();
        let mut buf = [0u8; 4];
        read(b, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 3, 3, 7]);

        assert!(get_allocated_size() > 10_000);
        assert!(validate());

        _debug_print_allocator();

        free(Some(b));
        assert_eq!(get_allocated_size(), 0);

        // a second init wipes the heap
        allocate(100).unwrap();
        init();
        assert_eq!(get_allocated_size(), 0);
        assert_eq!(get_free_size(), 0);
    }
}
