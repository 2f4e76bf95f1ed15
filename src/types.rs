use candid::CandidType;
use serde::Deserialize;
use thiserror::Error;

/// Offset of a byte inside the segment address space.
pub type HeapPtr = u64;
pub type Word = u64;
pub type BucketId = usize;

pub const PAGE_SIZE_BYTES: usize = 64 * 1024;

pub const ALIGNMENT: usize = 8;
pub const HEADER_WIDTH: usize = std::mem::size_of::<Word>();
pub const MIN_BLOCK_SIZE: usize = 3 * ALIGNMENT;

/**
The allocator keeps a segregated explicit free list with 13 buckets. Bucket `i` holds free blocks
whose size, measured in alignment units, falls into `[2 ** i, 2 ** (i + 1))`. The last bucket has
no upper bound and catches everything that is bigger than the previous one.

Since the minimum block is 24 bytes (3 alignment units), bucket 0 stays empty in practice.
 */
pub const NUM_BUCKETS: usize = 13;

// one page must always be enough for any request below the top bucket
const _: () = assert!(PAGE_SIZE_BYTES >= ALIGNMENT << (NUM_BUCKETS - 1));

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("out of memory")]
pub struct OutOfMemory;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("access of {len} bytes at offset {offset} is out of bounds of {ptr} (capacity {capacity})")]
pub struct OutOfBounds {
    pub ptr: HeapPtr,
    pub offset: usize,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("block {block} has header {header:#x} but footer {footer:#x}")]
    HeaderFooterMismatch {
        block: HeapPtr,
        header: Word,
        footer: Word,
    },
    #[error("block {block} has invalid size {size}")]
    MalformedBlock { block: HeapPtr, size: usize },
    #[error("free blocks {first} and {second} are physical neighbors")]
    AdjacentFreeBlocks { first: HeapPtr, second: HeapPtr },
    #[error("block {block} of size {size} is listed in bucket {bucket}, expected {expected}")]
    WrongBucket {
        block: HeapPtr,
        size: usize,
        bucket: BucketId,
        expected: BucketId,
    },
    #[error("bucket {bucket} has a broken link at block {block}")]
    BrokenLink { bucket: BucketId, block: HeapPtr },
    #[error("descriptor of block {block} disagrees with its boundary tags")]
    DescriptorMismatch { block: HeapPtr },
    #[error("{listed} blocks are listed as free, but the heap holds {walked}")]
    FreeCountMismatch { listed: usize, walked: usize },
    #[error("counters report {counted} {kind} bytes, but the heap holds {walked}")]
    CounterMismatch {
        kind: &'static str,
        counted: u64,
        walked: u64,
    },
}

#[derive(CandidType, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub pages: u64,
    pub heap_size: u64,
    pub allocated_bytes: u64,
    /// Sum of sizes callers asked for, the rest of `allocated_bytes` is overhead and rounding
    pub requested_bytes: u64,
    pub free_bytes: u64,
    pub allocated_blocks: u64,
    pub free_blocks: u64,
    pub largest_free_block: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub ptr: HeapPtr,
    pub size: usize,
    pub allocated: bool,
}
