use crate::mem::block::{block_of, footer_of, unpack, Block, Side};
use crate::mem::descriptor::{BlockDescriptor, DescriptorArena, Prev};
use crate::mem::free_list::{bucket_index, SegregatedFreeList};
use crate::types::{
    BlockInfo, HeapPtr, HeapStats, InvariantViolation, OutOfBounds, OutOfMemory, ALIGNMENT,
    HEADER_WIDTH, MIN_BLOCK_SIZE, NUM_BUCKETS, PAGE_SIZE_BYTES,
};
use crate::utils::math::{div_ceil, round_up};
use crate::utils::mem_context::SegmentProvider;
use std::fmt::{Debug, Formatter};

/// Segregated explicit free list allocator over a page-granular heap segment.
///
/// Blocks carry boundary tags in the heap itself, while free-list links live in an out-of-band
/// descriptor arena. Freed blocks are immediately coalesced with their free physical neighbors,
/// so the heap never holds two adjacent free blocks.
pub struct Allocator<S: SegmentProvider> {
    segment: S,
    base: HeapPtr,
    end: HeapPtr,
    free_list: SegregatedFreeList,
    descriptors: DescriptorArena,
    allocated_size: u64,
    free_size: u64,
}

impl<S: SegmentProvider> Allocator<S> {
    pub fn new(segment: S) -> Self {
        let mut this = Self {
            segment,
            base: 0,
            end: 0,
            free_list: SegregatedFreeList::default(),
            descriptors: DescriptorArena::default(),
            allocated_size: 0,
            free_size: 0,
        };

        this.init();

        this
    }

    /// Same as [Allocator::new], but commits `pages` upfront as a single free block.
    pub fn with_initial_pages(segment: S, pages: u64) -> Result<Self, OutOfMemory> {
        let mut this = Self::new(segment);
        this.reset(pages)?;

        Ok(this)
    }

    /// Forgets every block and starts over with an empty heap.
    pub fn init(&mut self) {
        self.reset(0)
            .unwrap_or_else(|_| unreachable!("An empty heap segment can always be initialized"));
    }

    fn reset(&mut self, pages: u64) -> Result<(), OutOfMemory> {
        let base = self.segment.init_heap_segment(pages)?;
        let heap_size = pages as usize * PAGE_SIZE_BYTES;

        self.base = base;
        self.end = base + heap_size as u64;
        self.free_list.reset();
        self.descriptors.clear();
        self.allocated_size = 0;
        self.free_size = 0;

        if heap_size > 0 {
            let block = Block::construct(base, heap_size, false, &mut self.segment);
            self.free_list
                .insert(block.ptr, block.size, &mut self.descriptors);
            self.free_size = heap_size as u64;
        }

        log::debug!("Heap initialized at {} with {} pages", base, pages);

        Ok(())
    }

    pub fn allocate(&mut self, size: usize) -> Result<HeapPtr, OutOfMemory> {
        let block_size = Self::block_size_for(size).ok_or(OutOfMemory)?;

        let free_block = match self.find_fit(block_size) {
            Some(it) => it,
            None => self.grow(block_size)?,
        };

        let block = self.split(free_block, block_size);
        self.descriptors
            .set(block.ptr, BlockDescriptor::Allocated { requested: size });

        self.free_size -= block.size as u64;
        self.allocated_size += block.size as u64;

        log::trace!("Allocated {} bytes at {} (block of {})", size, block.payload(), block.size);

        Ok(block.payload())
    }

    /// Releases a block returned by [Allocator::allocate] or [Allocator::reallocate].
    /// `None` is a no-op.
    pub fn free(&mut self, ptr: Option<HeapPtr>) {
        let Some(ptr) = ptr else {
            return;
        };

        let Some(block) = self.allocated_block_of(ptr) else {
            return;
        };

        self.descriptors.take(block.ptr);
        self.allocated_size -= block.size as u64;
        self.free_size += block.size as u64;

        let block = Block::construct(block.ptr, block.size, false, &mut self.segment);
        let merged = self.coalesce(block);

        self.free_list
            .insert(merged.ptr, merged.size, &mut self.descriptors);

        log::trace!(
            "Freed {} (merged into a free block of {} at {})",
            ptr,
            merged.size,
            merged.ptr
        );
    }

    /// Resizes an allocation, preserving its contents up to the smaller of both sizes.
    ///
    /// `None` behaves like [Allocator::allocate], a zero `new_size` behaves like
    /// [Allocator::free] and yields `None`. If a new block can't be allocated, the old one stays
    /// valid and untouched.
    pub fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        new_size: usize,
    ) -> Result<Option<HeapPtr>, OutOfMemory> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size).map(Some);
        };

        if new_size == 0 {
            self.free(Some(ptr));

            return Ok(None);
        }

        let Some(block) = self.allocated_block_of(ptr) else {
            return Ok(None);
        };

        let needed = Self::block_size_for(new_size).ok_or(OutOfMemory)?;
        if needed <= block.size {
            self.descriptors
                .set(block.ptr, BlockDescriptor::Allocated { requested: new_size });

            return Ok(Some(ptr));
        }

        let new_ptr = self.allocate(new_size)?;

        let mut data = vec![0u8; block.capacity().min(new_size)];
        self.segment.read(ptr, &mut data);
        self.segment.write(new_ptr, &data);

        self.free(Some(ptr));

        log::trace!("Reallocated {} to {} ({} bytes)", ptr, new_ptr, new_size);

        Ok(Some(new_ptr))
    }

    /// Usable bytes behind `ptr`, at least what was requested.
    pub fn capacity(&self, ptr: HeapPtr) -> usize {
        self.allocated_block_of(ptr)
            .map(|it| it.capacity())
            .unwrap_or_default()
    }

    pub fn read(&self, ptr: HeapPtr, offset: usize, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        self.check_access(ptr, offset, buf.len())?;
        self.segment.read(ptr + offset as u64, buf);

        Ok(())
    }

    pub fn write(&mut self, ptr: HeapPtr, offset: usize, buf: &[u8]) -> Result<(), OutOfBounds> {
        self.check_access(ptr, offset, buf.len())?;
        self.segment.write(ptr + offset as u64, buf);

        Ok(())
    }

    pub fn get_allocated_size(&self) -> u64 {
        self.allocated_size
    }

    pub fn get_free_size(&self) -> u64 {
        self.free_size
    }

    pub fn heap_base(&self) -> HeapPtr {
        self.base
    }

    pub fn heap_end(&self) -> HeapPtr {
        self.end
    }

    pub fn segment(&self) -> &S {
        &self.segment
    }

    /// Diagnostic walk over every block of the heap, in address order.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let mut result = Vec::new();
        let mut ptr = self.base;

        while ptr < self.end {
            let block = Block::read_at(ptr, Side::Start, &self.segment);
            if block.size < MIN_BLOCK_SIZE {
                break;
            }

            result.push(BlockInfo {
                ptr: block.ptr,
                size: block.size,
                allocated: block.allocated,
            });

            ptr = block.end();
        }

        result
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            pages: self.segment.size_pages(),
            heap_size: self.end - self.base,
            ..HeapStats::default()
        };

        for block in self.blocks() {
            if block.allocated {
                if let Some(BlockDescriptor::Allocated { requested }) =
                    self.descriptors.get(block.ptr)
                {
                    stats.requested_bytes += requested as u64;
                }

                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size as u64;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size as u64;
                stats.largest_free_block = stats.largest_free_block.max(block.size as u64);
            }
        }

        stats
    }

    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(_) => true,
            Err(e) => {
                log::error!("Heap validation failed: {}", e);

                false
            }
        }
    }

    /// Walks the whole heap and every bucket, checking boundary tags, coalescing, bucket
    /// membership, list links and byte counters.
    pub fn check(&self) -> Result<HeapStats, InvariantViolation> {
        let mut stats = HeapStats {
            pages: self.segment.size_pages(),
            heap_size: self.end - self.base,
            ..HeapStats::default()
        };

        let mut ptr = self.base;
        let mut prev_free = None;

        while ptr < self.end {
            let header = self.segment.read_word(ptr);
            let (size, allocated) = unpack(header);

            if size < MIN_BLOCK_SIZE || ptr + size as u64 > self.end {
                return Err(InvariantViolation::MalformedBlock { block: ptr, size });
            }

            let footer = self.segment.read_word(footer_of(ptr, size));
            if header != footer {
                return Err(InvariantViolation::HeaderFooterMismatch {
                    block: ptr,
                    header,
                    footer,
                });
            }

            match (allocated, self.descriptors.get(ptr)) {
                (true, Some(BlockDescriptor::Allocated { requested })) => {
                    stats.requested_bytes += requested as u64;
                }
                (false, Some(BlockDescriptor::Free(_))) => {}
                _ => return Err(InvariantViolation::DescriptorMismatch { block: ptr }),
            }

            if allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size as u64;
                prev_free = None;
            } else {
                if let Some(first) = prev_free {
                    return Err(InvariantViolation::AdjacentFreeBlocks { first, second: ptr });
                }

                stats.free_blocks += 1;
                stats.free_bytes += size as u64;
                stats.largest_free_block = stats.largest_free_block.max(size as u64);
                prev_free = Some(ptr);
            }

            ptr += size as u64;
        }

        if self.descriptors.len() as u64 != stats.allocated_blocks + stats.free_blocks {
            return Err(InvariantViolation::DescriptorMismatch { block: self.end });
        }

        let walked = stats.free_blocks as usize;
        let mut listed = 0usize;

        for bucket in 0..NUM_BUCKETS {
            let mut expected_prev = Prev::Head(bucket);
            let mut cur = self.free_list.head(bucket);

            while let Some(block) = cur {
                listed += 1;
                if listed > walked {
                    return Err(InvariantViolation::FreeCountMismatch { listed, walked });
                }

                let in_heap = block >= self.base && block < self.end;
                let links = match self.descriptors.get(block) {
                    Some(BlockDescriptor::Free(links)) if in_heap => links,
                    _ => return Err(InvariantViolation::BrokenLink { bucket, block }),
                };

                if links.prev != expected_prev {
                    return Err(InvariantViolation::BrokenLink { bucket, block });
                }

                let (size, _) = unpack(self.segment.read_word(block));
                let expected = bucket_index(size);
                if expected != bucket {
                    return Err(InvariantViolation::WrongBucket {
                        block,
                        size,
                        bucket,
                        expected,
                    });
                }

                expected_prev = Prev::Node(block);
                cur = links.succ;
            }
        }

        if listed != walked {
            return Err(InvariantViolation::FreeCountMismatch { listed, walked });
        }

        if self.allocated_size != stats.allocated_bytes {
            return Err(InvariantViolation::CounterMismatch {
                kind: "allocated",
                counted: self.allocated_size,
                walked: stats.allocated_bytes,
            });
        }

        if self.free_size != stats.free_bytes {
            return Err(InvariantViolation::CounterMismatch {
                kind: "free",
                counted: self.free_size,
                walked: stats.free_bytes,
            });
        }

        Ok(stats)
    }

    fn block_size_for(size: usize) -> Option<usize> {
        let size = round_up(size.checked_add(2 * HEADER_WIDTH)?, ALIGNMENT)?;

        Some(size.max(MIN_BLOCK_SIZE))
    }

    /// First fit, starting from the request's own bucket and escalating to bigger ones.
    /// The found block is already unlinked.
    fn find_fit(&mut self, size: usize) -> Option<Block> {
        for bucket in bucket_index(size)..NUM_BUCKETS {
            let found = self
                .free_list
                .iter(bucket, &self.descriptors)
                .map(|ptr| Block::read_at(ptr, Side::Start, &self.segment))
                .find(|it| it.size >= size);

            if let Some(block) = found {
                self.free_list
                    .remove(block.ptr, bucket, &mut self.descriptors);

                return Some(block);
            }
        }

        None
    }

    /// Carves an allocated block of exactly `size` bytes out of an unlinked free block, pushing
    /// the remainder back to the free list. Remainders too small to be a block stay attached.
    fn split(&mut self, block: Block, size: usize) -> Block {
        let remainder = block.size - size;

        if remainder < MIN_BLOCK_SIZE {
            return Block::construct(block.ptr, block.size, true, &mut self.segment);
        }

        let allocated = Block::construct(block.ptr, size, true, &mut self.segment);
        let rest = Block::construct(allocated.end(), remainder, false, &mut self.segment);

        self.free_list
            .insert(rest.ptr, rest.size, &mut self.descriptors);

        allocated
    }

    /// Extends the heap so that a block of `size` bytes fits, absorbing a free trailing block if
    /// there is one. The returned block is not linked into the free list.
    fn grow(&mut self, size: usize) -> Result<Block, OutOfMemory> {
        let trailing = self.trailing_free_block();
        let trailing_size = trailing.map_or(0, |it| it.size);

        let pages = if bucket_index(size) == NUM_BUCKETS - 1 {
            div_ceil(size.saturating_sub(trailing_size), PAGE_SIZE_BYTES).max(1)
        } else {
            1
        };

        let start = self
            .segment
            .extend_heap_segment(pages as u64)
            .map_err(|e| {
                log::warn!("Unable to grow the heap by {} pages for {} bytes", pages, size);
                e
            })?;

        debug_assert_eq!(start, self.end);

        let grown = pages * PAGE_SIZE_BYTES;
        self.end += grown as u64;
        self.free_size += grown as u64;

        let block = match trailing {
            Some(last) => {
                self.eject(last);
                Block::construct(last.ptr, last.size + grown, false, &mut self.segment)
            }
            None => Block::construct(start, grown, false, &mut self.segment),
        };

        log::debug!("Heap grown by {} pages, free block of {} at {}", pages, block.size, block.ptr);

        Ok(block)
    }

    fn trailing_free_block(&self) -> Option<Block> {
        if self.end == self.base {
            return None;
        }

        let last = Block::read_at(self.end, Side::End, &self.segment);

        (!last.allocated).then_some(last)
    }

    /// Merges a just freed (and not yet listed) block with its free physical neighbors.
    /// Absorbed neighbors are unlinked before the merged block's tags get written.
    fn coalesce(&mut self, block: Block) -> Block {
        let prev = if block.ptr == self.base {
            None
        } else {
            Some(Block::read_at(block.ptr, Side::End, &self.segment)).filter(|it| !it.allocated)
        };

        let next = if block.end() == self.end {
            None
        } else {
            Some(Block::read_at(block.end(), Side::Start, &self.segment))
                .filter(|it| !it.allocated)
        };

        let (ptr, size) = match (prev, next) {
            (None, None) => return block,
            (None, Some(next)) => {
                self.eject(next);

                (block.ptr, block.size + next.size)
            }
            (Some(prev), None) => {
                self.eject(prev);

                (prev.ptr, prev.size + block.size)
            }
            (Some(prev), Some(next)) => {
                self.eject(prev);
                self.eject(next);

                (prev.ptr, prev.size + block.size + next.size)
            }
        };

        Block::construct(ptr, size, false, &mut self.segment)
    }

    fn eject(&mut self, block: Block) {
        self.free_list
            .remove(block.ptr, bucket_index(block.size), &mut self.descriptors);
    }

    fn allocated_block_of(&self, ptr: HeapPtr) -> Option<Block> {
        if ptr < self.base + HEADER_WIDTH as u64
            || ptr >= self.end
            || (ptr - self.base) % ALIGNMENT as u64 != 0
        {
            contract_violation!(
                "Pointer {} does not belong to the heap [{}, {})",
                ptr,
                self.base,
                self.end
            );

            return None;
        }

        let block = block_of(ptr);

        match self.descriptors.get(block) {
            Some(BlockDescriptor::Allocated { .. }) => {
                Some(Block::read_at(block, Side::Start, &self.segment))
            }
            Some(BlockDescriptor::Free(_)) => {
                contract_violation!("Pointer {} is already free", ptr);

                None
            }
            None => {
                contract_violation!("Pointer {} was not returned by the allocator", ptr);

                None
            }
        }
    }

    fn check_access(&self, ptr: HeapPtr, offset: usize, len: usize) -> Result<(), OutOfBounds> {
        let capacity = self.capacity(ptr);

        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(OutOfBounds {
                ptr,
                offset,
                len,
                capacity,
            }),
        }
    }
}

impl<S: SegmentProvider> Debug for Allocator<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Allocator");

        d.field("heap", &(self.base..self.end))
            .field("total_allocated", &self.allocated_size)
            .field("total_free", &self.free_size);

        for bucket in 0..NUM_BUCKETS {
            let blocks: Vec<_> = self
                .free_list
                .iter(bucket, &self.descriptors)
                .map(|ptr| {
                    let block = Block::read_at(ptr, Side::Start, &self.segment);
                    format!("{}: {}", block.ptr, block.size)
                })
                .collect();

            d.field(
                format!("bucket {} (from {} bytes)", bucket, ALIGNMENT << bucket).as_str(),
                &blocks,
            );
        }

        d.finish()
    }
}
