use crate::types::{HeapPtr, Word, ALIGNMENT, HEADER_WIDTH, MIN_BLOCK_SIZE};
use crate::utils::mem_context::SegmentProvider;

const ALLOCATED: Word = 1;
const SIZE_MASK: Word = !(ALIGNMENT as Word - 1);

pub enum Side {
    Start,
    End,
}

/// Boundary-tagged heap block.
///
/// ```text
/// ptr
///  v
/// [header: size | allocated] [payload .......] [footer: size | allocated]
///  <---------------------------- size ---------------------------------->
/// ```
///
/// Header and footer are identical words. The allocated bit lives in bit 0, since sizes are always
/// multiples of [ALIGNMENT].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub ptr: HeapPtr,
    pub size: usize,
    pub allocated: bool,
}

#[inline]
pub(crate) fn pack(size: usize, allocated: bool) -> Word {
    debug_assert_eq!(size % ALIGNMENT, 0);

    size as Word | if allocated { ALLOCATED } else { 0 }
}

#[inline]
pub(crate) fn unpack(word: Word) -> (usize, bool) {
    ((word & SIZE_MASK) as usize, word & ALLOCATED == ALLOCATED)
}

#[inline]
pub(crate) fn header_of(block: HeapPtr) -> HeapPtr {
    block
}

#[inline]
pub(crate) fn footer_of(block: HeapPtr, size: usize) -> HeapPtr {
    block + (size - HEADER_WIDTH) as u64
}

#[inline]
pub(crate) fn payload_of(block: HeapPtr) -> HeapPtr {
    block + HEADER_WIDTH as u64
}

#[inline]
pub(crate) fn block_of(payload: HeapPtr) -> HeapPtr {
    payload - HEADER_WIDTH as u64
}

impl Block {
    /// Writes both boundary tags. Every change of block boundaries or status goes through here.
    pub fn construct<S: SegmentProvider>(
        ptr: HeapPtr,
        size: usize,
        allocated: bool,
        segment: &mut S,
    ) -> Self {
        debug_assert!(size >= MIN_BLOCK_SIZE);

        let word = pack(size, allocated);
        segment.write_word(header_of(ptr), word);
        segment.write_word(footer_of(ptr, size), word);

        Self {
            ptr,
            size,
            allocated,
        }
    }

    /// Reads a block by its header (`Side::Start`, `ptr` is the block start) or by its footer
    /// (`Side::End`, `ptr` is the first byte after the block).
    pub fn read_at<S: SegmentProvider>(ptr: HeapPtr, side: Side, segment: &S) -> Self {
        match side {
            Side::Start => {
                let (size, allocated) = unpack(segment.read_word(header_of(ptr)));

                Self {
                    ptr,
                    size,
                    allocated,
                }
            }
            Side::End => {
                let (size, allocated) = unpack(segment.read_word(ptr - HEADER_WIDTH as u64));

                Self {
                    ptr: ptr - size as u64,
                    size,
                    allocated,
                }
            }
        }
    }

    #[inline]
    pub fn end(&self) -> HeapPtr {
        self.ptr + self.size as u64
    }

    #[inline]
    pub fn payload(&self) -> HeapPtr {
        payload_of(self.ptr)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size - 2 * HEADER_WIDTH
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::block::{block_of, footer_of, pack, payload_of, unpack, Block, Side};
    use crate::utils::mem_context::{SegmentProvider, VecSegment};

    #[test]
    fn packing_works_fine() {
        assert_eq!(pack(24, false), 24);
        assert_eq!(pack(24, true), 25);
        assert_eq!(unpack(pack(4096, true)), (4096, true));
        assert_eq!(unpack(pack(4096, false)), (4096, false));
        assert_eq!(unpack(pack(1 << 40, true)), (1 << 40, true));
    }

    #[test]
    fn addressing_works_fine() {
        assert_eq!(payload_of(64), 72);
        assert_eq!(block_of(payload_of(64)), 64);
        assert_eq!(footer_of(64, 32), 88);
    }

    #[test]
    fn boundary_tags_are_mirrored() {
        let mut segment = VecSegment::new();
        segment.init_heap_segment(1).unwrap();

        let b1 = Block::construct(0, 48, true, &mut segment);
        let b2 = Block::construct(b1.end(), 32, false, &mut segment);

        assert_eq!(segment.read_word(0), segment.read_word(40));
        assert_eq!(segment.read_word(48), segment.read_word(72));

        assert_eq!(Block::read_at(0, Side::Start, &segment), b1);
        assert_eq!(Block::read_at(b1.end(), Side::End, &segment), b1);
        assert_eq!(Block::read_at(b1.end(), Side::Start, &segment), b2);
        assert_eq!(Block::read_at(b2.end(), Side::End, &segment), b2);

        assert_eq!(b1.payload(), 8);
        assert_eq!(b1.capacity(), 32);
    }
}
