use crate::types::{HeapPtr, OutOfMemory, Word, PAGE_SIZE_BYTES};

/// Page-granular memory the heap grows into.
///
/// The heap occupies one contiguous span of the provider's address space, starting at the base
/// returned by [SegmentProvider::init_heap_segment] and growing only at its high end.
pub trait SegmentProvider {
    /// Drops the previous heap and commits `initial_pages` fresh pages, returning the heap base.
    fn init_heap_segment(&mut self, initial_pages: u64) -> Result<HeapPtr, OutOfMemory>;

    /// Appends `pages` fresh pages right after the current heap end and returns where they start.
    /// Either every page gets committed or none.
    fn extend_heap_segment(&mut self, pages: u64) -> Result<HeapPtr, OutOfMemory>;

    /// Pages currently committed to the heap.
    fn size_pages(&self) -> u64;

    fn read(&self, offset: HeapPtr, buf: &mut [u8]);
    fn write(&mut self, offset: HeapPtr, buf: &[u8]);

    fn read_word(&self, offset: HeapPtr) -> Word {
        let mut buf = [0u8; std::mem::size_of::<Word>()];
        self.read(offset, &mut buf);

        Word::from_le_bytes(buf)
    }

    fn write_word(&mut self, offset: HeapPtr, word: Word) {
        self.write(offset, &word.to_le_bytes());
    }
}

/// In-process heap segment, optionally capped at some page count to emulate exhaustion.
#[derive(Default, Clone)]
pub struct VecSegment {
    data: Vec<u8>,
    max_pages: Option<u64>,
    extensions: usize,
}

impl VecSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pages(max_pages: u64) -> Self {
        Self {
            max_pages: Some(max_pages),
            ..Self::default()
        }
    }

    /// Number of successful [SegmentProvider::extend_heap_segment] calls since the last reset.
    pub fn extensions(&self) -> usize {
        self.extensions
    }

    fn commit(&mut self, pages: u64) -> Result<HeapPtr, OutOfMemory> {
        let prev_pages = self.size_pages();
        let new_pages = prev_pages.checked_add(pages).ok_or(OutOfMemory)?;

        if matches!(self.max_pages, Some(max) if new_pages > max) {
            return Err(OutOfMemory);
        }

        let new_len = usize::try_from(new_pages)
            .ok()
            .and_then(|it| it.checked_mul(PAGE_SIZE_BYTES))
            .ok_or(OutOfMemory)?;

        self.data.resize(new_len, 0);

        Ok(prev_pages * PAGE_SIZE_BYTES as u64)
    }
}

impl SegmentProvider for VecSegment {
    fn init_heap_segment(&mut self, initial_pages: u64) -> Result<HeapPtr, OutOfMemory> {
        self.data.clear();
        self.extensions = 0;

        self.commit(initial_pages)
    }

    fn extend_heap_segment(&mut self, pages: u64) -> Result<HeapPtr, OutOfMemory> {
        let start = self.commit(pages)?;
        self.extensions += 1;

        Ok(start)
    }

    fn size_pages(&self) -> u64 {
        (self.data.len() / PAGE_SIZE_BYTES) as u64
    }

    fn read(&self, offset: HeapPtr, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
    }

    fn write(&mut self, offset: HeapPtr, buf: &[u8]) {
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
    }
}

/// Heap segment living in the canister's stable memory. The heap starts wherever stable memory
/// ended at init time, so anything stored below stays untouched.
#[cfg(target_family = "wasm")]
#[derive(Default, Clone)]
pub struct StableSegment {
    base_page: u64,
    pages: u64,
}

#[cfg(target_family = "wasm")]
impl StableSegment {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_family = "wasm")]
impl SegmentProvider for StableSegment {
    fn init_heap_segment(&mut self, initial_pages: u64) -> Result<HeapPtr, OutOfMemory> {
        use ic_cdk::api::stable::{stable64_grow, stable64_size};

        // stable memory can't shrink, the old heap pages are simply abandoned
        self.base_page = stable64_size();
        self.pages = 0;

        if initial_pages > 0 {
            stable64_grow(initial_pages).map_err(|_| OutOfMemory)?;
            self.pages = initial_pages;
        }

        Ok(self.base_page * PAGE_SIZE_BYTES as u64)
    }

    fn extend_heap_segment(&mut self, pages: u64) -> Result<HeapPtr, OutOfMemory> {
        use ic_cdk::api::stable::{stable64_grow, stable64_size};

        let expected_page = self.base_page + self.pages;
        if stable64_size() != expected_page {
            log::warn!(
                "stable memory was grown outside of the heap ({} pages instead of {})",
                stable64_size(),
                expected_page
            );

            return Err(OutOfMemory);
        }

        let prev_pages = stable64_grow(pages).map_err(|_| OutOfMemory)?;
        self.pages += pages;

        Ok(prev_pages * PAGE_SIZE_BYTES as u64)
    }

    fn size_pages(&self) -> u64 {
        self.pages
    }

    fn read(&self, offset: HeapPtr, buf: &mut [u8]) {
        ic_cdk::api::stable::stable64_read(offset, buf)
    }

    fn write(&mut self, offset: HeapPtr, buf: &[u8]) {
        ic_cdk::api::stable::stable64_write(offset, buf)
    }
}

#[cfg(target_family = "wasm")]
pub type DefaultSegment = StableSegment;

#[cfg(not(target_family = "wasm"))]
pub type DefaultSegment = VecSegment;

#[cfg(test)]
mod tests {
    use crate::utils::mem_context::{SegmentProvider, VecSegment};
    use crate::PAGE_SIZE_BYTES;

    #[test]
    fn grow_read_write_work_fine() {
        let mut segment = VecSegment::new();
        assert_eq!(segment.init_heap_segment(0), Ok(0));
        assert_eq!(segment.size_pages(), 0);

        assert_eq!(segment.extend_heap_segment(2), Ok(0));
        assert_eq!(segment.extend_heap_segment(1), Ok(2 * PAGE_SIZE_BYTES as u64));
        assert_eq!(segment.size_pages(), 3);
        assert_eq!(segment.extensions(), 2);

        let buf = [10u8; PAGE_SIZE_BYTES * 2];
        segment.write(25, &buf);

        let mut buf1 = [0u8; PAGE_SIZE_BYTES * 2 - 50];
        segment.read(50, &mut buf1);
        assert_eq!(buf[25..PAGE_SIZE_BYTES * 2 - 25], buf1);

        segment.write_word(8, 1337);
        assert_eq!(segment.read_word(8), 1337);
    }

    #[test]
    fn page_limit_is_respected() {
        let mut segment = VecSegment::with_max_pages(3);
        segment.init_heap_segment(1).unwrap();

        assert!(segment.extend_heap_segment(3).is_err());
        assert_eq!(segment.size_pages(), 1);
        assert_eq!(segment.extensions(), 0);

        assert!(segment.extend_heap_segment(2).is_ok());
        assert!(segment.extend_heap_segment(1).is_err());

        assert_eq!(segment.init_heap_segment(0), Ok(0));
        assert_eq!(segment.size_pages(), 0);
    }
}
