use std::collections::HashMap;

pub const PAGE_SIZE: u64 = 0x1000;

/// Byte value of physical memory nothing has written.
pub const OPEN_BUS: u8 = 0xFF;

/// Sparse physical address space backed by 4KiB pages created on first write.
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    pages: HashMap<u64, Box<[u8]>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_into(&self, address: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            let addr = address.wrapping_add(i as u64);
            *b = self
                .pages
                .get(&(addr / PAGE_SIZE))
                .map_or(OPEN_BUS, |page| page[(addr % PAGE_SIZE) as usize]);
        }
    }

    pub fn read(&self, address: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(address, &mut out);
        out
    }

    pub fn write(&mut self, address: u64, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            let addr = address.wrapping_add(i as u64);
            let page = self
                .pages
                .entry(addr / PAGE_SIZE)
                .or_insert_with(|| vec![OPEN_BUS; PAGE_SIZE as usize].into_boxed_slice());
            page[(addr % PAGE_SIZE) as usize] = b;
        }
    }

    pub fn fill(&mut self, address: u64, len: usize, value: u8) {
        self.write(address, &vec![value; len]);
    }

    /// First candidate address in `[start, start + size)` where `pattern` fits and matches.
    ///
    /// Candidates are `step` apart, counted from `start` (or from the last position the
    /// pattern fits when scanning backwards). `skip` matches are passed over first.
    pub fn search(
        &self,
        start: u64,
        size: u64,
        pattern: &[u8],
        step: u64,
        skip: u32,
        backwards: bool,
    ) -> Option<u64> {
        let len = pattern.len() as u64;
        if len == 0 || len > size || step == 0 {
            return None;
        }
        let last = start.checked_add(size - len)?;
        let count = (last - start) / step + 1;
        let candidate = |i: u64| {
            if backwards {
                last - i * step
            } else {
                start + i * step
            }
        };
        (0..count)
            .map(candidate)
            .filter(|&addr| self.read(addr, pattern.len()) == pattern)
            .nth(skip as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_memory_reads_open_bus() {
        let mem = SparseMemory::new();
        assert_eq!(mem.read(0x1234, 3), vec![0xFF; 3]);
    }

    #[test]
    fn writes_can_straddle_pages() {
        let mut mem = SparseMemory::new();
        mem.write(0xFFE, &[1, 2, 3, 4]);
        assert_eq!(mem.read(0xFFD, 6), vec![0xFF, 1, 2, 3, 4, 0xFF]);
        assert_eq!(mem.pages.len(), 2);
    }

    #[test]
    fn search_honours_step_skip_and_direction() {
        let mut mem = SparseMemory::new();
        mem.fill(0, 0x100, 0);
        mem.write(0x10, b"AB");
        mem.write(0x31, b"AB");
        mem.write(0x40, b"AB");

        assert_eq!(mem.search(0, 0x100, b"AB", 1, 0, false), Some(0x10));
        assert_eq!(mem.search(0, 0x100, b"AB", 0x10, 0, false), Some(0x10));
        assert_eq!(mem.search(0, 0x100, b"AB", 0x10, 1, false), Some(0x40));
        assert_eq!(mem.search(0, 0x100, b"AB", 1, 1, false), Some(0x31));
        assert_eq!(mem.search(0, 0x100, b"AB", 1, 0, true), Some(0x40));
        assert_eq!(mem.search(0, 0x100, b"AB", 1, 3, false), None);
    }

    #[test]
    fn search_never_matches_past_the_range() {
        let mut mem = SparseMemory::new();
        mem.fill(0, 0x20, 0);
        mem.write(0x1F, b"AB");
        assert_eq!(mem.search(0, 0x20, b"AB", 1, 0, false), None);
        assert_eq!(mem.search(0, 0x21, b"AB", 1, 0, false), Some(0x1F));
        assert_eq!(mem.search(0, 1, b"AB", 1, 0, false), None);
    }

    #[test]
    fn search_range_wrapping_the_address_space_finds_nothing() {
        let mem = SparseMemory::new();
        assert_eq!(mem.search(u64::MAX - 0x7F, 0x100, b"AB", 1, 0, false), None);
    }
}
