//! Resolution cache for plain RAM pages.
//!
//! Each access kind has its own direct-mapped array of lines. A line remembers which RAM page
//! backs one physical page in one [`AccessMode`]. Pages serviced by handlers are never stored, so
//! a hit can always be satisfied straight from guest RAM.

use crate::access::{AccessKind, AccessMode, PAGE_SHIFT};

const INVALID_KEY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct CacheLine {
    /// Physical page number with the mode index in bits 20..22.
    key: u32,
    /// RAM offset of the page start.
    ram: u32,
}

impl CacheLine {
    const EMPTY: Self = Self {
        key: INVALID_KEY,
        ram: 0,
    };

    #[inline]
    fn page(&self) -> u32 {
        self.key & ((1 << (32 - PAGE_SHIFT)) - 1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fills: u64,
    pub invalidations: u64,
}

#[derive(Debug, Clone)]
pub struct ResolutionCache {
    lines: [Box<[CacheLine]>; 3],
    mask: usize,
    stats: CacheStats,
}

#[inline]
fn key(page: u32, mode: AccessMode) -> u32 {
    page | ((mode.index() as u32) << (32 - PAGE_SHIFT))
}

impl ResolutionCache {
    /// Creates a cache with `entries` lines per access kind, rounded up to a power of two.
    pub fn new(entries: usize) -> Self {
        let entries = entries.max(1).next_power_of_two();
        let lines = || vec![CacheLine::EMPTY; entries].into_boxed_slice();
        Self {
            lines: [lines(), lines(), lines()],
            mask: entries - 1,
            stats: CacheStats::default(),
        }
    }

    pub fn entries(&self) -> usize {
        self.mask + 1
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[inline]
    fn slot(&self, key: u32) -> usize {
        (key ^ (key >> 8)) as usize & self.mask
    }

    /// RAM offset of the page start, if cached.
    #[inline]
    pub fn lookup(&mut self, page: u32, mode: AccessMode, kind: AccessKind) -> Option<u32> {
        let key = key(page, mode);
        let line = self.lines[kind.index()][self.slot(key)];
        if line.key == key {
            self.stats.hits += 1;
            Some(line.ram)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    pub fn fill(&mut self, page: u32, mode: AccessMode, kind: AccessKind, ram: u32) {
        let key = key(page, mode);
        let slot = self.slot(key);
        self.lines[kind.index()][slot] = CacheLine { key, ram };
        self.stats.fills += 1;
        tracing::trace!(page, ?mode, ?kind, ram, "cache fill");
    }

    /// Drops every line for pages in `[first, first + count)`, in every mode.
    pub fn invalidate_pages(&mut self, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        let first = u64::from(first);
        let end = first + u64::from(count);
        for lines in &mut self.lines {
            for line in lines.iter_mut() {
                if line.key != INVALID_KEY && (first..end).contains(&u64::from(line.page())) {
                    *line = CacheLine::EMPTY;
                }
            }
        }
        self.stats.invalidations += 1;
    }

    pub fn flush(&mut self) {
        for lines in &mut self.lines {
            lines.fill(CacheLine::EMPTY);
        }
        self.stats.invalidations += 1;
    }

    /// Flushes read and write lines but keeps instruction fetch lines.
    pub fn flush_data(&mut self) {
        self.lines[AccessKind::Read.index()].fill(CacheLine::EMPTY);
        self.lines[AccessKind::Write.index()].fill(CacheLine::EMPTY);
        self.stats.invalidations += 1;
    }
}
