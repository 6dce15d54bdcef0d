//! Guest RAM backing stores.
//!
//! Regions with a direct mapping address RAM by offset; the backing store behind those offsets is
//! either one contiguous allocation or a set of lazily allocated chunks for machines configured
//! with large amounts of mostly untouched memory.

use core::fmt;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// The requested range lies outside the backing store.
    OutOfRange { offset: u64, len: usize, size: u64 },
    /// The requested size cannot be allocated on this platform.
    SizeTooLarge { size: u64 },
    /// The sparse chunk size is zero or not a multiple of the page size.
    InvalidChunkSize { chunk_size: usize },
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestMemoryError::OutOfRange { offset, len, size } => write!(
                f,
                "guest RAM access out of range: offset=0x{offset:x} len={len} size=0x{size:x}"
            ),
            GuestMemoryError::SizeTooLarge { size } => {
                write!(f, "guest RAM size {size} does not fit in usize")
            }
            GuestMemoryError::InvalidChunkSize { chunk_size } => {
                write!(f, "invalid guest RAM chunk size {chunk_size}")
            }
        }
    }
}

impl std::error::Error for GuestMemoryError {}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Byte-addressed guest RAM.
pub trait GuestMemory {
    fn size(&self) -> u64;

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_u8(&self, offset: u64) -> GuestMemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&self, offset: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8(&mut self, offset: u64, value: u8) -> GuestMemoryResult<()> {
        self.write_from(offset, &[value])
    }

    fn write_u32_le(&mut self, offset: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(offset, &value.to_le_bytes())
    }
}

fn check_range(size: u64, offset: u64, len: usize) -> GuestMemoryResult<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(GuestMemoryError::OutOfRange { offset, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { offset, len, size });
    }
    Ok(())
}

/// Contiguous guest RAM.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let len = usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; len].into_boxed_slice(),
        })
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size(), offset, dst.len())?;
        let start = offset as usize;
        dst.copy_from_slice(&self.data[start..start + dst.len()]);
        Ok(())
    }

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size(), offset, src.len())?;
        let start = offset as usize;
        self.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// Guest RAM split into chunks that are allocated on first write. Untouched chunks read as zero.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 || chunk_size % crate::access::PAGE_SIZE as usize != 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let count = size.div_ceil(chunk_size as u64);
        let count = usize::try_from(count).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            chunk_size,
            chunks: vec![None; count],
        })
    }

    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_some()).count()
    }
}

/// Splits `[offset, offset + len)` into per-chunk `(chunk, chunk_offset, buf_pos, take)` spans.
fn chunk_spans(
    chunk_size: usize,
    offset: u64,
    len: usize,
) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let mut pos = 0usize;
    core::iter::from_fn(move || {
        if pos >= len {
            return None;
        }
        let cur = offset + pos as u64;
        let chunk = (cur / chunk_size as u64) as usize;
        let chunk_off = (cur % chunk_size as u64) as usize;
        let take = (chunk_size - chunk_off).min(len - pos);
        let span = (chunk, chunk_off, pos, take);
        pos += take;
        Some(span)
    })
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, offset: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, offset, dst.len())?;
        for (chunk, chunk_off, pos, take) in chunk_spans(self.chunk_size, offset, dst.len()) {
            match &self.chunks[chunk] {
                Some(data) => {
                    dst[pos..pos + take].copy_from_slice(&data[chunk_off..chunk_off + take])
                }
                None => dst[pos..pos + take].fill(0),
            }
        }
        Ok(())
    }

    fn write_from(&mut self, offset: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, offset, src.len())?;
        let chunk_size = self.chunk_size;
        for (chunk, chunk_off, pos, take) in chunk_spans(chunk_size, offset, src.len()) {
            let data = self.chunks[chunk]
                .get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());
            data[chunk_off..chunk_off + take].copy_from_slice(&src[pos..pos + take]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_round_trips_and_rejects_overruns() {
        let mut mem = DenseMemory::new(16).unwrap();
        mem.write_u32_le(4, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32_le(4).unwrap(), 0xdead_beef);
        assert_eq!(mem.read_u8(7).unwrap(), 0xde);

        assert!(matches!(
            mem.read_u32_le(14),
            Err(GuestMemoryError::OutOfRange { .. })
        ));
        assert!(matches!(
            mem.write_from(u64::MAX, &[0]),
            Err(GuestMemoryError::OutOfRange { .. })
        ));
    }

    #[test]
    fn sparse_allocates_on_write_only() {
        let mut mem = SparseMemory::with_chunk_size(0x4000, 0x1000).unwrap();
        assert_eq!(mem.read_u32_le(0x1000).unwrap(), 0);
        assert_eq!(mem.allocated_chunks(), 0);

        mem.write_u8(0x1003, 0xaa).unwrap();
        assert_eq!(mem.allocated_chunks(), 1);
        assert_eq!(mem.read_u32_le(0x1000).unwrap(), 0xaa00_0000);
    }

    #[test]
    fn sparse_access_across_chunk_boundary() {
        let mut mem = SparseMemory::with_chunk_size(0x3000, 0x1000).unwrap();
        mem.write_u32_le(0x0FFE, 0x1122_3344).unwrap();
        assert_eq!(mem.read_u32_le(0x0FFE).unwrap(), 0x1122_3344);
        assert_eq!(mem.allocated_chunks(), 2);

        assert!(matches!(
            mem.read_into(0x2FFF, &mut [0u8; 2]),
            Err(GuestMemoryError::OutOfRange { .. })
        ));
    }

    #[test]
    fn sparse_rejects_unaligned_chunks() {
        assert!(matches!(
            SparseMemory::with_chunk_size(0x4000, 0x800),
            Err(GuestMemoryError::InvalidChunkSize { chunk_size: 0x800 })
        ));
        assert!(SparseMemory::with_chunk_size(0x4000, 0).is_err());
    }
}
