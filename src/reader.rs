//! Random-access readers over archive entry content.
//!
//! An entry's underlying storage is either an in-memory byte string (symlink
//! targets, inline hardlink targets), a seekable stream (stored entries), or a
//! forward-only decompression stream (compressed entries). [`BufferedReader`]
//! bridges the last case to random access with a rolling buffer, falling back
//! to a full rewind when a read jumps further back than the buffer covers.

use std::io::{self, Read, Seek};

use crate::archive::ArchiveEntryReader;
use crate::error::{Error, Result};

/// 500 KiB: large enough to absorb normal kernel read-ahead out-of-order reads
/// without forcing a rewind on every one.
const INITIAL_BUFFER_SIZE: usize = 500 << 10;
const MIN_BUFFER_SIZE: usize = 1024;

/// A random-access byte source for one open entry.
pub enum Reader {
    String(StringReader),
    Unbuffered(UnbufferedReader),
    Buffered(BufferedReader),
}

impl Reader {
    /// Fills `dest` starting at `offset`, returning the number of bytes written.
    /// A short read (fewer bytes than `dest.len()`) means end-of-file.
    pub fn read_at(&mut self, dest: &mut [u8], offset: u64) -> Result<usize> {
        match self {
            Reader::String(r) => Ok(r.read_at(dest, offset)),
            Reader::Unbuffered(r) => r.read_at(dest, offset),
            Reader::Buffered(r) => r.read_at(dest, offset),
        }
    }
}

/// Serves reads directly from an in-memory byte string.
pub struct StringReader {
    content: Vec<u8>,
}

impl StringReader {
    pub fn new(content: Vec<u8>) -> Self {
        StringReader { content }
    }

    fn read_at(&self, dest: &mut [u8], offset: u64) -> usize {
        let offset = offset as usize;
        if offset >= self.content.len() {
            return 0;
        }
        let n = dest.len().min(self.content.len() - offset);
        dest[..n].copy_from_slice(&self.content[offset..offset + n]);
        n
    }
}

/// Serves reads from a seekable underlying stream (stored, uncompressed entries).
pub struct UnbufferedReader {
    inner: Box<dyn ArchiveEntryReader>,
    pos: u64,
    expected_size: u64,
}

impl UnbufferedReader {
    pub fn new(inner: Box<dyn ArchiveEntryReader>, expected_size: u64) -> Self {
        UnbufferedReader { inner, pos: 0, expected_size }
    }

    fn read_at(&mut self, dest: &mut [u8], offset: u64) -> Result<usize> {
        if offset != self.pos {
            self.inner.seek_to(offset)?;
            self.pos = offset;
        }
        let mut total = 0;
        while total < dest.len() {
            let remaining_in_entry = self.expected_size.saturating_sub(self.pos);
            if remaining_in_entry == 0 {
                break;
            }
            // LimitSize workaround: some ZIP libraries over-read past the entry's
            // declared end, so the request is capped to what's actually left.
            let want = (dest.len() - total).min(remaining_in_entry as usize);
            let n = self.inner.read(&mut dest[total..total + want])?;
            if n == 0 {
                break;
            }
            total += n;
            self.pos += n as u64;
        }
        Ok(total)
    }
}

/// Serves reads from a forward-only decompression stream via a rolling buffer.
pub struct BufferedReader {
    opener: Box<dyn Fn() -> io::Result<Box<dyn ArchiveEntryReader>>>,
    inner: Box<dyn ArchiveEntryReader>,
    expected_size: u64,
    pos: u64,
    buffer: Vec<u8>,
    buffer_start: usize,
}

impl BufferedReader {
    /// `initial` is an already-open stream for this entry (so the caller's
    /// seekability probe doesn't get thrown away); `opener` reopens a fresh
    /// one whenever `restart` needs to rewind past what the buffer covers.
    pub fn new(
        initial: Box<dyn ArchiveEntryReader>,
        opener: Box<dyn Fn() -> io::Result<Box<dyn ArchiveEntryReader>>>,
        expected_size: u64,
    ) -> Result<Self> {
        let size = INITIAL_BUFFER_SIZE.min(expected_size.max(1) as usize).max(MIN_BUFFER_SIZE.min(expected_size.max(1) as usize));
        let buffer = allocate_buffer(size)?;
        Ok(BufferedReader { opener, inner: initial, expected_size, pos: 0, buffer, buffer_start: 0 })
    }

    fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    fn restart(&mut self) -> Result<()> {
        self.inner = (self.opener)()?;
        self.pos = 0;
        self.buffer_start = 0;
        // Ask for a buffer as large as possible, capped to the entry's own
        // size (no point buffering more than the entry ever contains); the
        // shrinking allocator then backs off if that's still too big.
        let want = ((isize::MAX as usize >> 1) + 1).min(self.expected_size.max(1) as usize);
        self.buffer = allocate_buffer_shrinking(want)?;
        Ok(())
    }

    /// Consumes `jump` bytes of the underlying stream, writing each byte into
    /// the circular buffer as it's produced (even though it isn't returned to
    /// the caller), wrapping `buffer_start` modulo the buffer length.
    fn advance(&mut self, mut jump: u64) -> Result<()> {
        let buffer_size = self.buffer_size();
        while jump > 0 {
            let count = (buffer_size - self.buffer_start).min(jump as usize).max(1);
            let end = (self.buffer_start + count).min(buffer_size);
            let n = self.inner.read(&mut self.buffer[self.buffer_start..end])?;
            if n == 0 {
                break;
            }
            self.buffer_start = (self.buffer_start + n) % buffer_size.max(1);
            self.pos += n as u64;
            jump = jump.saturating_sub(n as u64);
        }
        Ok(())
    }

    fn serve_from_buffer(&self, dest: &mut [u8], jump: i64) -> usize {
        let buffer_size = self.buffer_size() as i64;
        let mut src = (self.buffer_start as i64 + jump).rem_euclid(buffer_size.max(1));
        let mut written = 0;
        while written < dest.len() && src != self.buffer_start as i64 {
            dest[written] = self.buffer[src as usize];
            written += 1;
            src = (src + 1) % buffer_size.max(1);
        }
        written
    }

    fn read_at(&mut self, dest: &mut [u8], offset: u64) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        let jump = offset as i64 - self.pos as i64;
        let buffer_size = self.buffer_size() as i64;

        let mut total = 0usize;
        if jump >= 0 {
            self.advance(jump as u64)?;
        } else if jump + buffer_size < 0 {
            self.restart()?;
            self.advance(offset)?;
        } else {
            total = self.serve_from_buffer(dest, jump);
        }

        // pos now equals offset + total (or EOF was hit first): serve the
        // live tail, copying into dest while also feeding the buffer.
        while total < dest.len() {
            let buffer_size = self.buffer_size();
            let space = buffer_size - self.buffer_start;
            let want = (dest.len() - total).min(space.max(1));
            let end = self.buffer_start + want;
            let n = self.inner.read(&mut self.buffer[self.buffer_start..end])?;
            if n == 0 {
                break;
            }
            dest[total..total + n].copy_from_slice(&self.buffer[self.buffer_start..self.buffer_start + n]);
            total += n;
            self.buffer_start = (self.buffer_start + n) % buffer_size.max(1);
            self.pos += n as u64;
        }
        Ok(total)
    }
}

/// Allocates a zeroed buffer of exactly `size` bytes, or `Error::OutOfMemory`
/// if the allocator fails even at that size.
fn allocate_buffer(size: usize) -> Result<Vec<u8>> {
    let size = size.max(1);
    try_zeroed_vec(size).ok_or(Error::OutOfMemory)
}

/// Tries to allocate `want` bytes, halving on failure down to a 1 KiB floor.
/// On 32-bit hosts the one-shot ideal buffer size can exceed what the
/// allocator can actually provide; this is the fallback ladder for that case.
fn allocate_buffer_shrinking(mut want: usize) -> Result<Vec<u8>> {
    loop {
        if let Some(buf) = try_zeroed_vec(want) {
            return Ok(buf);
        }
        if want <= MIN_BUFFER_SIZE {
            return Err(Error::OutOfMemory);
        }
        want = (want / 2).max(MIN_BUFFER_SIZE);
    }
}

fn try_zeroed_vec(size: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).ok()?;
    buf.resize(size, 0);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_reader_short_read_at_eof() {
        let mut r = StringReader::new(b"hello".to_vec());
        let mut dest = [0u8; 10];
        let n = r.read_at(&mut dest, 2);
        assert_eq!(n, 3);
        assert_eq!(&dest[..3], b"llo");
    }

    #[test]
    fn string_reader_offset_past_end() {
        let r = StringReader::new(b"hi".to_vec());
        let mut dest = [0u8; 4];
        assert_eq!(r.read_at(&mut dest, 10), 0);
    }

    /// A forward-only, non-seekable `ArchiveEntryReader` over an in-memory
    /// buffer, standing in for a live decompression stream.
    struct ForwardOnly {
        content: Vec<u8>,
        pos: usize,
    }

    impl ForwardOnly {
        fn new(content: Vec<u8>) -> Self {
            ForwardOnly { content, pos: 0 }
        }
    }

    impl io::Read for ForwardOnly {
        fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
            let n = dest.len().min(self.content.len() - self.pos);
            dest[..n].copy_from_slice(&self.content[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ArchiveEntryReader for ForwardOnly {
        fn is_seekable(&self) -> bool {
            false
        }
        fn seek_to(&mut self, _offset: u64) -> io::Result<()> {
            Err(io::Error::other("not seekable"))
        }
    }

    fn make_buffered(content: Vec<u8>) -> BufferedReader {
        let size = content.len() as u64;
        let opener_content = content.clone();
        let opener: Box<dyn Fn() -> io::Result<Box<dyn ArchiveEntryReader>>> = Box::new(move || Ok(Box::new(ForwardOnly::new(opener_content.clone()))));
        let initial: Box<dyn ArchiveEntryReader> = Box::new(ForwardOnly::new(content));
        BufferedReader::new(initial, opener, size).expect("buffer allocation")
    }

    #[test]
    fn buffered_reader_matches_reference_over_out_of_order_reads() {
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut buffered = make_buffered(content.clone());

        let reads = [(0u64, 4096usize), (4096, 4096), (0, 4096), (8000, 4096), (0, 100)];
        for (offset, len) in reads {
            let mut dest = vec![0u8; len];
            let n = buffered.read_at(&mut dest, offset).unwrap();
            assert_eq!(n, len);
            assert_eq!(&dest[..n], &content[offset as usize..offset as usize + n]);
        }
    }

    #[test]
    fn buffered_reader_rewinds_on_jump_past_buffer_start() {
        // Larger than INITIAL_BUFFER_SIZE, so the rolling buffer is capped at
        // 500 KiB regardless of entry size, and a jump back further than that
        // must fall onto the full-rewind path rather than serve_from_buffer.
        let content: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        let mut buffered = make_buffered(content.clone());

        let mut dest = vec![0u8; 4096];
        let n = buffered.read_at(&mut dest, 550_000).unwrap();
        assert_eq!(&dest[..n], &content[550_000..550_000 + n]);

        let mut dest2 = vec![0u8; 4096];
        let n2 = buffered.read_at(&mut dest2, 0).unwrap();
        assert_eq!(n2, 4096);
        assert_eq!(&dest2[..n2], &content[0..n2]);
    }

    #[test]
    fn buffered_reader_short_read_at_eof() {
        let content = b"hello world".to_vec();
        let mut buffered = make_buffered(content.clone());
        let mut dest = vec![0u8; 100];
        let n = buffered.read_at(&mut dest, 0).unwrap();
        assert_eq!(n, content.len());
        assert_eq!(&dest[..n], &content[..]);
    }
}
