//! Page codecs.
//!
//! A codec streams a contiguous buffer into a list of pages obtained from a
//! [`PageProvider`] and back. Page size and buffer size are independent: the
//! stream may span many small pages or sit in a fraction of one large page.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::trace;

use super::provider::{PageProvider, PooledPage};
use crate::error::CodecError;

/// Ordered pages holding one compressed stream.
#[derive(Debug, Default)]
pub struct PageList {
    pages: Vec<PooledPage>,
    len: usize,
}

impl PageList {
    /// Number of pages in the list.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of meaningful compressed bytes across all pages.
    pub fn compressed_len(&self) -> usize {
        self.len
    }

    /// Bytes of pool memory held by this list.
    pub fn footprint(&self) -> usize {
        self.pages.iter().map(PooledPage::size).sum()
    }

    /// Whether the list holds no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Compresses buffers into pooled pages.
pub trait PageCodec: Send + Sync {
    /// Codec name for reports.
    fn name(&self) -> &'static str;

    /// Compress `input` into pages drawn from `provider`.
    fn compress(&self, input: &[u8], provider: &PageProvider) -> Result<PageList, CodecError>;

    /// Decompress `pages` into `output`, which must be exactly the size of
    /// the original input.
    fn decompress(&self, output: &mut [u8], pages: &PageList) -> Result<(), CodecError>;
}

// =============================================================================
// Deflate
// =============================================================================

/// zlib-wrapped DEFLATE codec.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    /// Create a codec with the given compression level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Compression level in use.
    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl Default for DeflateCodec {
    /// Fastest compression; blobs are compressed often and read back soon.
    fn default() -> Self {
        Self {
            level: Compression::fast(),
        }
    }
}

impl PageCodec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, input: &[u8], provider: &PageProvider) -> Result<PageList, CodecError> {
        let mut encoder = ZlibEncoder::new(PageWriter::new(provider), self.level);
        encoder
            .write_all(input)
            .map_err(|e| CodecError::Compress(e.to_string()))?;
        let writer = encoder
            .finish()
            .map_err(|e| CodecError::Compress(e.to_string()))?;

        let list = writer.into_list();
        trace!(
            raw = input.len(),
            compressed = list.len,
            pages = list.pages.len(),
            "compressed buffer"
        );

        Ok(list)
    }

    fn decompress(&self, output: &mut [u8], pages: &PageList) -> Result<(), CodecError> {
        let mut decoder = ZlibDecoder::new(PageReader::new(pages));

        if let Err(e) = decoder.read_exact(output) {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                    expected: output.len(),
                    produced: decoder.total_out() as usize,
                },
                _ => CodecError::Decompress(e.to_string()),
            });
        }

        // Drive the decoder to the end of the stream so the checksum is verified.
        let mut trailing = [0u8; 1];
        match decoder.read(&mut trailing) {
            Ok(0) => Ok(()),
            Ok(_) => Err(CodecError::Decompress(format!(
                "stream holds more than {} bytes",
                output.len()
            ))),
            Err(e) => Err(CodecError::Decompress(e.to_string())),
        }
    }
}

// =============================================================================
// Page streams
// =============================================================================

/// Sink that spills written bytes over fresh pages from a provider.
struct PageWriter<'a> {
    provider: &'a PageProvider,
    pages: Vec<PooledPage>,
    offset: usize,
    len: usize,
}

impl<'a> PageWriter<'a> {
    fn new(provider: &'a PageProvider) -> Self {
        Self {
            provider,
            pages: Vec::new(),
            offset: 0,
            len: 0,
        }
    }

    fn into_list(self) -> PageList {
        PageList {
            pages: self.pages,
            len: self.len,
        }
    }
}

impl Write for PageWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let page_full = self
            .pages
            .last()
            .map_or(true, |page| self.offset == page.size());
        if page_full {
            self.pages.push(self.provider.get_free_page());
            self.offset = 0;
        }

        let page = self
            .pages
            .last()
            .ok_or_else(|| io::Error::other("no page to write to"))?;
        let mut raw = page.get().map_err(io::Error::other)?;

        let n = buf.len().min(raw.len() - self.offset);
        raw[self.offset..self.offset + n].copy_from_slice(&buf[..n]);
        self.offset += n;
        self.len += n;

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source that reads the compressed bytes of a page list in order.
struct PageReader<'a> {
    pages: &'a [PooledPage],
    index: usize,
    offset: usize,
    remaining: usize,
}

impl<'a> PageReader<'a> {
    fn new(list: &'a PageList) -> Self {
        Self {
            pages: &list.pages,
            index: 0,
            offset: 0,
            remaining: list.len,
        }
    }
}

impl Read for PageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.remaining > 0 && self.index < self.pages.len() {
            let raw = self.pages[self.index].get().map_err(io::Error::other)?;
            let available = (raw.len() - self.offset).min(self.remaining);

            if available == 0 {
                self.index += 1;
                self.offset = 0;
                continue;
            }

            let n = available.min(buf.len());
            buf[..n].copy_from_slice(&raw[self.offset..self.offset + n]);
            self.offset += n;
            self.remaining -= n;

            return Ok(n);
        }

        Ok(0)
    }
}
