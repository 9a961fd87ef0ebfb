//! zstd streaming compression (spec §4.8.2 "zstd compression context").
//!
//! Grounded in `original_source/lib/__/core/log/detail/stream_sink.hxx`'s
//! `zstd` RAII wrapper: level 1 ("fast"), one frame per sink lifetime,
//! flushed after every record rather than after every byte so records stay
//! individually recoverable by a streaming decompressor.

use std::io::Write;

/// Fast (level 1) zstd compressor writing into an in-memory buffer that the
/// caller drains after every push.
pub struct CompressStream {
    encoder: zstd::stream::write::Encoder<'static, Vec<u8>>,
}

impl CompressStream {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            encoder: zstd::stream::write::Encoder::new(Vec::new(), 1)?,
        })
    }

    /// Compress `data`, flush to a record boundary, and return the bytes
    /// produced since the last call.
    pub fn push(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        self.encoder.write_all(data)?;
        self.encoder.flush()?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// Emit the zstd epilogue (final frame) and return it.
    pub fn finish(self) -> std::io::Result<Vec<u8>> {
        self.encoder.finish()
    }
}

/// One-shot streaming decompressor used by `extract` (spec §4.8.4): feed it
/// arbitrarily-sized ciphertext-derived chunks, read back plaintext.
pub struct DecompressStream {
    decoder: zstd::stream::write::Decoder<'static, Vec<u8>>,
}

impl DecompressStream {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            decoder: zstd::stream::write::Decoder::new(Vec::new())?,
        })
    }

    pub fn push(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        self.decoder.write_all(data)?;
        self.decoder.flush()?;
        Ok(std::mem::take(self.decoder.get_mut()))
    }

    /// Finalize the frame. `zstd::stream::write::Decoder::finish` checks
    /// that the frame actually reached its epilogue and returns an
    /// `UnexpectedEof` error (not `Ok`) when the input ended mid-frame, so a
    /// truncated file surfaces here rather than silently producing a short
    /// plaintext.
    pub fn finish(self) -> std::io::Result<Vec<u8>> {
        self.decoder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_several_records() {
        let mut compressor = CompressStream::new().unwrap();
        let mut compressed = Vec::new();
        for line in ["first record\n", "second record\n", "third\n"] {
            compressed.extend(compressor.push(line.as_bytes()).unwrap());
        }
        compressed.extend(compressor.finish().unwrap());

        let mut decompressor = DecompressStream::new().unwrap();
        let mut plain = decompressor.push(&compressed).unwrap();
        plain.extend(decompressor.finish().unwrap());
        assert_eq!(plain, b"first record\nsecond record\nthird\n");
    }
}
