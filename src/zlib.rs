//! Streaming zlib inflate/deflate filter stages.
//!
//! Thin stage wrappers around `flate2`'s raw `Decompress`/`Compress`
//! state machines: byte-in/byte-out, no I/O of their own. The decoder
//! autodetects the zlib header; the encoder uses the library's default
//! level, which is higher than what Android itself uses.

use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::errors::{Error, Result};
use crate::pipeline::Stage;

/// Growth step for output buffers while the state machine makes progress.
const OUT_STEP: usize = 32 * 1024;

fn corrupt(e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, e))
}

/// zlib decompression as a pull stage.
pub struct Inflate {
    z: Decompress,
    done: bool,
}

impl Inflate {
    pub fn new() -> Self {
        Self {
            z: Decompress::new(true),
            done: false,
        }
    }
}

impl Default for Inflate {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Inflate {
    fn update(&mut self, mut data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        // Bytes past the end of the zlib stream are ignored, like a
        // decompressor's unused trailing data.
        while !data.is_empty() && !self.done {
            out.reserve(OUT_STEP);
            let before_in = self.z.total_in();
            let before_out = self.z.total_out();
            let status = self
                .z
                .decompress_vec(data, &mut out, FlushDecompress::None)
                .map_err(corrupt)?;
            let consumed = (self.z.total_in() - before_in) as usize;
            data = &data[consumed..];
            match status {
                Status::StreamEnd => self.done = true,
                _ if consumed == 0 && self.z.total_out() == before_out => {
                    return Err(corrupt(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "zlib stream made no progress",
                    )));
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while !self.done {
            out.reserve(OUT_STEP);
            let before_out = self.z.total_out();
            let status = self
                .z
                .decompress_vec(&[], &mut out, FlushDecompress::Finish)
                .map_err(corrupt)?;
            match status {
                Status::StreamEnd => self.done = true,
                _ if self.z.total_out() == before_out => break,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// zlib compression as a push stage.
pub struct Deflate {
    z: Compress,
}

impl Deflate {
    pub fn new() -> Self {
        Self {
            z: Compress::new(Compression::default(), true),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Deflate {
    fn update(&mut self, mut data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while !data.is_empty() {
            out.reserve(OUT_STEP);
            let before_in = self.z.total_in();
            self.z
                .compress_vec(data, &mut out, FlushCompress::None)
                .map_err(corrupt)?;
            let consumed = (self.z.total_in() - before_in) as usize;
            data = &data[consumed..];
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            out.reserve(OUT_STEP);
            let before_out = self.z.total_out();
            let status = self
                .z
                .compress_vec(&[], &mut out, FlushCompress::Finish)
                .map_err(corrupt)?;
            match status {
                Status::StreamEnd => return Ok(out),
                _ if self.z.total_out() == before_out => return Ok(out),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib_decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn run_stage(stage: &mut dyn Stage, data: &[u8], chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(stage.update(piece).unwrap());
        }
        out.extend(stage.finalize().unwrap());
        out
    }

    #[test]
    fn inflate_decodes_standard_zlib() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = zlib_compress(&plain);
        for chunk in [1, 13, 4096] {
            let mut stage = Inflate::new();
            assert_eq!(run_stage(&mut stage, &compressed, chunk), plain);
        }
    }

    #[test]
    fn deflate_output_is_standard_zlib() {
        let plain: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut stage = Deflate::new();
        let compressed = run_stage(&mut stage, &plain, 97);
        assert_eq!(zlib_decompress(&compressed), plain);
    }

    #[test]
    fn deflate_then_inflate_round_trip() {
        let plain = b"streaming round trip".repeat(123);
        let mut deflate = Deflate::new();
        let compressed = run_stage(&mut deflate, &plain, 7);
        let mut inflate = Inflate::new();
        assert_eq!(run_stage(&mut inflate, &compressed, 5), plain);
    }

    #[test]
    fn inflate_ignores_trailing_garbage() {
        let plain = b"payload before trailer";
        let mut compressed = zlib_compress(plain);
        compressed.extend_from_slice(b"\0\0\0\0garbage");
        let mut stage = Inflate::new();
        assert_eq!(run_stage(&mut stage, &compressed, 8), plain);
    }

    #[test]
    fn inflate_rejects_non_zlib_input() {
        let mut stage = Inflate::new();
        assert!(stage.update(b"definitely not zlib data").is_err());
    }

    #[test]
    fn empty_deflate_still_produces_a_stream() {
        let mut stage = Deflate::new();
        let compressed = stage.finalize().unwrap();
        assert_eq!(zlib_decompress(&compressed), b"");
    }
}
