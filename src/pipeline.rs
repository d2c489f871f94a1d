//! Composable byte-stream filters.
//!
//! A [`Stage`] is a pure byte transformer: it gets fed chunks, returns
//! whatever output those chunks produce, and emits a final tail when the
//! stream ends. Stages do no I/O of their own; [`StageReader`] drives a
//! stage in pull mode over an inner reader and [`StageWriter`] drives one
//! in push mode over an inner sink. Decode and encode pipelines are built
//! by nesting these drivers in the order the format dictates, so the
//! composition is fixed at construction time.

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::errors::Result;

/// A byte-in/byte-out filter stage.
///
/// `update` may buffer internally (ciphers hold partial blocks, the
/// unpadder retains the final block) and therefore may return fewer or
/// more bytes than it was given. `finalize` is called exactly once, after
/// the last `update`, and returns whatever the stage was still holding.
pub trait Stage {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>>;
    fn finalize(&mut self) -> Result<Vec<u8>>;
}

/// Pull-mode driver: reads block-sized chunks from `inner`, runs them
/// through the stage, and serves the produced bytes to the caller.
///
/// On inner EOF the stage is finalized once and its tail is appended to
/// the internal buffer; after that the reader reports EOF itself once the
/// buffer drains.
pub struct StageReader<R: Read> {
    inner: R,
    stage: Box<dyn Stage>,
    scratch: Vec<u8>,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> StageReader<R> {
    pub fn new(inner: R, stage: Box<dyn Stage>, block_size: usize) -> Self {
        Self {
            inner,
            stage,
            scratch: vec![0u8; block_size],
            buf: Vec::new(),
            eof: false,
        }
    }
}

impl<R: Read> Read for StageReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while !self.eof && self.buf.len() < out.len() {
            let n = match self.inner.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let produced = if n == 0 {
                self.eof = true;
                self.stage.finalize()
            } else {
                self.stage.update(&self.scratch[..n])
            }
            .map_err(io::Error::other)?;
            self.buf.extend_from_slice(&produced);
        }

        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        Ok(n)
    }
}

/// A writer that can finalize the whole sink stack.
///
/// `finish` runs the local stage's finalization, writes the tail to the
/// inner sink, and then finishes that sink in turn, so stages are released
/// innermost-last in reverse order of construction. Base sinks implement
/// it as a flush.
pub trait FinishWrite: Write {
    fn finish(&mut self) -> Result<()>;
}

impl<T: FinishWrite + ?Sized> FinishWrite for Box<T> {
    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// An in-memory sink, mostly useful for tests and buffering.
impl FinishWrite for Vec<u8> {
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Push-mode driver: transforms written bytes through the stage and
/// forwards the output to an inner sink.
pub struct StageWriter<W: FinishWrite> {
    inner: W,
    stage: Box<dyn Stage>,
    finished: bool,
}

impl<W: FinishWrite> StageWriter<W> {
    pub fn new(inner: W, stage: Box<dyn Stage>) -> Self {
        Self {
            inner,
            stage,
            finished: false,
        }
    }
}

impl<W: FinishWrite> Write for StageWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let produced = self.stage.update(data).map_err(io::Error::other)?;
        self.inner.write_all(&produced)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: FinishWrite> FinishWrite for StageWriter<W> {
    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.finished = true;
            let tail = self.stage.finalize()?;
            self.inner.write_all(&tail)?;
        }
        self.inner.finish()
    }
}

/// Transparent reader that tracks how many bytes have passed through it.
///
/// The position handle is shared, so progress reporting can observe the
/// raw input position from outside the filter stack.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    pos: Rc<Cell<u64>>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: Rc::new(Cell::new(0)),
        }
    }

    /// Returns a shared handle to the byte position.
    pub fn position(&self) -> Rc<Cell<u64>> {
        Rc::clone(&self.pos)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos.set(self.pos.get() + n as u64);
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod testsink {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use super::FinishWrite;
    use crate::errors::Result;

    /// Sink whose contents stay observable after the stack is boxed away.
    #[derive(Clone, Default)]
    pub(crate) struct SharedSink {
        data: Rc<RefCell<Vec<u8>>>,
        finished: Rc<RefCell<bool>>,
    }

    impl SharedSink {
        pub(crate) fn contents(&self) -> Vec<u8> {
            self.data.borrow().clone()
        }

        pub(crate) fn is_finished(&self) -> bool {
            *self.finished.borrow()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl FinishWrite for SharedSink {
        fn finish(&mut self) -> Result<()> {
            *self.finished.borrow_mut() = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Swaps case of ASCII letters and appends a `!` at end of stream.
    struct Marker;

    impl Stage for Marker {
        fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data
                .iter()
                .map(|b| {
                    if b.is_ascii_alphabetic() {
                        b ^ 0x20
                    } else {
                        *b
                    }
                })
                .collect())
        }

        fn finalize(&mut self) -> Result<Vec<u8>> {
            Ok(b"!".to_vec())
        }
    }

    /// Holds every byte back until finalization.
    struct Hoarder(Vec<u8>);

    impl Stage for Hoarder {
        fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            self.0.extend_from_slice(data);
            Ok(Vec::new())
        }

        fn finalize(&mut self) -> Result<Vec<u8>> {
            Ok(std::mem::take(&mut self.0))
        }
    }

    #[test]
    fn stage_reader_transforms_and_finalizes() {
        let input: &[u8] = b"Hello World";
        let mut reader = StageReader::new(input, Box::new(Marker), 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hELLO wORLD!");
    }

    #[test]
    fn stage_reader_serves_small_reads() {
        let input: &[u8] = b"abcdef";
        let mut reader = StageReader::new(input, Box::new(Marker), 2);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ABC");
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"DEF");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"!");
    }

    #[test]
    fn stage_reader_handles_hoarding_stages() {
        let input: &[u8] = b"deferred";
        let mut reader = StageReader::new(input, Box::new(Hoarder(Vec::new())), 3);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"deferred");
    }

    #[test]
    fn stage_writer_finish_cascades() {
        let sink = testsink::SharedSink::default();
        let mut writer = StageWriter::new(sink.clone(), Box::new(Marker));
        writer.write_all(b"ab").unwrap();
        writer.write_all(b"CD").unwrap();
        assert_eq!(sink.contents(), b"ABcd");
        assert!(!sink.is_finished());
        writer.finish().unwrap();
        assert_eq!(sink.contents(), b"ABcd!");
        assert!(sink.is_finished());
    }

    #[test]
    fn stage_writer_finish_is_idempotent() {
        let sink = testsink::SharedSink::default();
        let mut writer = StageWriter::new(sink.clone(), Box::new(Marker));
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(sink.contents(), b"x!");
    }

    #[test]
    fn counting_reader_tracks_position() {
        let input: &[u8] = b"0123456789";
        let mut reader = CountingReader::new(input);
        let pos = reader.position();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(pos.get(), 4);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(pos.get(), 10);
    }
}
