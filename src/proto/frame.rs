//! Length-prefixed framing over a reliable byte stream.
//!
//! Each record body travels as `u32 LE length | body`, the body moving in
//! chunks of at most [`MAX_CHUNK`] bytes. Any partial read or write makes
//! the stream unusable.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Upper bound on a single socket read or write.
pub const MAX_CHUNK: usize = 1024;

const LEN_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame length invalid: {reason}")]
    LengthInvalid { reason: String },
    #[error("frame allocation failed for {len} bytes")]
    OutOfMemory { len: usize },
}

pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next frame body. `Ok(None)` means the peer closed before
    /// a prefix byte arrived; a close mid-frame is an error.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut prefix = [0u8; LEN_PREFIX];
        let mut read = 0usize;
        while read < prefix.len() {
            let n = self.reader.read(&mut prefix[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "length prefix truncated",
                )
                .into());
            }
            read += n;
        }

        let len = u32::from_le_bytes(prefix) as usize;
        let mut body = Vec::new();
        body.try_reserve_exact(len)
            .map_err(|_| FrameError::OutOfMemory { len })?;
        body.resize(len, 0);

        let mut filled = 0usize;
        while filled < len {
            let want = (len - filled).min(MAX_CHUNK);
            let n = self.reader.read(&mut body[filled..filled + want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "frame body truncated",
                )
                .into());
            }
            filled += n;
        }
        Ok(Some(body))
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame; returns the bytes put on the wire including the
    /// prefix.
    pub fn write_frame(&mut self, body: &[u8]) -> Result<usize, FrameError> {
        let len = u32::try_from(body.len()).map_err(|_| FrameError::LengthInvalid {
            reason: "frame length exceeds u32".to_string(),
        })?;
        self.writer.write_all(&len.to_le_bytes())?;
        for chunk in body.chunks(MAX_CHUNK) {
            self.writer.write_all(chunk)?;
        }
        self.writer.flush()?;
        Ok(LEN_PREFIX + body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read call, exercising chunk
    /// reassembly at arbitrary boundaries.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let cap = self.step.min(buf.len());
            self.inner.read(&mut buf[..cap])
        }
    }

    #[test]
    fn frame_roundtrip() {
        let mut wire = Vec::new();
        FrameWriter::new(&mut wire).write_frame(b"hello").unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().unwrap(), b"hello");
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn write_frame_reports_wire_length() {
        let mut wire = Vec::new();
        let written = FrameWriter::new(&mut wire).write_frame(&[7u8; 10]).unwrap();
        assert_eq!(written, 14);
        assert_eq!(wire.len(), 14);
    }

    #[test]
    fn reassembles_frames_across_chunk_boundaries() {
        let bodies: Vec<Vec<u8>> = vec![
            vec![1u8; 3],
            vec![2u8; MAX_CHUNK],
            vec![3u8; MAX_CHUNK * 2 + 17],
            Vec::new(),
            vec![4u8; 1],
        ];
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            for body in &bodies {
                writer.write_frame(body).unwrap();
            }
        }

        for step in [1, 3, 7, MAX_CHUNK, MAX_CHUNK + 1] {
            let mut reader = FrameReader::new(Trickle {
                inner: Cursor::new(wire.clone()),
                step,
            });
            for body in &bodies {
                assert_eq!(&reader.read_frame().unwrap().unwrap(), body);
            }
            assert!(reader.read_frame().unwrap().is_none());
        }
    }

    #[test]
    fn clean_close_before_prefix_is_none() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn close_inside_prefix_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(vec![5u8, 0]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn close_inside_body_is_an_error() {
        let mut wire = Vec::new();
        FrameWriter::new(&mut wire).write_frame(&[9u8; 32]).unwrap();
        wire.truncate(wire.len() - 10);

        let mut reader = FrameReader::new(Cursor::new(wire));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
