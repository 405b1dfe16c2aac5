//! Frame codec for use with `tokio_util::codec::{FramedRead, FramedWrite}`.
//!
//! # Grammar
//!
//! ```text
//! frame      = command CRLF *(body-line CRLF) CRLF CRLF
//! command    = non-empty line
//! body-line  = non-empty line
//! ```
//!
//! A lone LF is accepted as a line end when decoding. Empty lines before a
//! command line are skipped. A single empty line followed by content is a
//! grammar violation: bodies cannot contain empty lines.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::Frame;

/// Maximum length of a single line, excluding its terminator (8 KiB)
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Maximum number of body lines in one frame
pub const MAX_BODY_LINES: usize = 256;

const CRLF: &[u8] = b"\r\n";

/// Stateful decoder/encoder for REX frames.
///
/// Decoding keeps the partially assembled frame between calls, so one codec
/// instance must be used per connection direction.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Offset into the buffer already scanned for a line feed
    scan_offset: usize,
    command_line: Option<String>,
    body: Vec<String>,
    /// Consecutive empty lines seen after the command line
    empty_lines: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.scan_offset = 0;
        self.command_line = None;
        self.body.clear();
        self.empty_lines = 0;
    }

    /// Splits one complete line off the front of `buf`, without its
    /// terminator. Returns `None` when no line feed is buffered yet.
    fn next_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        let newline = buf
            .get(self.scan_offset..)
            .and_then(|rest| rest.iter().position(|&b| b == b'\n'));

        let Some(pos) = newline else {
            self.scan_offset = buf.len();
            // A trailing CR may belong to a terminator whose LF is still in flight
            let pending = if buf.ends_with(b"\r") {
                buf.len() - 1
            } else {
                buf.len()
            };
            if pending > MAX_LINE_LENGTH {
                return Err(FrameError::LineTooLong {
                    len: pending,
                    max: MAX_LINE_LENGTH,
                });
            }
            return Ok(None);
        };

        let line_end = self.scan_offset + pos;
        self.scan_offset = 0;

        let mut line = buf.split_to(line_end + 1);
        line.truncate(line_end);
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }

        if line.len() > MAX_LINE_LENGTH {
            return Err(FrameError::LineTooLong {
                len: line.len(),
                max: MAX_LINE_LENGTH,
            });
        }

        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        while let Some(line) = self.next_line(buf)? {
            if self.command_line.is_none() {
                if !line.is_empty() {
                    self.command_line = Some(line);
                }
                continue;
            }

            if line.is_empty() {
                self.empty_lines += 1;
                if self.empty_lines == 2 {
                    let command_line = self.command_line.take().unwrap_or_default();
                    let body = std::mem::take(&mut self.body);
                    self.reset();
                    return Ok(Some(Frame::with_body(command_line, body)));
                }
                continue;
            }

            if self.empty_lines > 0 {
                return Err(FrameError::EmptyBodyLine);
            }

            if self.body.len() >= MAX_BODY_LINES {
                return Err(FrameError::TooManyBodyLines {
                    max: MAX_BODY_LINES,
                });
            }
            self.body.push(line);
        }

        Ok(None)
    }

    /// Stream closed. A frame without its terminator is dropped rather than
    /// surfaced as an error or a partial frame.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                buf.clear();
                self.reset();
                Ok(None)
            }
        }
    }
}

fn validate_line(line: &str) -> Result<(), FrameError> {
    if line.is_empty() {
        return Err(FrameError::InvalidLine {
            line: line.to_string(),
            reason: "line is empty",
        });
    }
    if line.contains(['\r', '\n']) {
        return Err(FrameError::InvalidLine {
            line: line.to_string(),
            reason: "line contains a line terminator",
        });
    }
    if line.len() > MAX_LINE_LENGTH {
        return Err(FrameError::LineTooLong {
            len: line.len(),
            max: MAX_LINE_LENGTH,
        });
    }
    Ok(())
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        Encoder::<&Frame>::encode(self, &frame, dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        validate_line(frame.command_line())?;
        if frame.body().len() > MAX_BODY_LINES {
            return Err(FrameError::TooManyBodyLines {
                max: MAX_BODY_LINES,
            });
        }
        for line in frame.body() {
            validate_line(line)?;
        }

        let body_len: usize = frame.body().iter().map(|l| l.len() + CRLF.len()).sum();
        dst.reserve(frame.command_line().len() + body_len + 3 * CRLF.len());

        dst.put_slice(frame.command_line().as_bytes());
        dst.put_slice(CRLF);
        for line in frame.body() {
            dst.put_slice(line.as_bytes());
            dst.put_slice(CRLF);
        }
        dst.put_slice(CRLF);
        dst.put_slice(CRLF);
        Ok(())
    }
}

impl Frame {
    /// Encodes this frame into its exact wire bytes.
    pub fn to_bytes(&self) -> Result<BytesMut, FrameError> {
        let mut buf = BytesMut::new();
        Encoder::<&Frame>::encode(&mut FrameCodec::new(), self, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn decode_all(input: &[u8]) -> Vec<Result<Frame, FrameError>> {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => {
                    out.push(Err(e));
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_ping_wire_bytes() {
        assert_eq!(&Frame::ping().to_bytes().unwrap()[..], b"REX PING\r\n\r\n\r\n");
    }

    #[test]
    fn test_register_ack_wire_bytes() {
        let frame = Frame::new("REX REGISTER ab3F9k");
        assert_eq!(
            &frame.to_bytes().unwrap()[..],
            b"REX REGISTER ab3F9k\r\n\r\n\r\n"
        );
    }

    #[test]
    fn test_body_wire_bytes() {
        let frame = Frame::with_body("REX REGISTER", vec!["host: a".into(), "pid: 1".into()]);
        assert_eq!(
            &frame.to_bytes().unwrap()[..],
            b"REX REGISTER\r\nhost: a\r\npid: 1\r\n\r\n\r\n"
        );
    }

    #[test]
    fn test_roundtrip_with_body() {
        let frames = vec![
            Frame::register(),
            Frame::with_body("REX REGISTER", vec!["addr: 10.0.0.1:5000".into()]),
            Frame::with_body(
                "REX NOTE a b c",
                vec!["one".into(), " two".into(), "three ".into()],
            ),
        ];

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for frame in &frames {
            Encoder::<&Frame>::encode(&mut codec, frame, &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            decoded.push(frame);
        }
        assert_eq!(decoded, frames);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_single_frame_with_empty_body() {
        let frames = decode_all(b"REX PING\r\n\r\n\r\n");
        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert_eq!(frame.command_line(), "REX PING");
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_bare_lf_accepted() {
        let frames = decode_all(b"REX PING\n\n\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ok());
    }

    #[test]
    fn test_incomplete_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"REX PI"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"NG\r\n\r\n");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\r\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::ping());
    }

    #[test]
    fn test_leading_empty_lines_skipped() {
        let frames = decode_all(b"\r\n\r\nREX PING\r\n\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::ping());
    }

    #[test]
    fn test_empty_line_inside_body_rejected() {
        let frames = decode_all(b"REX REGISTER\r\na\r\n\r\nb\r\n\r\n\r\n");
        assert!(matches!(frames.as_slice(), [Err(FrameError::EmptyBodyLine)]));
    }

    #[test]
    fn test_line_too_long_rejected() {
        let mut input = vec![b'A'; MAX_LINE_LENGTH + 10];
        input.extend_from_slice(b"\r\n\r\n\r\n");
        let frames = decode_all(&input);
        assert!(matches!(
            frames.as_slice(),
            [Err(FrameError::LineTooLong { .. })]
        ));
    }

    #[test]
    fn test_unterminated_long_line_rejected() {
        let input = vec![b'A'; MAX_LINE_LENGTH + 1];
        let frames = decode_all(&input);
        assert!(matches!(
            frames.as_slice(),
            [Err(FrameError::LineTooLong { .. })]
        ));
    }

    #[test]
    fn test_max_length_line_split_after_cr() {
        let frame = Frame::new("A".repeat(MAX_LINE_LENGTH));
        let wire = frame.to_bytes().unwrap();

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&wire[..MAX_LINE_LENGTH + 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[MAX_LINE_LENGTH + 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_overlong_line_with_trailing_cr_rejected() {
        let mut input = vec![b'A'; MAX_LINE_LENGTH + 1];
        input.push(b'\r');
        let frames = decode_all(&input);
        assert!(matches!(
            frames.as_slice(),
            [Err(FrameError::LineTooLong { len, .. })] if *len == MAX_LINE_LENGTH + 1
        ));
    }

    #[test]
    fn test_too_many_body_lines_rejected() {
        let mut input = b"REX REGISTER\r\n".to_vec();
        for _ in 0..=MAX_BODY_LINES {
            input.extend_from_slice(b"x\r\n");
        }
        let frames = decode_all(&input);
        assert!(matches!(
            frames.as_slice(),
            [Err(FrameError::TooManyBodyLines { .. })]
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let frames = decode_all(b"REX \xff\xfe\r\n\r\n\r\n");
        assert!(matches!(frames.as_slice(), [Err(FrameError::InvalidUtf8)]));
    }

    #[test]
    fn test_encode_rejects_empty_body_line() {
        let frame = Frame::with_body("REX REGISTER", vec![String::new()]);
        assert!(matches!(
            frame.to_bytes(),
            Err(FrameError::InvalidLine { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_embedded_crlf() {
        assert!(Frame::new("REX PING\r\nREX CLOSE").to_bytes().is_err());
        assert!(Frame::new("").to_bytes().is_err());
    }

    #[test]
    fn test_malformed_classification() {
        assert!(FrameError::EmptyBodyLine.is_malformed());
        assert!(!FrameError::Io(std::io::Error::other("boom")).is_malformed());
    }

    #[tokio::test]
    async fn test_stream_of_frames_then_eof() {
        let input: &[u8] = b"REX REGISTER\r\n\r\n\r\nREX PING\r\n\r\n\r\n";
        let mut reader = FramedRead::new(input, FrameCodec::new());

        assert_eq!(reader.next().await.unwrap().unwrap(), Frame::register());
        assert_eq!(reader.next().await.unwrap().unwrap(), Frame::ping());
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_end_of_stream() {
        let input: &[u8] = b"REX PING\r\n\r\n";
        let mut reader = FramedRead::new(input, FrameCodec::new());
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_line_is_end_of_stream() {
        let input: &[u8] = b"REX PING\r\n\r\n\r\nREX PI";
        let mut reader = FramedRead::new(input, FrameCodec::new());
        assert_eq!(reader.next().await.unwrap().unwrap(), Frame::ping());
        assert!(reader.next().await.is_none());
    }
}
