//! `tokio_util` codec for terminator-delimited frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::FrameError;
use crate::terminator::Terminator;

/// Decodes `(payload, terminator)` frames and encodes command lines.
#[derive(Debug, Clone)]
pub struct TerminatorCodec {
    max_frame_size: usize,
    scanned: usize,
}

impl TerminatorCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }
}

impl Default for TerminatorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TerminatorCodec {
    type Item = (Bytes, Terminator);
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.min(src.len());
        match src[start..]
            .iter()
            .position(|&b| Terminator::is_terminator(b))
        {
            Some(pos) => {
                self.scanned = 0;
                let payload = src.split_to(start + pos).freeze();
                let terminator = Terminator::try_from(src.get_u8())?;
                Ok(Some((payload, terminator)))
            }
            None if src.len() > self.max_frame_size => {
                let size = src.len();
                src.clear();
                self.scanned = 0;
                Err(FrameError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                })
            }
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}

impl Encoder<&str> for TerminatorCodec {
    type Error = FrameError;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        if !line.ends_with('\n') {
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[test]
    fn decodes_incrementally() {
        let mut codec = TerminatorCodec::new();
        let mut buf = BytesMut::from(&b"\x01\x02"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\x03\x06\x04\x15");
        let (payload, term) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"\x01\x02\x03");
        assert_eq!(term, Terminator::Ack);

        let (payload, term) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"\x04");
        assert_eq!(term, Terminator::Nack);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized() {
        let mut codec = TerminatorCodec::with_max_frame_size(4);
        let mut buf = BytesMut::from(&b"abcdefgh"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::FrameTooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let mut lines = FramedWrite::new(client_write, TerminatorCodec::new());
        lines.send("alarm status").await.unwrap();

        let mut request = [0u8; 13];
        tokio::io::AsyncReadExt::read_exact(&mut tokio::io::BufReader::new(server_read), &mut request)
            .await
            .unwrap();
        assert_eq!(&request, b"alarm status\n");

        tokio::io::AsyncWriteExt::write_all(&mut server_write, b"0\x06")
            .await
            .unwrap();

        let mut frames = FramedRead::new(client_read, TerminatorCodec::new());
        let (payload, term) = frames.next().await.unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"0");
        assert_eq!(term, Terminator::Ack);
    }
}
