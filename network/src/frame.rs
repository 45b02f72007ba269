use crate::{PacketBuffer, PacketSerdeError};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The largest frame, in bytes, either side accepts.
pub const MAX_FRAME_LENGTH: usize = 1 << 21;

/// Pre-processes frames on a connection.
///
/// Every frame is `varint frame length | varint data length | body`. A data length of zero means
/// the body is stored as-is, otherwise the body is zlib compressed and inflates to exactly the data
/// length. Payloads at or above the compression threshold are compressed; a negative threshold
/// disables compression on the sending side. Receivers always accept both forms, so peers may use
/// different thresholds.
#[derive(Clone, Copy, Debug)]
pub struct IoHandle {
    compression_threshold: i32,
}

impl IoHandle {
    /// Creates a handle which compresses payloads of at least `compression_threshold` bytes.
    pub fn new(compression_threshold: i32) -> Self {
        IoHandle {
            compression_threshold,
        }
    }

    /// Sets the compression threshold to the given value. Any negative value disables compression.
    pub fn set_compression_threshold(&mut self, compression_threshold: i32) {
        self.compression_threshold = compression_threshold;
    }

    /// Wraps the given packet payload in a frame header, compressing it if needed.
    pub fn encode_frame(&self, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut header = PacketBuffer::new(10);
        let body: Vec<u8>;

        if self.compression_threshold >= 0 && payload.len() >= self.compression_threshold as usize
        {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload)?;
            body = encoder.finish()?;

            let data_len = payload.len() as i32;
            header.write_varying(&((PacketBuffer::varint_size(data_len) + body.len()) as i32));
            header.write_varying(&data_len);
        } else {
            body = payload.to_vec();
            header.write_varying(&(payload.len() as i32 + 1));
            header.write_varying(&0i32);
        }

        let mut frame = header.into_inner();
        frame.extend_from_slice(&body);

        if frame.len() > MAX_FRAME_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Frame exceeds maximum length",
            ));
        }

        Ok(frame)
    }

    /// Strips the frame header off of the given frame body (everything after the frame length),
    /// inflating it if it was compressed.
    pub fn decode_body(&self, frame: Vec<u8>) -> Result<PacketBuffer, PacketSerdeError> {
        let mut buffer = PacketBuffer::from(frame);
        let data_len = buffer.read_varying::<i32>()?;

        if data_len == 0 {
            let start = buffer.cursor();
            return Ok(PacketBuffer::from(&buffer[start ..]));
        }

        if data_len < 0 || data_len as usize > MAX_FRAME_LENGTH {
            return Err(PacketSerdeError::Internal("Invalid uncompressed length"));
        }

        let start = buffer.cursor();
        let mut decoder = ZlibDecoder::new(&buffer[start ..]).take(data_len as u64);
        let mut inflated = Vec::with_capacity(data_len as usize);
        decoder.read_to_end(&mut inflated)?;

        if inflated.len() != data_len as usize {
            return Err(PacketSerdeError::Internal(
                "Compressed body does not match its declared length",
            ));
        }

        Ok(PacketBuffer::from(inflated))
    }

    /// Reads one frame from the given stream, returning its payload. `Ok(None)` signals the stream
    /// was closed cleanly between frames.
    pub async fn read_frame<R>(&self, stream: &mut R) -> Result<Option<PacketBuffer>, PacketSerdeError>
    where R: AsyncRead + Unpin {
        let frame_len = match read_frame_length(stream).await? {
            Some(len) => len,
            None => return Ok(None),
        };

        let mut frame = vec![0u8; frame_len];
        stream.read_exact(&mut frame).await?;
        self.decode_body(frame).map(Some)
    }

    /// Encodes and writes the given payload to the stream as a single frame.
    pub async fn write_frame<W>(&self, stream: &mut W, payload: &[u8]) -> io::Result<()>
    where W: AsyncWrite + Unpin {
        let frame = self.encode_frame(payload)?;
        stream.write_all(&frame).await
    }
}

async fn read_frame_length<R>(stream: &mut R) -> Result<Option<usize>, PacketSerdeError>
where R: AsyncRead + Unpin {
    let mut value: u32 = 0;

    for i in 0 .. 5 {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof && i == 0 =>
                return Ok(None),
            Err(error) => return Err(error.into()),
        };

        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            let len = value as usize;
            if len == 0 || len > MAX_FRAME_LENGTH {
                return Err(PacketSerdeError::Internal("Invalid frame length"));
            }
            return Ok(Some(len));
        }
    }

    Err(PacketSerdeError::VarIntOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_payload_is_stored() {
        let handle = IoHandle::new(64);
        let payload = [7u8, 1, 2, 3];
        let frame = handle.encode_frame(&payload).unwrap();
        assert_eq!(frame, vec![5, 0, 7, 1, 2, 3]);

        let mut stream = &frame[..];
        let decoded = handle.read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(decoded.as_slice(), &payload);
        assert!(handle.read_frame(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn large_payload_is_compressed() {
        let sender = IoHandle::new(16);
        let receiver = IoHandle::new(-1);
        let payload = vec![3u8; 4096];

        let mut wire = Vec::new();
        sender.write_frame(&mut wire, &payload).await.unwrap();
        sender.write_frame(&mut wire, &[9]).await.unwrap();
        assert!(wire.len() < payload.len(), "Payload was not compressed.");

        let mut stream = &wire[..];
        let first = receiver.read_frame(&mut stream).await.unwrap().unwrap();
        let second = receiver.read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(first.as_slice(), &payload[..]);
        assert_eq!(second.as_slice(), &[9u8]);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let handle = IoHandle::new(-1);
        let mut frame = handle.encode_frame(&[1, 2, 3, 4]).unwrap();
        frame.truncate(3);

        let mut stream = &frame[..];
        assert!(handle.read_frame(&mut stream).await.is_err());
    }
}
