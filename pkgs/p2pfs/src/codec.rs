//! Wire framing for a single file exchange
//!
//! One stream carries exactly one frame:
//!
//! ```text
//! <filename>\n<raw file bytes><EOF>
//! ```
//!
//! There is no length prefix. The body ends when the writer closes its write
//! direction, so the body is exposed as a lazy stream of chunks rather than a
//! single buffer.

use bytes::{Bytes, BytesMut};
use futures::io::BufReader;
use futures::{
    stream, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stream,
    TryStreamExt,
};

use crate::error::{Result, TransferError};

/// The newline must appear within this many leading bytes of a stream.
pub const MAX_HEADER_LEN: usize = 4096;

/// Default size of body chunks produced by [`FrameReader::into_body`].
pub const CHUNK_SIZE: usize = 256 * 1024;

const HEADER_DELIMITER: u8 = b'\n';

/// One filename-plus-body unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFrame {
    pub name: String,
    pub body: Bytes,
}

impl TransferFrame {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            body: body.into(),
        })
    }
}

/// Check that a name can be carried in a frame header
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.as_bytes().contains(&HEADER_DELIMITER)
        || name.len() >= MAX_HEADER_LEN
    {
        return Err(TransferError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Write `name` followed by the delimiter.
pub async fn write_header<W>(io: &mut W, name: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    validate_name(name)?;
    io.write_all(name.as_bytes()).await?;
    io.write_all(&[HEADER_DELIMITER]).await?;
    Ok(())
}

/// Write a whole frame and flush. The caller closes the stream afterwards.
pub async fn write_frame<W>(io: &mut W, frame: &TransferFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_header(io, &frame.name).await?;
    io.write_all(&frame.body).await?;
    io.flush().await?;
    Ok(())
}

/// A decoded header with the rest of the stream still unread
pub struct FrameReader<R> {
    name: String,
    reader: BufReader<R>,
}

impl<R> std::fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("name", &self.name)
            .finish()
    }
}

/// Read bytes up to and including the first newline.
pub async fn read_header<R>(io: R) -> Result<FrameReader<R>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(io);
    let mut header = Vec::new();
    (&mut reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(HEADER_DELIMITER, &mut header)
        .await?;

    if header.last() != Some(&HEADER_DELIMITER) {
        return Err(TransferError::MalformedHeader(if header.len() >= MAX_HEADER_LEN {
            format!("no newline within the first {} bytes", MAX_HEADER_LEN)
        } else {
            format!("end of input after {} header bytes", header.len())
        }));
    }
    header.pop();

    let name = String::from_utf8(header)
        .map_err(|_| TransferError::MalformedHeader("file name is not valid UTF-8".into()))?;
    if name.is_empty() {
        return Err(TransferError::MalformedHeader("empty file name".into()));
    }

    Ok(FrameReader { name, reader })
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Body bytes as they arrive, ending at end-of-input.
    ///
    /// Each chunk holds exactly the bytes of one read, at most `chunk_size`.
    pub fn into_body(self, chunk_size: usize) -> impl Stream<Item = std::io::Result<Bytes>> {
        let scratch = vec![0u8; chunk_size.max(1)];
        stream::try_unfold(
            (self.reader, scratch),
            |(mut reader, mut scratch)| async move {
                let n = reader.read(&mut scratch).await?;
                let next = if n == 0 {
                    None
                } else {
                    let chunk = Bytes::copy_from_slice(&scratch[..n]);
                    Some((chunk, (reader, scratch)))
                };
                Ok::<_, std::io::Error>(next)
            },
        )
    }

    /// Accumulate the body in memory, failing once it grows past `limit`.
    pub async fn read_body(self, limit: Option<u64>) -> Result<Bytes> {
        let body = self.into_body(CHUNK_SIZE);
        futures::pin_mut!(body);

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            if let Some(limit) = limit {
                if (buf.len() + chunk.len()) as u64 > limit {
                    return Err(TransferError::BodyTooLarge { limit });
                }
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub async fn into_frame(self, limit: Option<u64>) -> Result<TransferFrame> {
        let name = self.name.clone();
        let body = self.read_body(limit).await?;
        Ok(TransferFrame { name, body })
    }
}

/// Decode one complete frame.
pub async fn read_frame<R>(io: R, limit: Option<u64>) -> Result<TransferFrame>
where
    R: AsyncRead + Unpin,
{
    read_header(io).await?.into_frame(limit).await
}
