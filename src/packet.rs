//! RADIUS wire format: a 4-byte big-endian header plus an opaque
//! attribute payload. Everything past the header is passed through
//! untouched; this module never inspects attribute contents.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use snafu::ResultExt;

use crate::error::{CodecError, IoSnafu, LengthUnderflowSnafu, UnexpectedEofSnafu};

/// RADIUS packet code for Accounting-Request; every other code routes
/// to the authentication upstream.
pub const ACCT_CODE: u8 = 4;

/// Largest datagram the UDP side will ever read or write.
pub const MAX_PACKET: usize = 4096;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: u8,
    pub identifier: u8,
    pub length: u16,
    pub data: Bytes,
}

impl Packet {
    /// Builds a packet from a code/identifier/payload, computing
    /// `length` as `4 + data.len()` so callers never have to keep the
    /// two in sync by hand.
    pub fn new(code: u8, identifier: u8, data: Bytes) -> Self {
        let length = (HEADER_LEN + data.len()) as u16;
        Packet {
            code,
            identifier,
            length,
            data,
        }
    }

    pub fn is_accounting(&self) -> bool {
        self.code == ACCT_CODE
    }

    /// Reads exactly one packet from an async byte stream: the 4-byte
    /// header, then exactly `length - 4` payload bytes. Any short read
    /// (including EOF mid-header or mid-payload) is a `CodecError`.
    pub async fn decode_async<R>(reader: &mut R) -> Result<Packet, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        read_exact_eof(reader, &mut header).await?;

        let code = header[0];
        let identifier = header[1];
        let length = u16::from_be_bytes([header[2], header[3]]);

        if length < HEADER_LEN as u16 {
            return LengthUnderflowSnafu { length }.fail();
        }

        let mut data = vec![0u8; (length as usize) - HEADER_LEN];
        read_exact_eof(reader, &mut data).await?;

        Ok(Packet {
            code,
            identifier,
            length,
            data: Bytes::from(data),
        })
    }

    /// Decodes a packet from an already-received datagram buffer (the
    /// UDP reply path). Trailing bytes beyond `length` (e.g. zero
    /// padding from a fixed-size receive buffer) are ignored, matching
    /// the stream decoder's "stop after `length` bytes" behavior.
    pub fn decode_bytes(buf: &[u8]) -> Result<Packet, CodecError> {
        if buf.len() < HEADER_LEN {
            return UnexpectedEofSnafu.fail();
        }
        let mut cursor = buf;
        let code = cursor.get_u8();
        let identifier = cursor.get_u8();
        let length = cursor.get_u16();

        if length < HEADER_LEN as u16 {
            return LengthUnderflowSnafu { length }.fail();
        }

        let data_len = (length as usize) - HEADER_LEN;
        if cursor.remaining() < data_len {
            return UnexpectedEofSnafu.fail();
        }
        let data = Bytes::copy_from_slice(&cursor[..data_len]);

        Ok(Packet {
            code,
            identifier,
            length,
            data,
        })
    }

    /// Emits the header in big-endian followed by `data`. The caller
    /// is responsible for `length == 4 + data.len()`, which every
    /// constructor here upholds.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.length as usize);
        buf.put_u8(self.code);
        buf.put_u8(self.identifier);
        buf.put_u16(self.length);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// `AsyncReadExt::read_exact` surfaces a short read as
/// `UnexpectedEof`; classify that into our `CodecError` instead of
/// treating every I/O error alike.
async fn read_exact_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => UnexpectedEofSnafu.fail(),
        Err(e) => Err(e).context(IoSnafu),
    }
}
