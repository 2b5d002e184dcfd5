//! Wire frames exchanged between client and server connections.
//!
//! Every frame travels inside a big-endian `u32` length prefix
//! ([`LengthDelimitedCodec`]). Inside the prefix:
//!
//! - request:  `u16` path length, path (UTF-8), body
//! - response: `u16` status, `u8` encoding name length, encoding name, body
//!
//! An empty encoding name means the response carries no declared encoding.

use std::marker::PhantomData;

use arkalix_core::Fault;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::StatusCode;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::service::Encoding;

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame truncated: expected {expected} more bytes")]
    Truncated { expected: usize },
    #[error("frame field is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("{field} of {len} bytes exceeds the frame field limit")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("connection command queue is full")]
    Busy,
    #[error("connection closed")]
    Closed,
    #[error("timed out connecting to {0}")]
    ConnectTimeout(std::net::SocketAddr),
}

impl From<TransportError> for Fault {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Io(error) => Fault::from(error),
            other => Fault::custom("transport", other),
        }
    }
}

/// A frame type that can be written to and read from a frame payload.
pub trait Frame: Sized {
    fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError>;

    fn decode(src: Bytes) -> Result<Self, TransportError>;
}

// ---------------------------------------------------------------------------
// RequestFrame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub path: String,
    pub body: Bytes,
}

impl Frame for RequestFrame {
    fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError> {
        let path_len = u16::try_from(self.path.len()).map_err(|_| TransportError::FieldTooLong {
            field: "path",
            len: self.path.len(),
        })?;
        dst.reserve(2 + self.path.len() + self.body.len());
        dst.put_u16(path_len);
        dst.put_slice(self.path.as_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }

    fn decode(mut src: Bytes) -> Result<Self, TransportError> {
        let path_len = usize::from(read_u16(&mut src)?);
        let path = read_str(&mut src, path_len)?;
        Ok(Self { path, body: src })
    }
}

// ---------------------------------------------------------------------------
// ResponseFrame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub status: StatusCode,
    pub encoding: Option<Encoding>,
    pub body: Bytes,
}

impl Frame for ResponseFrame {
    fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError> {
        let name = self.encoding.as_ref().map_or("", Encoding::as_str);
        let name_len = u8::try_from(name.len()).map_err(|_| TransportError::FieldTooLong {
            field: "encoding",
            len: name.len(),
        })?;
        dst.reserve(3 + name.len() + self.body.len());
        dst.put_u16(self.status.as_u16());
        dst.put_u8(name_len);
        dst.put_slice(name.as_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }

    fn decode(mut src: Bytes) -> Result<Self, TransportError> {
        let raw_status = read_u16(&mut src)?;
        let status =
            StatusCode::from_u16(raw_status).map_err(|_| TransportError::InvalidStatus(raw_status))?;
        if src.remaining() < 1 {
            return Err(TransportError::Truncated { expected: 1 });
        }
        let name_len = usize::from(src.get_u8());
        let name = read_str(&mut src, name_len)?;
        let encoding = (!name.is_empty()).then(|| Encoding::named(&name));
        Ok(Self {
            status,
            encoding,
            body: src,
        })
    }
}

fn read_u16(src: &mut Bytes) -> Result<u16, TransportError> {
    if src.remaining() < 2 {
        return Err(TransportError::Truncated {
            expected: 2 - src.remaining(),
        });
    }
    Ok(src.get_u16())
}

fn read_str(src: &mut Bytes, len: usize) -> Result<String, TransportError> {
    if src.remaining() < len {
        return Err(TransportError::Truncated {
            expected: len - src.remaining(),
        });
    }
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| TransportError::InvalidUtf8)
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// Length-delimited codec reading `In` frames and writing `Out` frames.
#[derive(Debug)]
pub struct FrameCodec<In, Out> {
    inner: LengthDelimitedCodec,
    _frames: PhantomData<fn(Out) -> In>,
}

/// Codec of the serving side of a connection.
pub type ServerCodec = FrameCodec<RequestFrame, ResponseFrame>;

/// Codec of the consuming side of a connection.
pub type ClientCodec = FrameCodec<ResponseFrame, RequestFrame>;

impl<In, Out> FrameCodec<In, Out> {
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
            _frames: PhantomData,
        }
    }
}

impl<In: Frame, Out> Decoder for FrameCodec<In, Out> {
    type Item = In;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, TransportError> {
        match self.inner.decode(src)? {
            Some(payload) => In::decode(payload.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl<In, Out: Frame> Encoder<Out> for FrameCodec<In, Out> {
    type Error = TransportError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), TransportError> {
        let mut payload = BytesMut::new();
        item.encode(&mut payload)?;
        self.inner.encode(payload.freeze(), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn request_frame_through_codecs() {
        let mut client = ClientCodec::new(1024);
        let mut server = ServerCodec::new(1024);
        let mut wire = BytesMut::new();

        let sent = RequestFrame {
            path: "/temperature/now".to_string(),
            body: Bytes::from_static(b"celsius"),
        };
        client.encode(sent.clone(), &mut wire).unwrap();
        // 4-byte length prefix + 2-byte path length + path + body
        assert_eq!(wire.len(), 4 + 2 + 16 + 7);

        let received = server.decode(&mut wire).unwrap();
        assert_eq!(received, Some(sent));
        assert!(wire.is_empty());
    }

    #[test]
    fn response_frame_without_encoding() {
        let mut client = ClientCodec::new(1024);
        let mut server = ServerCodec::new(1024);
        let mut wire = BytesMut::new();

        server
            .encode(
                ResponseFrame {
                    status: StatusCode::NOT_FOUND,
                    encoding: None,
                    body: Bytes::new(),
                },
                &mut wire,
            )
            .unwrap();
        let received = client.decode(&mut wire).unwrap().unwrap();
        assert_eq!(received.status, StatusCode::NOT_FOUND);
        assert!(received.encoding.is_none());
        assert!(received.body.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut client = ClientCodec::new(1024);
        let mut server = ServerCodec::new(1024);
        let mut wire = BytesMut::new();
        server
            .encode(
                ResponseFrame {
                    status: StatusCode::OK,
                    encoding: Some(Encoding::JSON),
                    body: Bytes::from_static(b"{\"t\":21}"),
                },
                &mut wire,
            )
            .unwrap();

        let mut head = wire.split_to(5);
        assert!(client.decode(&mut head).unwrap().is_none());
        head.unsplit(wire);
        let received = client.decode(&mut head).unwrap().unwrap();
        assert_eq!(received.encoding, Some(Encoding::JSON));
        assert_eq!(received.body, Bytes::from_static(b"{\"t\":21}"));
    }

    #[test]
    fn truncated_payload_rejected() {
        let err = RequestFrame::decode(Bytes::from_static(&[0, 10, b'/'])).unwrap_err();
        assert!(matches!(err, TransportError::Truncated { expected: 9 }));

        let err = ResponseFrame::decode(Bytes::from_static(&[0])).unwrap_err();
        assert!(matches!(err, TransportError::Truncated { expected: 1 }));
    }

    #[test]
    fn invalid_status_rejected() {
        let err = ResponseFrame::decode(Bytes::from_static(&[0, 42, 0])).unwrap_err();
        assert!(matches!(err, TransportError::InvalidStatus(42)));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut client = ClientCodec::new(8);
        let mut wire = BytesMut::new();
        let err = client
            .encode(
                RequestFrame {
                    path: "/long/path".to_string(),
                    body: Bytes::new(),
                },
                &mut wire,
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    proptest! {
        #[test]
        fn decoding_arbitrary_payloads_never_panics(
            payload in proptest::collection::vec(any::<u8>(), 0..64)
        ) {
            let _ = RequestFrame::decode(Bytes::from(payload.clone()));
            let _ = ResponseFrame::decode(Bytes::from(payload));
        }

        #[test]
        fn request_path_survives_codec(
            path in "/[a-z0-9/_-]{0,40}",
            body in proptest::collection::vec(any::<u8>(), 0..32)
        ) {
            let mut wire = BytesMut::new();
            let sent = RequestFrame { path, body: Bytes::from(body) };
            ClientCodec::new(1024).encode(sent.clone(), &mut wire).unwrap();
            let received = ServerCodec::new(1024).decode(&mut wire).unwrap();
            prop_assert_eq!(received, Some(sent));
        }
    }
}
