//! HTTP response representation and serialization.
//!
//! The device speaks just enough HTTP/1.1 for its two routes: every
//! response is a status line, Content-Length, Connection, blank line and
//! body. Large bodies are streamed from a byte source in bounded chunks
//! instead of being buffered whole.

use std::fs::File;
use std::io;

use bytes::{Buf, BytesMut};

/// Status codes the routes can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 411 Length Required
    LengthRequired,
    /// 501 Not Implemented
    NotImplemented,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::LengthRequired => 411,
            StatusCode::NotImplemented => 501,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::NotImplemented => "Not Implemented",
        }
    }
}

/// A response ready to transmit: either a contiguous body, or a byte
/// source streamed behind a precomputed Content-Length.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub body: Vec<u8>,
    stream: Option<File>,
    stream_len: u64,
}

impl Response {
    /// 200 response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::Ok,
            body: body.into(),
            stream: None,
            stream_len: 0,
        }
    }

    /// Non-body status response; the reason phrase doubles as the body.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: status.reason_phrase().as_bytes().to_vec(),
            stream: None,
            stream_len: 0,
        }
    }

    /// 200 response streaming `file` verbatim.
    pub fn stream_file(file: File) -> io::Result<Self> {
        let stream_len = file.metadata()?.len();
        Ok(Self {
            status: StatusCode::Ok,
            body: Vec::new(),
            stream: Some(file),
            stream_len,
        })
    }

    pub fn content_length(&self) -> u64 {
        if self.stream.is_some() {
            self.stream_len
        } else {
            self.body.len() as u64
        }
    }

    /// Connections stay open only after a successful response.
    pub fn keeps_alive(&self) -> bool {
        self.status == StatusCode::Ok
    }

    pub fn take_stream(&mut self) -> Option<File> {
        self.stream.take()
    }
}

/// Outgoing byte cursor. Partial sends advance it; streamed chunks are
/// appended as earlier bytes drain.
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
            response.status.as_u16(),
            response.status.reason_phrase(),
            response.content_length(),
            if response.keeps_alive() {
                "keep-alive"
            } else {
                "close"
            },
        );
        let mut buf = BytesMut::with_capacity(head.len() + response.body.len());
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(&response.body);
        Self { buf }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
