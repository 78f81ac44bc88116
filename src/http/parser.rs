//! Incremental HTTP/1.1 request parser.
//!
//! The socket is read in small fixed chunks; the parser accumulates only
//! a bounded carryover between calls and walks an explicit state machine,
//! so a request split at any point still parses. Its limits are sized
//! for the routes this device serves, not for general HTTP.

use crate::http::response::StatusCode;

/// Bytes scanned for the method separator; longest method is `GET `.
const METHOD_SPAN: usize = 4;
/// Longest URI; `/next_params` sets the bound. Overflow degrades to `/`.
const URI_MAX: usize = 12;
/// Longest interpreted header line: `Content-Length: 1234\r\n`.
const HEADER_LINE_MAX: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

/// A fully received request, ready for routing.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: Vec<u8>,
    pub body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Request(Request),
    /// Malformed input; answer with this status and stop parsing.
    Reject(StatusCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Method,
    Uri,
    SkipLineTail,
    HeaderLine,
    Body,
}

enum Step {
    Advance,
    NeedMore,
    Done(ParseOutcome),
}

pub struct RequestParser {
    state: ParseState,
    buf: Vec<u8>,
    method: Option<Method>,
    uri: Vec<u8>,
    content_length: Option<usize>,
    remaining: usize,
    body: Vec<u8>,
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Method,
            buf: Vec::new(),
            method: None,
            uri: Vec::new(),
            content_length: None,
            remaining: 0,
            body: Vec::new(),
        }
    }

    /// True when bytes were required but have not arrived; an EOF here
    /// is a malformed request.
    pub fn mid_request(&self) -> bool {
        self.state != ParseState::Method || !self.buf.is_empty()
    }

    /// Append a chunk and run the machine. Feeding an empty chunk
    /// re-processes buffered carryover (pipelined requests).
    pub fn feed(&mut self, chunk: &[u8]) -> Option<ParseOutcome> {
        self.buf.extend_from_slice(chunk);
        let mut pos = 0;
        let mut outcome = None;
        loop {
            match self.step(&mut pos) {
                Step::Advance => continue,
                Step::NeedMore => break,
                Step::Done(done) => {
                    outcome = Some(done);
                    break;
                }
            }
        }
        self.buf.drain(..pos);
        outcome
    }

    fn step(&mut self, pos: &mut usize) -> Step {
        let avail = &self.buf[*pos..];
        match self.state {
            ParseState::Method => match find_byte(avail, b' ') {
                None => {
                    if avail.len() >= METHOD_SPAN {
                        *pos = self.buf.len();
                        Step::Done(ParseOutcome::Reject(StatusCode::BadRequest))
                    } else {
                        Step::NeedMore
                    }
                }
                Some(space) => {
                    let method = &avail[..space];
                    if method.eq_ignore_ascii_case(b"GET") {
                        self.method = Some(Method::Get);
                    } else if method.eq_ignore_ascii_case(b"PUT") {
                        self.method = Some(Method::Put);
                    } else {
                        *pos = self.buf.len();
                        return Step::Done(ParseOutcome::Reject(StatusCode::NotImplemented));
                    }
                    self.state = ParseState::Uri;
                    *pos += space + 1;
                    Step::Advance
                }
            },

            ParseState::Uri => match find_byte(avail, b' ') {
                None => {
                    if avail.len() > URI_MAX {
                        // Overlong URI: degrade to the root path instead
                        // of failing the request.
                        self.uri = b"/".to_vec();
                        self.state = ParseState::SkipLineTail;
                        *pos = self.buf.len();
                        Step::Advance
                    } else {
                        Step::NeedMore
                    }
                }
                Some(space) => {
                    self.uri = avail[..space].to_vec();
                    self.state = ParseState::SkipLineTail;
                    *pos += space + 1;
                    Step::Advance
                }
            },

            ParseState::SkipLineTail => match find_byte(avail, b'\n') {
                None => {
                    *pos = self.buf.len();
                    Step::NeedMore
                }
                Some(nl) => {
                    self.state = ParseState::HeaderLine;
                    *pos += nl + 1;
                    Step::Advance
                }
            },

            ParseState::HeaderLine => match find_byte(avail, b'\n') {
                None => {
                    if avail.len() > HEADER_LINE_MAX {
                        // Overlong header line: skip it rather than fail.
                        self.state = ParseState::SkipLineTail;
                        *pos = self.buf.len();
                        Step::Advance
                    } else {
                        Step::NeedMore
                    }
                }
                Some(nl) => {
                    let line = &avail[..nl];
                    if line.is_empty() || line[line.len() - 1] != b'\r' {
                        // Bare LF without CR.
                        *pos = self.buf.len();
                        return Step::Done(ParseOutcome::Reject(StatusCode::BadRequest));
                    }
                    if line.len() == 1 {
                        // Empty line: end of headers.
                        *pos += nl + 1;
                        return match self.content_length {
                            None => match self.method {
                                Some(Method::Put) => {
                                    Step::Done(ParseOutcome::Reject(StatusCode::LengthRequired))
                                }
                                _ => Step::Done(self.emit()),
                            },
                            Some(length) => {
                                self.remaining = length;
                                self.body.clear();
                                self.state = ParseState::Body;
                                Step::Advance
                            }
                        };
                    }
                    // Only Content-Length is interpreted.
                    if let Some(colon) = find_byte(line, b':') {
                        if colon == 14 && line[..colon].eq_ignore_ascii_case(b"content-length") {
                            let value = std::str::from_utf8(&line[colon + 1..line.len() - 1])
                                .ok()
                                .and_then(|text| text.trim().parse::<usize>().ok());
                            match value {
                                Some(length) => self.content_length = Some(length),
                                None => {
                                    *pos = self.buf.len();
                                    return Step::Done(ParseOutcome::Reject(
                                        StatusCode::BadRequest,
                                    ));
                                }
                            }
                        }
                    }
                    *pos += nl + 1;
                    Step::Advance
                }
            },

            ParseState::Body => {
                let take = self.remaining.min(avail.len());
                self.body.extend_from_slice(&avail[..take]);
                *pos += take;
                self.remaining -= take;
                if self.remaining == 0 {
                    Step::Done(self.emit())
                } else {
                    Step::NeedMore
                }
            }
        }
    }

    fn emit(&mut self) -> ParseOutcome {
        let request = Request {
            method: self.method.take().unwrap_or(Method::Get),
            uri: std::mem::take(&mut self.uri),
            body: std::mem::take(&mut self.body),
        };
        self.state = ParseState::Method;
        self.content_length = None;
        self.remaining = 0;
        ParseOutcome::Request(request)
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let mut parser = RequestParser::new();
        let outcome = parser.feed(b"GET /params HTTP/1.1\r\n\r\n");
        let Some(ParseOutcome::Request(req)) = outcome else {
            panic!("expected a request, got {outcome:?}");
        };
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.uri, b"/params");
        assert!(req.body.is_empty());
        assert!(!parser.mid_request());
    }
}
