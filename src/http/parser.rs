use std::mem;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::http::message::HttpRequest;

/// Largest header block accepted before the blank line shows up.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3,8}\s.*HTTP").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpParseError {
    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),
    #[error("request has no headers")]
    MissingHeaders,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("header block is not valid UTF-8")]
    InvalidEncoding,
    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("negative Content-Length: {0}")]
    NegativeContentLength(String),
    #[error("Content-Length {length} exceeds the limit of {max}")]
    ContentTooLarge { length: String, max: usize },
    #[error("parser was invalidated by an earlier error")]
    Invalidated,
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingBody {
        head: HttpRequest,
        content_length: usize,
    },
    Invalidated,
}

/// Incremental request framer for one connection. Bytes go in through
/// `feed`, complete requests come out of `next_request` in arrival order.
/// Any parse failure poisons the parser for good.
#[derive(Debug)]
pub struct RequestParser {
    buffer: Vec<u8>,
    state: State,
    max_content_length: usize,
}

impl RequestParser {
    pub fn new(max_content_length: usize) -> RequestParser {
        RequestParser {
            buffer: Vec::new(),
            state: State::AwaitingHeader,
            max_content_length,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<(), HttpParseError> {
        if let State::Invalidated = self.state {
            return Err(HttpParseError::Invalidated);
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Body bytes still missing for the request being received, if its
    /// header block is already complete.
    pub fn remaining(&self) -> Option<usize> {
        match self.state {
            State::AwaitingBody { content_length, .. } => {
                Some(content_length.saturating_sub(self.buffer.len()))
            }
            _ => None,
        }
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(self.state, State::Invalidated)
    }

    /// Buffered bytes that do not belong to a completed request yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_request(&mut self) -> Result<Option<HttpRequest>, HttpParseError> {
        let result = self.advance();
        if result.is_err() {
            self.state = State::Invalidated;
            self.buffer.clear();
        }
        result
    }

    fn advance(&mut self) -> Result<Option<HttpRequest>, HttpParseError> {
        loop {
            match mem::replace(&mut self.state, State::AwaitingHeader) {
                State::Invalidated => return Err(HttpParseError::Invalidated),
                State::AwaitingHeader => {
                    let end = match find_headers_end(&self.buffer) {
                        Some(end) => end,
                        None if self.buffer.len() > MAX_HEADER_SIZE => {
                            return Err(HttpParseError::HeaderTooLarge(MAX_HEADER_SIZE));
                        }
                        None => return Ok(None),
                    };
                    let head = parse_head(&self.buffer[..end])?;
                    let content_length = content_length(&head, self.max_content_length)?;
                    self.buffer.drain(..end + 4);
                    self.state = State::AwaitingBody {
                        head,
                        content_length,
                    };
                }
                State::AwaitingBody {
                    mut head,
                    content_length,
                } => {
                    if self.buffer.len() < content_length {
                        self.state = State::AwaitingBody {
                            head,
                            content_length,
                        };
                        return Ok(None);
                    }
                    head.body = self.buffer.drain(..content_length).collect();
                    return Ok(Some(head));
                }
            }
        }
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_head(bytes: &[u8]) -> Result<HttpRequest, HttpParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| HttpParseError::InvalidEncoding)?;
    // tolerate stray line breaks between pipelined requests
    let mut lines = text.trim_start_matches("\r\n").split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    if !REQUEST_LINE.is_match(request_line) {
        return Err(HttpParseError::BadRequestLine(request_line.to_string()));
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let headers = lines
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| HttpParseError::MalformedHeader(line.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if headers.is_empty() {
        return Err(HttpParseError::MissingHeaders);
    }

    Ok(HttpRequest {
        request_line: request_line.to_string(),
        method,
        target,
        headers,
        body: Vec::new(),
    })
}

/// Absent or non-numeric means zero.
fn content_length(head: &HttpRequest, max: usize) -> Result<usize, HttpParseError> {
    let value = match head.header("content-length") {
        Some(value) => value,
        None => return Ok(0),
    };
    let too_large = || HttpParseError::ContentTooLarge {
        length: value.to_string(),
        max,
    };

    if let Some(digits) = value.strip_prefix('-') {
        if is_number(digits) {
            return Err(HttpParseError::NegativeContentLength(value.to_string()));
        }
        return Ok(0);
    }
    if !is_number(value) {
        return Ok(0);
    }
    match value.parse::<usize>() {
        Ok(length) if length <= max => Ok(length),
        _ => Err(too_large()),
    }
}

fn is_number(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RequestParser {
        RequestParser::new(1024)
    }

    fn parse_all(parser: &mut RequestParser) -> Result<Vec<HttpRequest>, HttpParseError> {
        let mut requests = Vec::new();
        while let Some(request) = parser.next_request()? {
            requests.push(request);
        }
        Ok(requests)
    }

    #[test]
    fn test_incremental_body() {
        let mut parser = parser();
        parser
            .feed(b"POST /x HTTP/1.0\r\nContent-Length: 4\r\n\r\n")
            .unwrap();
        assert_eq!(parser.next_request(), Ok(None));
        assert_eq!(parser.remaining(), Some(4));

        parser.feed(b"1").unwrap();
        assert_eq!(parser.next_request(), Ok(None));
        parser.feed(b"23").unwrap();
        assert_eq!(parser.next_request(), Ok(None));
        assert_eq!(parser.remaining(), Some(1));
        parser.feed(b"4").unwrap();

        let request = parser.next_request().unwrap().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/x");
        assert_eq!(request.body, b"1234");
        assert_eq!(parser.remaining(), None);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_split_header() {
        let mut parser = parser();
        parser.feed(b"POST / HTTP/1.1\r\nConte").unwrap();
        assert_eq!(parser.next_request(), Ok(None));
        parser.feed(b"nt-Length: 2\r\n\r").unwrap();
        assert_eq!(parser.next_request(), Ok(None));
        parser.feed(b"\nok").unwrap();
        assert_eq!(parser.next_request().unwrap().unwrap().body, b"ok");
    }

    #[test]
    fn test_pipelined() {
        let mut parser = parser();
        parser
            .feed(b"POST /a HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcdPOST /b HTTP/1.1\r\nContent-Length: 2\r\n\r\n:)")
            .unwrap();
        let requests = parse_all(&mut parser).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body, b"abcd");
        assert_eq!(requests[1].target, "/b");
        assert_eq!(requests[1].body_text(), ":)");
    }

    #[test]
    fn test_missing_content_length() {
        let mut parser = parser();
        parser.feed(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let request = parser.next_request().unwrap().unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.body.is_empty());
        assert_eq!(request.header("HOST"), Some("localhost"));
    }

    #[test]
    fn test_lenient_content_length() {
        let mut parser = parser();
        parser
            .feed(b"POST / HTTP/1.1\r\ncontent-length: lots\r\n\r\n")
            .unwrap();
        assert!(parser.next_request().unwrap().unwrap().body.is_empty());
    }

    #[test]
    fn test_negative_content_length() {
        let mut parser = parser();
        parser
            .feed(b"POST / HTTP/1.1\r\nContent-Length: -123\r\n\r\n")
            .unwrap();
        assert_eq!(
            parser.next_request(),
            Err(HttpParseError::NegativeContentLength("-123".to_string()))
        );
        assert!(parser.is_invalidated());
        assert_eq!(parser.feed(b"more"), Err(HttpParseError::Invalidated));
        assert_eq!(parser.next_request(), Err(HttpParseError::Invalidated));
    }

    #[test]
    fn test_oversized_content_length() {
        let mut parser = parser();
        parser
            .feed(b"POST / HTTP/1.1\r\nContent-Length: 1025\r\n\r\n")
            .unwrap();
        assert!(matches!(
            parser.next_request(),
            Err(HttpParseError::ContentTooLarge { max: 1024, .. })
        ));

        let mut parser = RequestParser::new(1024);
        parser
            .feed(b"POST / HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n")
            .unwrap();
        assert!(matches!(
            parser.next_request(),
            Err(HttpParseError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_request_line() {
        let heads: [&[u8]; 3] = [
            b"post / HTTP/1.1\r\nHost: x\r\n\r\n",
            b"POST / SMTP\r\nHost: x\r\n\r\n",
            b"PROPPATCHES / HTTP/1.1\r\nHost: x\r\n\r\n",
        ];
        for head in heads {
            let mut parser = parser();
            parser.feed(head).unwrap();
            assert!(matches!(
                parser.next_request(),
                Err(HttpParseError::BadRequestLine(_))
            ));
        }
    }

    #[test]
    fn test_missing_headers() {
        let mut parser = parser();
        parser.feed(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parser.next_request(), Err(HttpParseError::MissingHeaders));
    }

    #[test]
    fn test_malformed_header() {
        let mut parser = parser();
        parser
            .feed(b"POST / HTTP/1.1\r\nno colon here\r\n\r\n")
            .unwrap();
        assert_eq!(
            parser.next_request(),
            Err(HttpParseError::MalformedHeader("no colon here".to_string()))
        );
    }

    #[test]
    fn test_header_too_large() {
        let mut parser = parser();
        parser.feed(b"POST / HTTP/1.1\r\n").unwrap();
        parser.feed(&vec![b'a'; MAX_HEADER_SIZE]).unwrap();
        assert_eq!(
            parser.next_request(),
            Err(HttpParseError::HeaderTooLarge(MAX_HEADER_SIZE))
        );
    }
}
