use std::borrow::Cow;

/// A fully framed request as handed to a `RequestHandler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// The whole first line, e.g. `POST /RPC2 HTTP/1.1`.
    pub request_line: String,
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// get header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Only an explicit `Connection: keep-alive` keeps the socket open.
    pub fn is_keep_alive(&self) -> bool {
        self.header("connection")
            .map_or(false, |value| value.eq_ignore_ascii_case("keep-alive"))
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> HttpResponse {
        HttpResponse::new(200)
    }

    pub fn internal_error() -> HttpResponse {
        HttpResponse::new(500)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> HttpResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> HttpResponse {
        self.body = body.into();
        self
    }

    /// Wire form. `Content-Length` is always computed from the body; any
    /// caller-supplied one is ignored.
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} \r\n", self.status);
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut buf = Vec::with_capacity(head.len() + self.body.len());
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }
}
