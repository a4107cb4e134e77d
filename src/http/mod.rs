//! Minimal non-blocking HTTP/1.x server: incremental request framing,
//! pipelining and keep-alive over a single-threaded mio event loop.

pub mod message;
pub mod parser;
pub mod server;

pub use self::message::{HttpRequest, HttpResponse};
pub use self::parser::{HttpParseError, RequestParser};
pub use self::server::{HandlerError, HttpServer, RequestHandler, StopHandle};
