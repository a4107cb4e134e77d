use std::error::Error as StdError;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::ServerConfig;
use crate::error::{panic_message, Result};
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::RequestParser;

const LISTENER: Token = Token(0);

/// read chunk size.
const READ_BUF_SIZE: usize = 8192;

/// Bytes taken from one connection per spin before the others get a turn.
const READ_BUDGET: usize = 16 * READ_BUF_SIZE;

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Turns one framed request into a response. Runs inline on the event
/// loop thread.
pub trait RequestHandler {
    fn handle(&mut self, request: &HttpRequest) -> std::result::Result<HttpResponse, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: FnMut(&HttpRequest) -> std::result::Result<HttpResponse, HandlerError>,
{
    fn handle(&mut self, request: &HttpRequest) -> std::result::Result<HttpResponse, HandlerError> {
        self(request)
    }
}

/// Makes a running `spin()` close its listener and return.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        info!("Shutdown signal received");
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum ReadState {
    /// socket returned `WouldBlock`.
    Drained,
    /// budget used up with data possibly still queued in the socket.
    Pending,
    /// peer finished, or the stream can no longer be framed.
    Closed,
}

struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    parser: RequestParser,
    send_buf: Vec<u8>,
    send_pos: usize,
    /// set by a request without keep-alive; nothing more is read or handled.
    close_after_flush: bool,
}

impl Connection {
    fn new(stream: TcpStream, addr: SocketAddr, max_content_length: usize) -> Connection {
        Connection {
            stream,
            addr,
            parser: RequestParser::new(max_content_length),
            send_buf: Vec::new(),
            send_pos: 0,
            close_after_flush: false,
        }
    }

    /// Reads up to `READ_BUDGET` bytes, handing each chunk to the parser and
    /// answering completed requests as they appear, so the parser never holds
    /// more than one partial request plus one chunk.
    fn try_read<H: RequestHandler>(&mut self, handler: &mut H) -> io::Result<ReadState> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut budget = READ_BUDGET;
        while !self.close_after_flush {
            if budget == 0 {
                return Ok(ReadState::Pending);
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(ReadState::Closed),
                Ok(n) => {
                    budget = budget.saturating_sub(n);
                    if self.parser.feed(&buf[..n]).is_err() || !self.process(handler) {
                        return Ok(ReadState::Closed);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadState::Drained)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadState::Drained)
    }

    /// `Ok(true)` when the send buffer is empty.
    fn try_write(&mut self) -> io::Result<bool> {
        while self.send_pos < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.send_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.send_buf.clear();
        self.send_pos = 0;
        Ok(true)
    }

    fn queue_response(&mut self, response: &HttpResponse) {
        self.send_buf.extend_from_slice(&response.serialize());
    }

    /// Handles every complete request buffered so far, in order. Stops early
    /// after a request that does not ask for keep-alive.
    fn process<H: RequestHandler>(&mut self, handler: &mut H) -> bool {
        while !self.close_after_flush {
            let request = match self.parser.next_request() {
                Ok(Some(request)) => request,
                Ok(None) => return true,
                Err(e) => {
                    warn!("Dropping connection from {}: {}", self.addr, e);
                    return false;
                }
            };
            debug!("{} from {}", request.request_line, self.addr);

            let response = call_handler(handler, &request);
            self.queue_response(&response);
            if !request.is_keep_alive() {
                self.close_after_flush = true;
            }
        }
        true
    }
}

fn call_handler<H: RequestHandler>(handler: &mut H, request: &HttpRequest) -> HttpResponse {
    let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
        Ok(Ok(response)) => return response,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
    };
    error!("Failed to handle {}: {}", request.request_line, failure);
    HttpResponse::internal_error()
        .with_header("Content-Type", "text/plain")
        .with_body(format!("Internal Server Error\n\n{}\n", failure))
}

/// Slot table indexed by `token - 1`, with free-slot reuse.
struct ConnectionTable {
    connections: Vec<Option<Connection>>,
    free_slots: Vec<usize>,
    len: usize,
}

impl ConnectionTable {
    fn new() -> ConnectionTable {
        ConnectionTable {
            connections: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    fn vacant(&mut self) -> usize {
        if let Some(idx) = self.free_slots.pop() {
            idx
        } else {
            self.connections.push(None);
            self.connections.len() - 1
        }
    }

    fn set(&mut self, idx: usize, conn: Connection) {
        self.connections[idx] = Some(conn);
        self.len += 1;
    }

    fn release(&mut self, idx: usize) {
        self.free_slots.push(idx);
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.connections.get_mut(idx).and_then(|c| c.as_mut())
    }

    fn take(&mut self, idx: usize) -> Option<Connection> {
        let conn = self.connections.get_mut(idx).and_then(|c| c.take());
        if conn.is_some() {
            self.len -= 1;
            self.free_slots.push(idx);
        }
        conn
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Single-threaded HTTP/1.x server. Each `spin_*` call polls the listener
/// and all open connections, frames requests and hands them to the handler.
pub struct HttpServer<H> {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    connections: ConnectionTable,
    /// connections whose read budget ran out; serviced again next spin.
    pending_reads: Vec<usize>,
    handler: H,
    max_content_length: usize,
    max_connections: usize,
    poll_timeout: Duration,
    stop: StopHandle,
}

impl<H: RequestHandler> HttpServer<H> {
    pub fn bind(config: &ServerConfig, handler: H) -> Result<HttpServer<H>> {
        config.validate()?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.bind_addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        info!("XML-RPC server listening on {}", local_addr);

        Ok(HttpServer {
            poll,
            events: Events::with_capacity(config.events_capacity),
            listener: Some(listener),
            local_addr,
            connections: ConnectionTable::new(),
            pending_reads: Vec::new(),
            handler,
            max_content_length: config.max_content_length,
            max_connections: config.max_connections,
            poll_timeout: config.poll_timeout,
            stop: StopHandle::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Stops accepting. Open connections keep being serviced by later spins.
    pub fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
            info!("Stopped listening on {}", self.local_addr);
        }
    }

    /// Runs until the stop handle fires or the listener is closed.
    pub fn spin(&mut self) -> Result<()> {
        while self.listener.is_some() {
            if self.stop.is_stopped() {
                self.close();
                break;
            }
            self.spin_once(Some(self.poll_timeout))?;
        }
        Ok(())
    }

    /// Runs iterations until `duration` has elapsed.
    pub fn spin_for(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.spin_once(Some((deadline - now).min(self.poll_timeout)))?;
        }
    }

    /// One poll plus servicing of whatever became ready. Does not block while
    /// a connection still has unread input from an earlier spin.
    pub fn spin_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        let timeout = if self.pending_reads.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut accept = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                LISTENER => accept = true,
                token => ready.push((
                    token.0 - 1,
                    event.is_readable() || event.is_read_closed(),
                    event.is_writable(),
                )),
            }
        }
        ready.extend(self.pending_reads.drain(..).map(|idx| (idx, true, false)));

        if accept {
            self.accept();
        }
        for (idx, readable, writable) in ready {
            self.service(idx, readable, writable);
        }
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let listener = match self.listener.as_ref() {
                Some(listener) => listener,
                None => return,
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    if self.connections.len() >= self.max_connections {
                        warn!("Refusing connection from {}: too many connections", addr);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }

                    let idx = self.connections.vacant();
                    let mut conn = Connection::new(stream, addr, self.max_content_length);
                    match self.poll.registry().register(
                        &mut conn.stream,
                        Token(idx + 1),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        Ok(()) => {
                            debug!("Accepted connection from {}", addr);
                            self.connections.set(idx, conn);
                        }
                        Err(e) => {
                            warn!("Failed to register connection from {}: {}", addr, e);
                            self.connections.release(idx);
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    return;
                }
            }
        }
    }

    fn service(&mut self, idx: usize, readable: bool, writable: bool) {
        let conn = match self.connections.get_mut(idx) {
            Some(conn) => conn,
            None => return,
        };

        let mut remove = false;
        if readable {
            match conn.try_read(&mut self.handler) {
                Ok(ReadState::Drained) => {}
                Ok(ReadState::Pending) => {
                    if !self.pending_reads.contains(&idx) {
                        self.pending_reads.push(idx);
                    }
                }
                Ok(ReadState::Closed) => remove = true,
                Err(e) => {
                    warn!("Read error from {}: {}", conn.addr, e);
                    remove = true;
                }
            }
        }

        if readable || writable || remove {
            match conn.try_write() {
                Ok(true) if conn.close_after_flush => remove = true,
                Ok(_) => {}
                Err(e) => {
                    warn!("Write error to {}: {}", conn.addr, e);
                    remove = true;
                }
            }
        }

        if remove {
            self.remove(idx);
        }
    }

    fn remove(&mut self, idx: usize) {
        self.pending_reads.retain(|&pending| pending != idx);
        if let Some(mut conn) = self.connections.take(idx) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!("Closed connection from {}", conn.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::MAX_HEADER_SIZE;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream as StdTcpStream};
    use std::thread;

    fn echo(request: &HttpRequest) -> std::result::Result<HttpResponse, HandlerError> {
        if request.target == "/fail" {
            return Err("no such page".into());
        }
        if request.target == "/panic" {
            panic!("handler exploded");
        }
        Ok(HttpResponse::ok().with_body(request.body.clone()))
    }

    type Echo = fn(&HttpRequest) -> std::result::Result<HttpResponse, HandlerError>;

    fn server() -> HttpServer<Echo> {
        let config = ServerConfig::default()
            .with_bind_addr("127.0.0.1:0".parse().unwrap())
            .with_max_content_length(64)
            .with_poll_timeout(Duration::from_millis(10));
        HttpServer::bind(&config, echo as Echo).unwrap()
    }

    /// Writes `request`, then reads until the server closes the socket.
    fn exchange(mut server: HttpServer<Echo>, request: &'static [u8]) -> String {
        let addr = server.local_addr();
        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream.write_all(request).unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
            response
        });
        let stop = Instant::now() + Duration::from_secs(5);
        while !client.is_finished() && Instant::now() < stop {
            server.spin_once(Some(Duration::from_millis(10))).unwrap();
        }
        client.join().unwrap()
    }

    #[test]
    fn test_echo_and_close() {
        let response = exchange(
            server(),
            b"POST / HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert_eq!(response, "HTTP/1.1 200 \r\nContent-Length: 5\r\n\r\nhello");
    }

    #[test]
    fn test_pipelined_keep_alive() {
        let response = exchange(
            server(),
            b"POST / HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 4\r\n\r\nabcd\
              POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n:)\
              POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nnever",
        );
        assert_eq!(
            response,
            "HTTP/1.1 200 \r\nContent-Length: 4\r\n\r\nabcd\
             HTTP/1.1 200 \r\nContent-Length: 2\r\n\r\n:)"
        );
    }

    #[test]
    fn test_handler_failure_is_500() {
        let response = exchange(server(), b"POST /fail HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 500 \r\n"));
        assert!(response.contains("no such page"));

        let response = exchange(server(), b"POST /panic HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 500 \r\n"));
        assert!(response.contains("handler exploded"));
    }

    #[test]
    fn test_bad_request_gets_no_response() {
        let response = exchange(server(), b"POST / HTTP/1.1\r\nContent-Length: 65\r\n\r\n");
        assert_eq!(response, "");

        let response = exchange(server(), b"hello there\r\nHost: x\r\n\r\n");
        assert_eq!(response, "");
    }

    #[test]
    fn test_partial_request_then_eof() {
        let mut server = server();
        let addr = server.local_addr();
        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(addr).unwrap();
            stream.write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\n12").unwrap();
            stream.shutdown(Shutdown::Write).unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
            response
        });
        let stop = Instant::now() + Duration::from_secs(5);
        while !client.is_finished() && Instant::now() < stop {
            server.spin_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(client.join().unwrap(), "");
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_stop_handle() {
        let mut server = server();
        let stop = server.stop_handle();
        stop.stop();
        server.spin().unwrap();
        assert!(!server.is_listening());
    }

    fn client(addr: SocketAddr) -> StdTcpStream {
        let stream = StdTcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    #[test]
    fn test_spin_for_returns_at_deadline() {
        let mut server = server();
        let started = Instant::now();
        server.spin_for(Duration::from_millis(50)).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_close_keeps_open_connections() {
        let mut server = server();
        let addr = server.local_addr();
        let mut stream = client(addr);
        stream
            .write_all(b"POST / HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nfirst")
            .unwrap();
        server.spin_for(Duration::from_millis(500)).unwrap();
        let expected = "HTTP/1.1 200 \r\nContent-Length: 5\r\n\r\nfirst";
        let mut response = vec![0; expected.len()];
        stream.read_exact(&mut response).unwrap();
        assert_eq!(response, expected.as_bytes());

        server.close();
        assert!(!server.is_listening());
        assert_eq!(server.connection_count(), 1);
        assert!(StdTcpStream::connect(addr).is_err());

        stream
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\nsecond")
            .unwrap();
        server.spin_for(Duration::from_millis(500)).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert_eq!(response, "HTTP/1.1 200 \r\nContent-Length: 6\r\n\r\nsecond");
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_connections_beyond_limit_are_dropped() {
        let config = ServerConfig::default()
            .with_bind_addr("127.0.0.1:0".parse().unwrap())
            .with_max_connections(1)
            .with_poll_timeout(Duration::from_millis(10));
        let mut server = HttpServer::bind(&config, echo as Echo).unwrap();
        let addr = server.local_addr();

        let mut first = client(addr);
        server.spin_for(Duration::from_millis(300)).unwrap();
        assert_eq!(server.connection_count(), 1);

        let mut second = client(addr);
        server.spin_for(Duration::from_millis(300)).unwrap();
        assert_eq!(server.connection_count(), 1);
        let mut rest = Vec::new();
        assert_eq!(second.read_to_end(&mut rest).unwrap_or(0), 0);

        first
            .write_all(b"POST / HTTP/1.0\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        server.spin_for(Duration::from_millis(300)).unwrap();
        let mut response = String::new();
        first.read_to_string(&mut response).unwrap();
        assert_eq!(response, "HTTP/1.1 200 \r\nContent-Length: 2\r\n\r\nok");
    }

    #[test]
    fn test_long_pipeline_is_read_in_turns() {
        const REQUESTS: usize = 2000;

        let mut server = server();
        let addr = server.local_addr();
        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let mut writer = stream.try_clone().unwrap();
            let sender = thread::spawn(move || {
                let mut pipeline = Vec::new();
                for i in 0..REQUESTS {
                    let connection = if i + 1 == REQUESTS { "close" } else { "keep-alive" };
                    write!(
                        pipeline,
                        "POST / HTTP/1.1\r\nConnection: {}\r\nContent-Length: 64\r\n\r\n{}",
                        connection,
                        "x".repeat(64)
                    )
                    .unwrap();
                }
                writer.write_all(&pipeline).unwrap();
            });
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
            sender.join().unwrap();
            response
        });

        let mut largest_buffer = 0;
        let stop = Instant::now() + Duration::from_secs(10);
        while !client.is_finished() && Instant::now() < stop {
            server.spin_once(Some(Duration::from_millis(10))).unwrap();
            let buffered = server
                .connections
                .connections
                .iter()
                .flatten()
                .map(|conn| conn.parser.buffered())
                .max()
                .unwrap_or(0);
            largest_buffer = largest_buffer.max(buffered);
        }

        let response = client.join().unwrap();
        assert_eq!(response.matches("HTTP/1.1 200 ").count(), REQUESTS);
        assert!(largest_buffer <= MAX_HEADER_SIZE + 64 + READ_BUF_SIZE);
        assert_eq!(server.connection_count(), 0);
    }
}
