/*
 * Copyright (C) 2025 the staticd developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! HTTP/1.1 connection layer on top of the TCP transport: per-connection
//! framing state machine, body storage, and the request dispatch surface.

use crate::request::{self, Body, Request, RequestHead};
use crate::server::{Config, TcpHandler, TcpServer, Transport};
use log::{debug, error};
use std::cmp;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::str;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const HEADERS_BUFF_SIZE: usize = 8_192;
pub const BODY_IN_FILE_THRESHOLD: usize = 1024 * 1024;

const BAD_REQUEST_RESP: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";
const HEADERS_TOO_LARGE_RESP: &[u8] =
    b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\n\r\n";
const SERVER_ERROR_RESP: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\nConnection: close\r\n\r\n";
const NOT_IMPLEMENTED_RESP: &[u8] = b"HTTP/1.1 501 Not Implemented\r\nContent-Length: 0\r\n\r\n";

/// Request dispatch surface. Every method has a canonical minimal default,
/// so an implementation only overrides what it serves.
///
/// The connection is closed by the framing layer after `on_bad_request`
/// and `on_server_error` return. `on_request` implementations may write
/// any number of times and may close the connection themselves.
pub trait Handler {
    fn on_request(&mut self, conn: &mut dyn Transport, req: &Request<'_>) {
        let _ = req;

        conn.write(NOT_IMPLEMENTED_RESP);
    }

    fn on_bad_request(&mut self, conn: &mut dyn Transport) {
        conn.write(BAD_REQUEST_RESP);
    }

    fn on_server_error(&mut self, conn: &mut dyn Transport) {
        conn.write(SERVER_ERROR_RESP);
    }
}

/// Storage for a request body: heap for small payloads, an anonymous
/// temporary file above the threshold. The file is deleted when the store
/// is dropped.
enum BodyStore {
    None,
    Memory(Vec<u8>),
    File(File),
}

impl BodyStore {
    fn init(expected: usize) -> Result<Self, io::Error> {
        if expected > BODY_IN_FILE_THRESHOLD {
            Ok(Self::File(tempfile::tempfile()?))
        } else {
            Ok(Self::Memory(Vec::with_capacity(expected)))
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        match self {
            Self::None => Ok(()),
            Self::Memory(buf) => {
                buf.extend_from_slice(data);

                Ok(())
            }
            Self::File(file) => file.write_all(data),
        }
    }

    // rewind so the dispatch handler reads from the start
    fn finalize(&mut self) -> Result<(), io::Error> {
        if let Self::File(file) = self {
            file.seek(SeekFrom::Start(0))?;
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ConnState {
    ReadingHeaders,
    ReadingBody,
}

/// Per-connection HTTP state. Lives as the transport's user data and is
/// fed each chunk of bytes read from the socket.
pub struct HttpConn {
    state: ConnState,
    headers_buf: Box<[u8]>,
    headers_buf_len: usize,
    headers_len: usize,
    body: BodyStore,
    body_expected: usize,
    body_received: usize,
    head: Option<RequestHead>,
}

fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn bad_request<H: Handler>(conn: &mut dyn Transport, handler: &mut H) {
    handler.on_bad_request(conn);
    conn.close();
}

fn server_error<H: Handler>(conn: &mut dyn Transport, handler: &mut H) {
    handler.on_server_error(conn);
    conn.close();
}

impl HttpConn {
    pub fn new() -> Self {
        Self {
            state: ConnState::ReadingHeaders,
            headers_buf: vec![0; HEADERS_BUFF_SIZE].into_boxed_slice(),
            headers_buf_len: 0,
            headers_len: 0,
            body: BodyStore::None,
            body_expected: 0,
            body_received: 0,
            head: None,
        }
    }

    /// Consume a chunk of bytes from the transport, advancing the framing
    /// state machine and dispatching any completed requests.
    pub fn handle_data<H: Handler>(
        &mut self,
        conn: &mut dyn Transport,
        handler: &mut H,
        buf: &[u8],
    ) {
        let mut input = buf;

        while !input.is_empty() {
            if conn.is_closed() {
                return;
            }

            match self.state {
                ConnState::ReadingHeaders => {
                    // one byte of capacity stays reserved as a guard, so
                    // the largest accepted header block is one less than
                    // the buffer size
                    let space = HEADERS_BUFF_SIZE - 1 - self.headers_buf_len;
                    let n = cmp::min(space, input.len());

                    self.headers_buf[self.headers_buf_len..self.headers_buf_len + n]
                        .copy_from_slice(&input[..n]);
                    self.headers_buf_len += n;
                    input = &input[n..];

                    if !self.try_parse(conn, handler) {
                        return;
                    }
                }
                ConnState::ReadingBody => {
                    let remaining = self.body_expected - self.body_received;
                    let n = cmp::min(remaining, input.len());

                    if let Err(e) = self.body.write(&input[..n]) {
                        error!("failed to write body chunk: {:?}", e);
                        server_error(conn, handler);
                        return;
                    }

                    self.body_received += n;
                    input = &input[n..];

                    if !self.check_body_complete(conn, handler) {
                        return;
                    }
                }
            }
        }
    }

    // look for the end of the header block and move on to body reading or
    // dispatch. returns false when processing on this connection must stop
    fn try_parse<H: Handler>(&mut self, conn: &mut dyn Transport, handler: &mut H) -> bool {
        let region_end = match find_crlfcrlf(&self.headers_buf[..self.headers_buf_len]) {
            Some(pos) => pos + 4,
            None => {
                if self.headers_buf_len == HEADERS_BUFF_SIZE - 1 {
                    if conn.write(HEADERS_TOO_LARGE_RESP) {
                        conn.close();
                    }

                    return false;
                }

                // wait for more bytes
                return true;
            }
        };

        self.headers_len = region_end;

        let head = match request::parse(&self.headers_buf[..region_end]) {
            Ok(head) => head,
            Err(_) => {
                bad_request(conn, handler);
                return false;
            }
        };

        let mut expected = 0;

        if let Some(value) = head.header(&self.headers_buf[..region_end], "Content-Length") {
            match str::from_utf8(value).ok().and_then(|s| s.parse::<usize>().ok()) {
                Some(n) => expected = n,
                None => {
                    bad_request(conn, handler);
                    return false;
                }
            }
        }

        self.head = Some(head);
        self.body_expected = expected;

        // a zero-length body takes the no-body path
        if expected == 0 {
            return self.dispatch(conn, handler);
        }

        if !self.init_body(conn, handler) {
            return false;
        }

        self.state = ConnState::ReadingBody;

        self.check_body_complete(conn, handler)
    }

    // set up the body store and move any body bytes that arrived with the
    // headers into it
    fn init_body<H: Handler>(&mut self, conn: &mut dyn Transport, handler: &mut H) -> bool {
        self.body = match BodyStore::init(self.body_expected) {
            Ok(store) => store,
            Err(e) => {
                error!("failed to initialize body storage: {:?}", e);
                server_error(conn, handler);
                return false;
            }
        };

        let avail = self.headers_buf_len - self.headers_len;

        if avail > 0 {
            let n = cmp::min(avail, self.body_expected);
            let start = self.headers_len;

            if let Err(e) = self.body.write(&self.headers_buf[start..start + n]) {
                error!("failed to write body chunk: {:?}", e);
                server_error(conn, handler);
                return false;
            }

            self.body_received = n;
        }

        true
    }

    fn check_body_complete<H: Handler>(
        &mut self,
        conn: &mut dyn Transport,
        handler: &mut H,
    ) -> bool {
        if self.body_received < self.body_expected {
            return true;
        }

        if let Err(e) = self.body.finalize() {
            error!("failed to finalize body storage: {:?}", e);
            server_error(conn, handler);
            return false;
        }

        self.dispatch(conn, handler)
    }

    fn dispatch<H: Handler>(&mut self, conn: &mut dyn Transport, handler: &mut H) -> bool {
        debug!("request received from {}", conn.peer_ip());

        let close_requested = {
            let head = match self.head.as_ref() {
                Some(head) => head,
                None => return false,
            };

            let hbuf = &self.headers_buf[..self.headers_len];

            let body = match &self.body {
                BodyStore::None => Body::None,
                BodyStore::Memory(data) => Body::Memory(data),
                BodyStore::File(file) => Body::File(file),
            };

            let req = Request::new(head, hbuf, body);

            handler.on_request(conn, &req);

            req.header("Connection")
                .map_or(false, |v| v.eq_ignore_ascii_case(b"close"))
        };

        // the handler may have closed the connection; stop right away
        if conn.is_closed() {
            return false;
        }

        if close_requested {
            conn.close();
            return false;
        }

        // pipelining: shift whatever followed this request down to the
        // front and go around again
        let consumed = self.headers_len + self.body_expected;
        let tail = self.headers_buf_len.saturating_sub(consumed);

        if tail > 0 {
            self.headers_buf.copy_within(consumed..consumed + tail, 0);
        }

        self.reset();
        self.headers_buf_len = tail;

        if tail > 0 {
            return self.try_parse(conn, handler);
        }

        true
    }

    fn reset(&mut self) {
        self.state = ConnState::ReadingHeaders;
        self.headers_buf_len = 0;
        self.headers_len = 0;
        self.body = BodyStore::None;
        self.body_expected = 0;
        self.body_received = 0;
        self.head = None;
    }
}

impl Default for HttpConn {
    fn default() -> Self {
        Self::new()
    }
}

struct HttpAdapter<H> {
    handler: H,
}

impl<H: Handler> TcpHandler for HttpAdapter<H> {
    type ConnData = HttpConn;

    fn on_connect(&mut self, _conn: &mut dyn Transport) -> HttpConn {
        HttpConn::new()
    }

    fn on_data(&mut self, conn: &mut dyn Transport, data: &mut HttpConn, buf: &[u8]) {
        data.handle_data(conn, &mut self.handler, buf);
    }
}

/// HTTP server: the TCP transport with the HTTP connection layer mounted
/// as its handler.
pub struct HttpServer<H: Handler> {
    inner: TcpServer<HttpAdapter<H>>,
}

impl<H: Handler> HttpServer<H> {
    pub fn new(config: &Config, handler: H) -> Result<Self, io::Error> {
        Ok(Self {
            inner: TcpServer::new(config, HttpAdapter { handler })?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.inner.stop_handle()
    }

    pub fn stop(&self) {
        self.inner.stop()
    }

    pub fn run(&mut self) {
        self.inner.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use std::io::Read;
    use std::net::TcpStream as StdTcpStream;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    const OK_RESP: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

    struct FakeConn {
        sent: Vec<u8>,
        closed: bool,
    }

    impl FakeConn {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    impl Transport for FakeConn {
        fn write(&mut self, data: &[u8]) -> bool {
            if self.closed {
                return false;
            }

            self.sent.extend_from_slice(data);

            true
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn peer_ip(&self) -> &str {
            "127.0.0.1"
        }
    }

    struct OkHandler;

    impl Handler for OkHandler {
        fn on_request(&mut self, conn: &mut dyn Transport, _req: &Request<'_>) {
            conn.write(OK_RESP);
        }
    }

    struct DefaultHandler;

    impl Handler for DefaultHandler {}

    struct ClosingHandler;

    impl Handler for ClosingHandler {
        fn on_request(&mut self, conn: &mut dyn Transport, _req: &Request<'_>) {
            conn.write(OK_RESP);
            conn.close();
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        methods: Vec<Method>,
        uris: Vec<String>,
        bodies: Vec<Vec<u8>>,
        body_in_file: Vec<bool>,
        file_positions: Vec<u64>,
    }

    impl Handler for RecordingHandler {
        fn on_request(&mut self, conn: &mut dyn Transport, req: &Request<'_>) {
            self.methods.push(req.method());
            self.uris.push(req.uri().to_string());

            match req.body() {
                Body::None => {
                    self.bodies.push(Vec::new());
                    self.body_in_file.push(false);
                }
                Body::Memory(data) => {
                    self.bodies.push(data.to_vec());
                    self.body_in_file.push(false);
                }
                Body::File(file) => {
                    let mut file = *file;

                    self.file_positions.push(file.stream_position().unwrap());

                    let mut data = Vec::new();
                    file.read_to_end(&mut data).unwrap();

                    self.bodies.push(data);
                    self.body_in_file.push(true);
                }
            }

            conn.write(OK_RESP);
        }
    }

    #[test]
    fn test_single_request_keepalive() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        hc.handle_data(&mut conn, &mut handler, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(conn.sent, OK_RESP);
        assert_eq!(conn.closed, false);

        // state returned to its initial shape
        assert_eq!(hc.state, ConnState::ReadingHeaders);
        assert_eq!(hc.headers_buf_len, 0);
        assert_eq!(hc.headers_len, 0);
        assert_eq!(hc.body_expected, 0);
        assert_eq!(hc.body_received, 0);
    }

    #[test]
    fn test_pipelined_pair() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        );

        assert_eq!(handler.uris, vec!["/a", "/b"]);

        let mut expected = Vec::new();
        expected.extend_from_slice(OK_RESP);
        expected.extend_from_slice(OK_RESP);
        assert_eq!(conn.sent, expected);

        assert_eq!(conn.closed, false);
        assert_eq!(hc.state, ConnState::ReadingHeaders);
    }

    #[test]
    fn test_oversize_headers() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        let mut data = Vec::new();

        while data.len() < 9_000 {
            data.extend_from_slice(b"X-Pad: aaaaaaaa\r\n");
        }

        hc.handle_data(&mut conn, &mut handler, &data);

        assert_eq!(conn.sent, HEADERS_TOO_LARGE_RESP);
        assert_eq!(conn.closed, true);
    }

    #[test]
    fn test_oversize_headers_exact_fill() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        // exactly fills the usable capacity with no terminator
        let data = vec![b'a'; HEADERS_BUFF_SIZE - 1];

        hc.handle_data(&mut conn, &mut handler, &data);

        assert_eq!(conn.sent, HEADERS_TOO_LARGE_RESP);
        assert_eq!(conn.closed, true);
    }

    #[test]
    fn test_body_in_memory() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
        );

        assert_eq!(handler.methods, vec![Method::Post]);
        assert_eq!(handler.bodies, vec![b"hello".to_vec()]);
        assert_eq!(handler.body_in_file, vec![false]);
        assert_eq!(conn.sent, OK_RESP);
        assert_eq!(conn.closed, false);
    }

    #[test]
    fn test_body_split_across_chunks() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhel",
        );

        assert!(handler.bodies.is_empty());
        assert_eq!(hc.state, ConnState::ReadingBody);

        hc.handle_data(&mut conn, &mut handler, b"lo wo");
        assert!(handler.bodies.is_empty());

        hc.handle_data(&mut conn, &mut handler, b"rld");

        assert_eq!(handler.bodies, vec![b"hello world".to_vec()]);
        assert_eq!(hc.state, ConnState::ReadingHeaders);
        assert_eq!(conn.sent, OK_RESP);
    }

    #[test]
    fn test_body_in_file() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        let payload = vec![b'z'; 2 * 1024 * 1024];

        let mut data = format!(
            "POST /big HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        data.extend_from_slice(&payload);

        // feed the way the transport would, in read-buffer-sized chunks
        for chunk in data.chunks(8_192) {
            hc.handle_data(&mut conn, &mut handler, chunk);
        }

        assert_eq!(handler.body_in_file, vec![true]);
        assert_eq!(handler.file_positions, vec![0]);
        assert_eq!(handler.bodies[0], payload);
        assert_eq!(conn.sent, OK_RESP);
        assert_eq!(conn.closed, false);
    }

    #[test]
    fn test_body_then_pipelined_request() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        );

        assert_eq!(handler.uris, vec!["/a", "/b"]);
        assert_eq!(handler.bodies, vec![b"abc".to_vec(), Vec::new()]);

        let mut expected = Vec::new();
        expected.extend_from_slice(OK_RESP);
        expected.extend_from_slice(OK_RESP);
        assert_eq!(conn.sent, expected);
    }

    #[test]
    fn test_malformed_request_line() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        hc.handle_data(&mut conn, &mut handler, b"GET HTTP/1.1\r\nHost:x\r\n\r\n");

        assert_eq!(conn.sent, BAD_REQUEST_RESP);
        assert_eq!(conn.closed, true);
    }

    #[test]
    fn test_missing_host() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        hc.handle_data(&mut conn, &mut handler, b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(conn.sent, BAD_REQUEST_RESP);
        assert_eq!(conn.closed, true);
    }

    #[test]
    fn test_bad_content_length() {
        for value in ["12x", "-5", ""] {
            let mut hc = HttpConn::new();
            let mut conn = FakeConn::new();
            let mut handler = OkHandler;

            let data = format!("POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n", value);

            hc.handle_data(&mut conn, &mut handler, data.as_bytes());

            assert_eq!(conn.sent, BAD_REQUEST_RESP, "value {:?}", value);
            assert_eq!(conn.closed, true);
        }
    }

    #[test]
    fn test_zero_content_length() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = RecordingHandler::default();

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        );

        assert_eq!(handler.bodies, vec![Vec::new()]);
        assert_eq!(handler.body_in_file, vec![false]);
        assert_eq!(conn.sent, OK_RESP);
        assert_eq!(conn.closed, false);
    }

    #[test]
    fn test_connection_close() {
        for value in ["close", "CLOSE", "Close"] {
            let mut hc = HttpConn::new();
            let mut conn = FakeConn::new();
            let mut handler = OkHandler;

            let data = format!("GET / HTTP/1.1\r\nHost: x\r\nConnection: {}\r\n\r\n", value);

            hc.handle_data(&mut conn, &mut handler, data.as_bytes());

            assert_eq!(conn.sent, OK_RESP);
            assert_eq!(conn.closed, true);
        }

        // keep-alive stays open
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = OkHandler;

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n",
        );

        assert_eq!(conn.closed, false);
    }

    #[test]
    fn test_handler_closes_stops_pipeline() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = ClosingHandler;

        hc.handle_data(
            &mut conn,
            &mut handler,
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        );

        // only the first request was served
        assert_eq!(conn.sent, OK_RESP);
        assert_eq!(conn.closed, true);
    }

    #[test]
    fn test_default_not_implemented() {
        let mut hc = HttpConn::new();
        let mut conn = FakeConn::new();
        let mut handler = DefaultHandler;

        hc.handle_data(&mut conn, &mut handler, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(conn.sent, NOT_IMPLEMENTED_RESP);
        assert_eq!(conn.closed, false);
    }

    #[test]
    fn test_body_store_selection() {
        match BodyStore::init(BODY_IN_FILE_THRESHOLD).unwrap() {
            BodyStore::Memory(_) => {}
            _ => panic!("expected memory store at the threshold"),
        }

        match BodyStore::init(BODY_IN_FILE_THRESHOLD + 1).unwrap() {
            BodyStore::File(_) => {}
            _ => panic!("expected file store above the threshold"),
        }
    }

    #[test]
    fn test_server_end_to_end() {
        let config = Config {
            port: 0,
            conn_timeout: 0,
        };

        let mut server = HttpServer::new(&config, OkHandler).unwrap();
        let port = server.local_addr().unwrap().port();
        let stop = server.stop_handle();

        let thread = thread::spawn(move || server.run());

        let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();

        let mut buf = vec![0; OK_RESP.len()];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, OK_RESP);

        // pipelined pair in one segment
        client
            .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();

        let mut buf = vec![0; OK_RESP.len() * 2];
        client.read_exact(&mut buf).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(OK_RESP);
        expected.extend_from_slice(OK_RESP);
        assert_eq!(buf, expected);

        // close is honored after the response
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, OK_RESP);

        stop.store(true, Ordering::SeqCst);
        drop(StdTcpStream::connect(("127.0.0.1", port)).unwrap());

        thread.join().unwrap();
    }
}
