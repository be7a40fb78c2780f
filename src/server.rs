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

//! Non-blocking TCP transport core: a single-threaded, edge-triggered
//! event loop multiplexing a listening socket and its accepted
//! connections, with per-connection outbound buffering and idle-timeout
//! eviction via an activity-ordered list.

use crate::buffer::WriteBuf;
use crate::event::{Event, Poller};
use crate::list;
use arrayvec::ArrayString;
use log::{debug, error, info};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use slab::Slab;
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READ_BUFFER_SIZE: usize = 8_192;
const EPOLL_CHECK_INTERVAL_MS: u64 = 5_000;

const LISTENER_TOKEN: Token = Token(0);
const CONN_TOKEN_BASE: usize = 1;

pub struct Config {
    pub port: u16,

    /// Idle timeout in seconds. 0 disables eviction.
    pub conn_timeout: u64,
}

/// Operations a connection exposes to upper layers. Implemented by the
/// live connection handle and by test doubles.
pub trait Transport {
    /// Queue bytes for sending. Bytes that cannot be sent immediately are
    /// buffered and flushed as the socket allows. Returns false if the
    /// connection is (or just became) unusable.
    fn write(&mut self, data: &[u8]) -> bool;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn peer_ip(&self) -> &str;
}

/// Upcall interface the transport drives. `ConnData` is the per-connection
/// state owned by the layer above, created at accept time and handed back
/// when the connection record is reclaimed.
pub trait TcpHandler {
    type ConnData;

    fn on_connect(&mut self, conn: &mut dyn Transport) -> Self::ConnData;

    fn on_data(&mut self, conn: &mut dyn Transport, data: &mut Self::ConnData, buf: &[u8]);

    fn on_close(&mut self, data: Self::ConnData) {
        let _ = data;
    }
}

struct Connection<D> {
    stream: Option<TcpStream>,
    peer_ip: ArrayString<46>,
    last_activity: Instant,
    out: WriteBuf,
    want_write: bool,
    data: Option<D>,
}

impl<D> Connection<D> {
    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

enum SendOutcome {
    Done,
    Buffered,
    Error(io::Error),
}

struct Core<D> {
    poller: Poller,
    conns: Slab<list::Node<Connection<D>>>,
    active: list::List,
    closed: Vec<usize>,
}

impl<D> Core<D> {
    // direct send first; overflow goes to the outbound buffer and arms
    // writable interest
    fn write_conn(&mut self, key: usize, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        let outcome = {
            let conn = match self.conns.get_mut(key) {
                Some(node) => &mut node.value,
                None => return false,
            };

            let stream = match conn.stream.as_mut() {
                Some(stream) => stream,
                None => return false,
            };

            if conn.out.is_empty() {
                match stream.write(data) {
                    Ok(n) if n == data.len() => SendOutcome::Done,
                    Ok(n) => {
                        conn.out.append(&data[n..]);
                        SendOutcome::Buffered
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        conn.out.append(data);
                        SendOutcome::Buffered
                    }
                    Err(e) => SendOutcome::Error(e),
                }
            } else {
                conn.out.append(data);
                SendOutcome::Buffered
            }
        };

        match outcome {
            SendOutcome::Done => {
                self.refresh_activity(key);

                true
            }
            SendOutcome::Buffered => self.set_want_write(key, true),
            SendOutcome::Error(e) => {
                debug!("send failed: {:?}", e);
                self.close_conn(key);

                false
            }
        }
    }

    // drain the outbound buffer on a writable edge. one send per edge: a
    // short send means the socket filled up again and the next edge
    // resumes
    fn handle_write(&mut self, key: usize) {
        let res = {
            let conn = match self.conns.get_mut(key) {
                Some(node) => &mut node.value,
                None => return,
            };

            let stream = match conn.stream.as_mut() {
                Some(stream) => stream,
                None => return,
            };

            if conn.out.is_empty() {
                // spurious writable event
                return;
            }

            match stream.write(conn.out.pending()) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                res => res,
            }
        };

        match res {
            Ok(n) => {
                if n > 0 {
                    self.refresh_activity(key);
                    self.conns[key].value.out.consume(n);
                }

                if self.conns[key].value.out.is_empty() {
                    self.set_want_write(key, false);
                }
            }
            Err(e) => {
                debug!("send failed: {:?}", e);
                self.close_conn(key);
            }
        }
    }

    fn set_want_write(&mut self, key: usize, on: bool) -> bool {
        {
            let conn = match self.conns.get_mut(key) {
                Some(node) => &mut node.value,
                None => return false,
            };

            if conn.is_closed() {
                return false;
            }

            if conn.want_write == on {
                return true;
            }
        }

        let token = Token(key + CONN_TOKEN_BASE);

        let interests = if on {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        };

        let res = {
            let conn = &mut self.conns[key].value;

            match conn.stream.as_mut() {
                Some(stream) => self.poller.reregister(stream, token, interests),
                None => return false,
            }
        };

        match res {
            Ok(()) => {
                self.conns[key].value.want_write = on;

                true
            }
            Err(e) => {
                error!("failed to update socket interest: {:?}", e);
                self.close_conn(key);

                false
            }
        }
    }

    fn refresh_activity(&mut self, key: usize) {
        match self.conns.get_mut(key) {
            Some(node) => node.value.last_activity = Instant::now(),
            None => return,
        }

        self.active.move_to_back(&mut self.conns, key);
    }

    // close protocol: deregister, close the socket, detach from the
    // activity list, discard pending output. the slab entry stays until
    // end-of-batch reclamation so queued events cannot touch a reused
    // record. idempotent.
    fn close_conn(&mut self, key: usize) {
        let mut stream = {
            let conn = match self.conns.get_mut(key) {
                Some(node) => &mut node.value,
                None => return,
            };

            match conn.stream.take() {
                Some(stream) => stream,
                None => return,
            }
        };

        if let Err(e) = self.poller.deregister(&mut stream) {
            debug!("deregister failed: {:?}", e);
        }

        drop(stream);

        {
            let conn = &mut self.conns[key].value;

            debug!("closing connection from {}", conn.peer_ip);

            conn.out.clear();
            conn.want_write = false;
        }

        self.active.remove(&mut self.conns, key);
        self.closed.push(key);
    }
}

/// Live connection handle passed to upcalls. Valid for the duration of
/// the call.
pub struct Conn<'a, D> {
    core: &'a mut Core<D>,
    key: usize,
}

impl<D> Transport for Conn<'_, D> {
    fn write(&mut self, data: &[u8]) -> bool {
        self.core.write_conn(self.key, data)
    }

    fn close(&mut self) {
        self.core.close_conn(self.key);
    }

    fn is_closed(&self) -> bool {
        match self.core.conns.get(self.key) {
            Some(node) => node.value.is_closed(),
            None => true,
        }
    }

    fn peer_ip(&self) -> &str {
        match self.core.conns.get(self.key) {
            Some(node) => node.value.peer_ip.as_str(),
            None => "",
        }
    }
}

pub struct TcpServer<H: TcpHandler> {
    core: Core<H::ConnData>,
    listener: TcpListener,
    port: u16,
    timeout: Option<Duration>,
    handler: H,
    stop: Arc<AtomicBool>,
    batch: Vec<Event>,
}

impl<H: TcpHandler> TcpServer<H> {
    pub fn new(config: &Config, handler: H) -> Result<Self, io::Error> {
        let poller = Poller::new()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let mut listener = TcpListener::bind(addr)?;

        poller.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let timeout = if config.conn_timeout > 0 {
            Some(Duration::from_secs(config.conn_timeout))
        } else {
            None
        };

        Ok(Self {
            core: Core {
                poller,
                conns: Slab::new(),
                active: list::List::default(),
                closed: Vec::new(),
            },
            listener,
            port: config.port,
            timeout,
            handler,
            stop: Arc::new(AtomicBool::new(false)),
            batch: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.listener.local_addr()
    }

    /// Flag checked between batches. Shared so signal handlers and other
    /// threads can request a stop; the current batch always completes.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run the event loop until stopped or a listener/poller failure.
    /// Remaining connections are closed before returning.
    pub fn run(&mut self) {
        info!("server is listening on port {}", self.port);

        let poll_timeout = self
            .timeout
            .map(|_| Duration::from_millis(EPOLL_CHECK_INTERVAL_MS));

        while !self.stop.load(Ordering::SeqCst) {
            if let Err(e) = self.core.poller.poll(poll_timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                error!("poll failed: {:?}", e);
                break;
            }

            self.batch.clear();
            self.batch.extend(self.core.poller.iter_events());

            for i in 0..self.batch.len() {
                let event = self.batch[i];

                if event.token() == LISTENER_TOKEN {
                    self.handle_accept();
                    continue;
                }

                let key = usize::from(event.token()) - CONN_TOKEN_BASE;

                if !self.core.conns.contains(key) {
                    continue;
                }

                if event.is_readable() {
                    self.handle_read(key);
                }

                if event.is_writable() {
                    self.core.handle_write(key);
                }
            }

            if self.timeout.is_some() {
                self.sweep_idle();
            }

            self.gc_closed();
        }

        info!("stopping server");

        self.shutdown();
    }

    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.add_conn(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept error: {:?}", e);
                    break;
                }
            }
        }
    }

    fn add_conn(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let mut peer_ip = ArrayString::new();
        let _ = write!(&mut peer_ip, "{}", peer_addr.ip());

        let key = self.core.conns.insert(list::Node::new(Connection {
            stream: Some(stream),
            peer_ip,
            last_activity: Instant::now(),
            out: WriteBuf::new(),
            want_write: false,
            data: None,
        }));

        self.core.active.push_back(&mut self.core.conns, key);

        // the socket is registered before the connect upcall runs
        let registered = {
            let core = &mut self.core;

            let node = match core.conns.get_mut(key) {
                Some(node) => node,
                None => return,
            };

            match node.value.stream.as_mut() {
                Some(stream) => {
                    core.poller
                        .register(stream, Token(key + CONN_TOKEN_BASE), Interest::READABLE)
                }
                None => return,
            }
        };

        if let Err(e) = registered {
            error!("failed to register connection socket: {:?}", e);
            self.core.close_conn(key);
            return;
        }

        let data = {
            let mut conn = Conn {
                core: &mut self.core,
                key,
            };

            self.handler.on_connect(&mut conn)
        };

        match self.core.conns.get_mut(key) {
            Some(node) => node.value.data = Some(data),
            None => self.handler.on_close(data),
        }

        debug!("accepted connection from {}", peer_addr);
    }

    // drain the socket until it would block, upcalling per chunk
    fn handle_read(&mut self, key: usize) {
        self.core.refresh_activity(key);

        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let res = {
                let conn = match self.core.conns.get_mut(key) {
                    Some(node) => &mut node.value,
                    None => return,
                };

                let stream = match conn.stream.as_mut() {
                    Some(stream) => stream,
                    None => return,
                };

                stream.read(&mut buf)
            };

            match res {
                Ok(0) => {
                    let peer = &self.core.conns[key].value.peer_ip;
                    debug!("client {} disconnected", peer);

                    self.core.close_conn(key);
                    return;
                }
                Ok(n) => {
                    let mut data = match self
                        .core
                        .conns
                        .get_mut(key)
                        .and_then(|node| node.value.data.take())
                    {
                        Some(data) => data,
                        None => continue,
                    };

                    {
                        let mut conn = Conn {
                            core: &mut self.core,
                            key,
                        };

                        self.handler.on_data(&mut conn, &mut data, &buf[..n]);
                    }

                    match self.core.conns.get_mut(key) {
                        Some(node) => node.value.data = Some(data),
                        None => self.handler.on_close(data),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("read failed: {:?}", e);

                    self.core.close_conn(key);
                    return;
                }
            }
        }
    }

    // walk from the least recently active end, stopping at the first
    // connection still within the timeout
    fn sweep_idle(&mut self) {
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => return,
        };

        let now = Instant::now();

        while let Some(key) = self.core.active.head {
            let conn = &self.core.conns[key].value;

            if now.duration_since(conn.last_activity) < timeout {
                break;
            }

            debug!("closing inactive connection from {}", conn.peer_ip);

            self.core.close_conn(key);
        }
    }

    // reclaim records closed during this batch, handing the user data
    // back to the handler
    fn gc_closed(&mut self) {
        if self.core.closed.is_empty() {
            return;
        }

        let closed = mem::take(&mut self.core.closed);

        for key in closed {
            if !self.core.conns.contains(key) {
                continue;
            }

            let node = self.core.conns.remove(key);

            if let Some(data) = node.value.data {
                self.handler.on_close(data);
            }
        }
    }

    fn shutdown(&mut self) {
        while let Some(key) = self.core.active.head {
            self.core.close_conn(key);
        }

        self.gc_closed();
    }
}
