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

//! Maps requests to filesystem resources under a web root: static files
//! with MIME inference, optional directory listings, and HTML error
//! pages.

use crate::http::Handler;
use crate::request::{Method, Request};
use crate::server::Transport;
use log::{error, warn};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const FILE_CHUNK_SIZE: usize = 4_096;

pub struct Router {
    root: PathBuf,
    browse_enabled: bool,
}

impl Router {
    /// Resolve the web root up front. Startup fails if it does not exist.
    pub fn new<P: AsRef<Path>>(root: P, browse_enabled: bool) -> Result<Self, io::Error> {
        Ok(Self {
            root: fs::canonicalize(root)?,
            browse_enabled,
        })
    }

    fn handle_file(&self, conn: &mut dyn Transport, path: &Path) {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return self.send_error(conn, 403, "Forbidden"),
        };

        let meta = match file.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                error!("could not read file metadata for {:?}: {:?}", path, e);
                return self.send_error(conn, 500, "Internal Server Error");
            }
        };

        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            mime,
            meta.len()
        );

        if !conn.write(header.as_bytes()) {
            return;
        }

        let mut buf = [0u8; FILE_CHUNK_SIZE];

        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if !conn.write(&buf[..n]) {
                        warn!("failed to send file chunk");
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to read {:?}: {:?}", path, e);
                    break;
                }
            }
        }
    }

    // listing when browsing is enabled, otherwise fall back to an
    // index.html inside the directory
    fn handle_dir(&self, conn: &mut dyn Transport, path: &Path, uri: &str) {
        if !self.browse_enabled {
            let index = path.join("index.html");

            match fs::metadata(&index) {
                Ok(meta) if meta.is_file() => return self.handle_file(conn, &index),
                _ => return self.send_error(conn, 403, "Forbidden"),
            }
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                error!("could not open requested dir {:?}: {:?}", path, e);
                return self.send_error(conn, 500, "Internal Server Error");
            }
        };

        let mut body = format!(
            "<html><head><title>Index of {uri}</title></head>\
             <body><h1>Index of {uri}</h1><hr><ul>"
        );

        if uri != "/" {
            body.push_str("<li><a href=\"..\">..</a></li>");
        }

        for entry in entries.flatten() {
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(_) => continue,
            };

            let name = entry.file_name();
            let name = name.to_string_lossy();
            let suffix = if is_dir { "/" } else { "" };

            let _ = write!(
                body,
                "<li><a href=\"{name}{suffix}\">{name}{suffix}</a></li>"
            );
        }

        body.push_str("</ul><hr></body></html>");

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );

        if conn.write(header.as_bytes()) {
            conn.write(body.as_bytes());
        }
    }

    fn send_error(&self, conn: &mut dyn Transport, code: u16, message: &str) {
        let body = format!(
            "<html><head><title>{code} {message}</title></head>\
             <body><h1>{code} {message}</h1></body></html>"
        );

        let response = format!(
            "HTTP/1.1 {code} {message}\r\nContent-Type: text/html\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        if conn.write(response.as_bytes()) {
            conn.close();
        }
    }
}

impl Handler for Router {
    fn on_request(&mut self, conn: &mut dyn Transport, req: &Request<'_>) {
        if req.method() != Method::Get {
            return self.send_error(conn, 405, "Method Not Allowed");
        }

        let uri = req.uri();

        // reject traversal attempts like /../../etc/passwd outright
        if uri.contains("..") {
            return self.send_error(conn, 400, "Bad Request");
        }

        let requested = self.root.join(&uri[1..]);

        // resolve symbolic links and get the canonical path
        let resolved = match fs::canonicalize(&requested) {
            Ok(path) => path,
            Err(_) => return self.send_error(conn, 404, "Not Found"),
        };

        // the canonical path must stay within the web root
        if !resolved.starts_with(&self.root) {
            return self.send_error(conn, 403, "Forbidden");
        }

        let meta = match fs::metadata(&resolved) {
            Ok(meta) => meta,
            Err(_) => return self.send_error(conn, 404, "Not Found"),
        };

        if meta.is_dir() {
            self.handle_dir(conn, &resolved, uri);
        } else if meta.is_file() {
            self.handle_file(conn, &resolved);
        } else {
            // not a regular file or directory, e.g. a socket
            self.send_error(conn, 403, "Forbidden");
        }
    }

    fn on_bad_request(&mut self, conn: &mut dyn Transport) {
        self.send_error(conn, 400, "Bad Request");
    }

    fn on_server_error(&mut self, conn: &mut dyn Transport) {
        self.send_error(conn, 500, "Internal Server Error");
    }
}
