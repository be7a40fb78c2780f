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

//! HTTP/1.1 request head parsing. The parser does not modify or copy the
//! input: all fields are byte spans into the header region, so parsing
//! the same bytes twice yields the same result.

use std::fmt;
use std::fs::File;
use std::str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
}

impl Method {
    fn from_bytes(s: &[u8]) -> Option<Self> {
        match s {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"HEAD" => Some(Self::Head),
            b"OPTIONS" => Some(Self::Options),
            b"PATCH" => Some(Self::Patch),
            b"TRACE" => Some(Self::Trace),
            b"CONNECT" => Some(Self::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed request. Parse failures are never fatal for the server; the
/// connection gets a 400 and is closed.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bad request")
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn of<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }
}

/// Parsed request line and headers. Spans reference the header region the
/// head was parsed from; pair with that buffer to read the fields.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    uri: Span,
    version: Span,
    headers: Vec<(Span, Span)>,
}

impl RequestHead {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri<'a>(&self, buf: &'a [u8]) -> &'a str {
        // the URI was validated as ASCII during parsing
        str::from_utf8(self.uri.of(buf)).unwrap_or_default()
    }

    pub fn version<'a>(&self, buf: &'a [u8]) -> &'a str {
        str::from_utf8(self.version.of(buf)).unwrap_or_default()
    }

    pub fn headers<'a>(&'a self, buf: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.headers
            .iter()
            .map(move |(name, value)| (name.of(buf), value.of(buf)))
    }

    /// Case-insensitive lookup; first match wins.
    pub fn header<'a>(&'a self, buf: &'a [u8], name: &str) -> Option<&'a [u8]> {
        for (hname, hvalue) in self.headers(buf) {
            if hname.eq_ignore_ascii_case(name.as_bytes()) {
                return Some(hvalue);
            }
        }

        None
    }
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

fn trim(buf: &[u8], mut span: Span) -> Span {
    while span.start < span.end && buf[span.start].is_ascii_whitespace() {
        span.start += 1;
    }

    while span.end > span.start && buf[span.end - 1].is_ascii_whitespace() {
        span.end -= 1;
    }

    span
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

// permissive on purpose: the reserved set includes ( ) * ' alongside the
// usual sub-delims
fn validate_uri(uri: &[u8]) -> Result<(), ParseError> {
    if uri.first() != Some(&b'/') {
        return Err(ParseError);
    }

    let mut i = 0;

    while i < uri.len() {
        let b = uri[i];

        if is_unreserved(b) {
            i += 1;
            continue;
        }

        if b == b'%' {
            if i + 2 < uri.len()
                && uri[i + 1].is_ascii_hexdigit()
                && uri[i + 2].is_ascii_hexdigit()
            {
                i += 3;
                continue;
            }

            return Err(ParseError);
        }

        match b {
            b'/' | b':' | b'@' | b'!' | b'$' | b'&' | b'+' | b',' | b';' | b'=' | b'(' | b')'
            | b'*' | b'\'' => i += 1,
            _ => return Err(ParseError),
        }
    }

    Ok(())
}

/// Parse a complete header region (through its terminating CRLFCRLF) into
/// a request head.
pub fn parse(buf: &[u8]) -> Result<RequestHead, ParseError> {
    let line_end = find(buf, b"\r\n").ok_or(ParseError)?;
    let line = &buf[..line_end];

    let sp1 = line.iter().position(|&b| b == b' ').ok_or(ParseError)?;

    let sp2 = line[sp1 + 1..]
        .iter()
        .position(|&b| b == b' ')
        .map(|pos| sp1 + 1 + pos)
        .ok_or(ParseError)?;

    let method = Method::from_bytes(&line[..sp1]).ok_or(ParseError)?;

    let uri = Span {
        start: sp1 + 1,
        end: sp2,
    };

    let version = Span {
        start: sp2 + 1,
        end: line_end,
    };

    validate_uri(uri.of(buf))?;

    if version.of(buf) != b"HTTP/1.1" {
        return Err(ParseError);
    }

    let mut headers = Vec::new();
    let mut pos = line_end + 2;

    while let Some(rel) = find(&buf[pos..], b"\r\n") {
        let end = pos + rel;

        if end == pos {
            // empty line terminates the header list
            break;
        }

        let colon = buf[pos..end]
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError)?;

        let name = trim(
            buf,
            Span {
                start: pos,
                end: pos + colon,
            },
        );

        let value = trim(
            buf,
            Span {
                start: pos + colon + 1,
                end,
            },
        );

        headers.push((name, value));

        pos = end + 2;
    }

    let head = RequestHead {
        method,
        uri,
        version,
        headers,
    };

    if head.header(buf, "Host").is_none() {
        return Err(ParseError);
    }

    Ok(head)
}

/// Body of a dispatched request, exposed in readable form.
pub enum Body<'a> {
    None,
    Memory(&'a [u8]),
    File(&'a File),
}

/// Borrowed view of a fully received request, valid for the duration of
/// the dispatch upcall.
pub struct Request<'a> {
    head: &'a RequestHead,
    hbuf: &'a [u8],
    body: Body<'a>,
}

impl<'a> Request<'a> {
    pub fn new(head: &'a RequestHead, hbuf: &'a [u8], body: Body<'a>) -> Self {
        Self { head, hbuf, body }
    }

    pub fn method(&self) -> Method {
        self.head.method()
    }

    pub fn uri(&self) -> &'a str {
        self.head.uri(self.hbuf)
    }

    pub fn version(&self) -> &'a str {
        self.head.version(self.hbuf)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.head.headers(self.hbuf)
    }

    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.head.header(self.hbuf, name)
    }

    pub fn body(&self) -> &Body<'a> {
        &self.body
    }
}
