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

use std::cmp;

pub const INITIAL_WRITE_BUF_CAPACITY: usize = 4_096;

/// Outbound byte buffer for a connection. Bytes are appended at the end
/// and drained from the front via a sent cursor, so that
/// sent <= len <= capacity at all times. Once fully drained, both cursors
/// reset to zero and the storage is reused.
pub struct WriteBuf {
    buf: Vec<u8>,
    sent: usize,
}

impl WriteBuf {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            sent: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Unsent portion, from the sent cursor to the end.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.sent..]
    }

    /// Append bytes, growing capacity by doubling from the initial size
    /// when needed.
    pub fn append(&mut self, data: &[u8]) {
        let needed = self.buf.len() + data.len();

        if needed > self.buf.capacity() {
            let mut new_cap = if self.buf.capacity() > 0 {
                self.buf.capacity() * 2
            } else {
                INITIAL_WRITE_BUF_CAPACITY
            };

            new_cap = cmp::max(new_cap, needed);

            self.buf.reserve_exact(new_cap - self.buf.len());
        }

        self.buf.extend_from_slice(data);
    }

    /// Advance the sent cursor after a successful send. Resets the buffer
    /// when everything has been sent.
    pub fn consume(&mut self, amount: usize) {
        assert!(self.sent + amount <= self.buf.len());

        self.sent += amount;

        if self.sent == self.buf.len() {
            self.buf.clear();
            self.sent = 0;
        }
    }

    /// Discard all content, keeping nothing pending. Used when a
    /// connection is closed with unsent bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.sent = 0;
    }
}

impl Default for WriteBuf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_consume() {
        let mut b = WriteBuf::new();
        assert_eq!(b.is_empty(), true);
        assert_eq!(b.pending(), b"");

        b.append(b"hello");
        assert_eq!(b.is_empty(), false);
        assert_eq!(b.len(), 5);
        assert_eq!(b.pending(), b"hello");

        b.consume(2);
        assert_eq!(b.pending(), b"llo");
        assert_eq!(b.sent(), 2);

        b.append(b" world");
        assert_eq!(b.pending(), b"llo world");

        b.consume(9);
        assert_eq!(b.is_empty(), true);
        assert_eq!(b.sent(), 0);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn test_growth() {
        let mut b = WriteBuf::new();

        b.append(b"x");
        assert_eq!(b.capacity(), INITIAL_WRITE_BUF_CAPACITY);

        b.append(&[0; INITIAL_WRITE_BUF_CAPACITY]);
        assert_eq!(b.capacity(), INITIAL_WRITE_BUF_CAPACITY * 2);

        // oversized appends jump straight to the needed size
        let mut b = WriteBuf::new();
        b.append(&[0; 3 * INITIAL_WRITE_BUF_CAPACITY]);
        assert_eq!(b.capacity(), 3 * INITIAL_WRITE_BUF_CAPACITY);
        assert_eq!(b.len(), 3 * INITIAL_WRITE_BUF_CAPACITY);
    }

    #[test]
    fn test_cursor_invariant() {
        let mut b = WriteBuf::new();

        b.append(b"abcdef");

        for step in [1, 2, 3] {
            b.consume(step);
            assert!(b.sent() <= b.len());
            assert!(b.len() <= b.capacity());
        }

        assert_eq!(b.is_empty(), true);
    }

    #[test]
    fn test_clear() {
        let mut b = WriteBuf::new();

        b.append(b"abc");
        b.consume(1);
        b.clear();

        assert_eq!(b.is_empty(), true);
        assert_eq!(b.sent(), 0);
        assert_eq!(b.pending(), b"");
    }
}
