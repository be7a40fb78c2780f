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

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

const EVENTS_MAX: usize = 1_024;

/// A readiness notification for a registered source. Readiness is
/// edge-triggered: it fires on the transition from not-ready to ready,
/// and consumers must drain the source until it would block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: Token,
    readiness: Interest,
}

impl Event {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readiness.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.readiness.is_writable()
    }
}

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> Result<Self, io::Error> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_MAX),
        })
    }

    pub fn register<S>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interests)
    }

    pub fn reregister<S>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interests)
    }

    pub fn deregister<S>(&self, source: &mut S) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Wait for readiness. May return with no events on timeout, and may
    /// fail with Interrupted on signal delivery; the caller retries.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        self.poll.poll(&mut self.events, timeout)
    }

    pub fn iter_events(&self) -> EventsIterator<'_> {
        EventsIterator {
            events: self.events.iter(),
        }
    }
}

pub struct EventsIterator<'a> {
    events: mio::event::Iter<'a>,
}

impl Iterator for EventsIterator<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        for event in self.events.by_ref() {
            let readiness = match (event.is_readable(), event.is_writable()) {
                (true, true) => Interest::READABLE.add(Interest::WRITABLE),
                (true, false) => Interest::READABLE,
                (false, true) => Interest::WRITABLE,
                (false, false) => continue,
            };

            return Some(Event {
                token: event.token(),
                readiness,
            });
        }

        None
    }
}
