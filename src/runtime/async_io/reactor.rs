//! Reactor for managing registered I/O sources
//!
//! The reactor tracks:
//! - Registered file descriptors and their tokens
//! - What kind of source each token stands for (listener or connection)
//! - The readiness multiplexer the descriptors are registered with

use super::{next_token, Event, EventLoop, Interest, Token};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// What a registered descriptor is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A listening socket; readiness means pending accepts
    Listener,
    /// A stream socket; readiness means bytes to read or room to write
    Connection,
}

#[derive(Debug, Clone)]
struct Registration {
    fd: i32,
    interest: Interest,
    source: Source,
}

/// Owns the multiplexer and the token table for every live registration
pub struct Reactor {
    poller: EventLoop,
    registrations: HashMap<Token, Registration>,
}

impl Reactor {
    /// Create a reactor reporting up to `max_events` events per poll
    pub fn new(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poller: EventLoop::new(max_events)?,
            registrations: HashMap::new(),
        })
    }

    /// Register `fd` and return the token its events will carry
    pub fn register(&mut self, fd: i32, source: Source, interest: Interest) -> io::Result<Token> {
        let token = next_token();
        self.poller.register(fd, token, interest)?;
        self.registrations.insert(
            token,
            Registration {
                fd,
                interest,
                source,
            },
        );
        Ok(token)
    }

    /// Remove a registration; unknown tokens are ignored
    pub fn deregister(&mut self, token: Token) -> io::Result<()> {
        match self.registrations.remove(&token) {
            Some(registration) => self.poller.deregister(registration.fd),
            None => Ok(()),
        }
    }

    /// Wait for readiness, appending events for live registrations only
    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<usize> {
        let start = events.len();
        self.poller.poll(events, timeout)?;
        let registrations = &self.registrations;
        let mut index = start;
        events.retain(|event| {
            let keep = index < start || registrations.contains_key(&event.token);
            index += 1;
            keep
        });
        Ok(events.len() - start)
    }

    pub fn source(&self, token: Token) -> Option<Source> {
        self.registrations.get(&token).map(|r| r.source)
    }

    pub fn get_fd(&self, token: Token) -> Option<i32> {
        self.registrations.get(&token).map(|r| r.fd)
    }

    pub fn get_interest(&self, token: Token) -> Option<Interest> {
        self.registrations.get(&token).map(|r| r.interest)
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
