use std::collections::{HashMap, HashSet};

use crate::backend::Fd;
use crate::trace::{EventId, StrId};
use crate::{Error, Result};

/// A descriptor opened during replay, keyed by the event that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualFd {
    pub fd: Fd,
    pub path: StrId,
}

/// Maps opening events to the descriptors the replay backend handed out.
#[derive(Debug, Default)]
pub struct VirtualFds {
    open: HashMap<EventId, VirtualFd>,
    failed: HashSet<EventId>,
}

impl VirtualFds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: EventId, fd: Fd, path: StrId) -> Result<()> {
        if self.open.contains_key(&event) {
            return Err(Error::DescriptorRegistered(event));
        }
        self.open.insert(event, VirtualFd { fd, path });
        Ok(())
    }

    pub fn resolve(&self, event: EventId) -> Result<VirtualFd> {
        self.open
            .get(&event)
            .copied()
            .ok_or(Error::DescriptorNotFound(event))
    }

    pub fn remove(&mut self, event: EventId) -> Result<VirtualFd> {
        self.open
            .remove(&event)
            .ok_or(Error::DescriptorNotFound(event))
    }

    /// Remembers that the open at `event` failed on the replay backend.
    pub fn mark_failed(&mut self, event: EventId) {
        self.failed.insert(event);
    }

    pub fn has_failed(&self, event: EventId) -> bool {
        self.failed.contains(&event)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
