//! Replays a recorded trace against a backend with as much concurrency as
//! the trace's resource dependencies allow.
//!
//! The scheduler runs on the calling thread. It walks the trace in order and
//! dispatches each event once every path the event touches is free; an
//! event whose path is held stops the walk until a completion releases it.
//! Asynchronous calls are left in flight while the walk continues, so
//! operations on unrelated paths overlap on the backend.

use std::collections::HashMap;
use std::io;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::backend::{self, Backend, Completion, Request, Response};
use crate::error::ReplayError;
use crate::trace::{EventId, Op, StrId, Target, Trace};
use crate::Error;

mod descriptors;
mod locks;
mod report;

pub use descriptors::{VirtualFd, VirtualFds};
pub use locks::{Claim, LockTable};
pub use report::{Failure, ReplayReport, Summary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Send every event through the asynchronous calling convention even
    /// when the backend supports synchronous calls.
    pub force_async: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Suspended,
}

/// Result of one dispatch attempt at the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Dispatched,
    /// A path the event needs is held; the cursor stays put.
    Blocked,
    EndOfTrace,
}

#[derive(Debug)]
struct InFlight {
    op: Op,
    claim: Claim,
}

struct Finished {
    index: EventId,
    result: io::Result<Response>,
}

pub struct Replayer<'a, B: ?Sized> {
    trace: &'a Trace,
    backend: &'a B,
    normalize: bool,
    state: RunState,
    cursor: EventId,
    in_flight: HashMap<EventId, InFlight>,
    locks: LockTable,
    fds: VirtualFds,
    sender: Sender<Finished>,
    completions: Receiver<Finished>,
    started: Option<Instant>,
    peak_in_flight: usize,
    failures: Vec<Failure>,
}

impl<'a, B: Backend + ?Sized> Replayer<'a, B> {
    pub fn new(trace: &'a Trace, backend: &'a B) -> Self {
        Self::with_config(trace, backend, ReplayConfig::default())
    }

    pub fn with_config(trace: &'a Trace, backend: &'a B, config: ReplayConfig) -> Self {
        let (sender, completions) = channel::unbounded();
        Self {
            trace,
            backend,
            normalize: config.force_async || !backend.supports_sync(),
            state: RunState::Suspended,
            cursor: 0,
            in_flight: HashMap::new(),
            locks: LockTable::new(),
            fds: VirtualFds::new(),
            sender,
            completions,
            started: None,
            peak_in_flight: 0,
            failures: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn cursor(&self) -> EventId {
        self.cursor
    }

    /// Replays the whole trace, blocking until every dispatched operation
    /// has completed.
    pub fn run(mut self) -> Result<ReplayReport, ReplayError> {
        info!(
            events = self.trace.len(),
            asynchronous = self.normalize,
            "replay started"
        );
        self.become_ready()?;
        while !self.in_flight.is_empty() {
            let Ok(Finished { index, result }) = self.completions.recv() else {
                break;
            };
            self.finish(index, result)?;
            self.become_ready()?;
        }

        if self.cursor < self.trace.len() || !self.in_flight.is_empty() {
            return Err(ReplayError::Stalled {
                cursor: self.cursor,
                total: self.trace.len(),
            });
        }
        if !self.locks.is_empty() {
            return Err(ReplayError::LeakedLocks {
                count: self.locks.len(),
            });
        }
        if !self.fds.is_empty() {
            warn!(open = self.fds.len(), "trace left descriptors open");
        }

        let elapsed = self
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        info!(
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            peak_in_flight = self.peak_in_flight,
            failures = self.failures.len(),
            "replay finished"
        );
        Ok(ReplayReport {
            events: self.trace.len(),
            elapsed,
            peak_in_flight: self.peak_in_flight,
            open_descriptors: self.fds.len(),
            failures: self.failures,
        })
    }

    /// Dispatches from the cursor until the trace ends or an event blocks.
    /// Does nothing if a dispatch cycle is already running.
    fn become_ready(&mut self) -> Result<Dispatch, ReplayError> {
        if self.state == RunState::Running {
            return Ok(Dispatch::Dispatched);
        }
        self.state = RunState::Running;
        let outcome = loop {
            match self.dispatch_next() {
                Ok(Dispatch::Dispatched) => continue,
                other => break other,
            }
        };
        self.state = RunState::Suspended;
        outcome
    }

    fn dispatch_next(&mut self) -> Result<Dispatch, ReplayError> {
        let index = self.cursor;
        let Some(&event) = self.trace.event(index) else {
            return Ok(Dispatch::EndOfTrace);
        };
        let fail = |source| ReplayError::Event {
            index,
            event,
            source,
        };

        let op = event.op().map_err(fail)?;
        let claim = self.claim(index, &op).map_err(fail)?;
        if !self.locks.try_acquire(&claim).map_err(fail)? {
            debug!(index, %event, "blocked");
            return Ok(Dispatch::Blocked);
        }

        self.cursor += 1;
        self.started.get_or_insert_with(Instant::now);
        self.in_flight.insert(index, InFlight { op, claim });
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());

        if let Target::Descriptor(file) = op.target() {
            if self.fds.has_failed(file) {
                let error = io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("bad descriptor: open at event {file} failed"),
                );
                self.finish(index, Err(error))?;
                return Ok(Dispatch::Dispatched);
            }
        }

        let request = self.request(index, &op).map_err(fail)?;
        let kind = if self.normalize {
            event.kind.to_async()
        } else {
            event.kind
        };
        debug!(index, %event, "dispatching");
        if kind.is_sync() {
            let result = self.backend.call(request);
            self.finish(index, result)?;
        } else {
            let sender = self.sender.clone();
            self.backend.submit(
                request,
                Completion::new(move |result| {
                    // The receiver only goes away once the run has ended.
                    let _ = sender.send(Finished { index, result });
                }),
            );
        }
        Ok(Dispatch::Dispatched)
    }

    fn claim(&self, index: EventId, op: &Op) -> Result<Claim, Error> {
        let claim = match op.target() {
            Target::Path(path) => Claim::Paths(vec![path]),
            Target::Paths(from, to) => Claim::Paths(vec![from, to]),
            Target::Descriptor(file) => Claim::Descriptor {
                file,
                path: self.opened_path(index, file)?,
            },
        };
        Ok(claim)
    }

    /// Path opened by event `file`, which must be an earlier open.
    fn opened_path(&self, index: EventId, file: EventId) -> Result<StrId, Error> {
        match self.trace.event(file) {
            Some(opener) if file < index && opener.kind.is_open() => Ok(opener.arg1),
            _ => Err(Error::DescriptorNotFound(file)),
        }
    }

    /// Rebuilds the concrete backend call for `op`.
    fn request(&self, index: EventId, op: &Op) -> Result<Request, Error> {
        let strings = self.trace.strings();
        let path = |id: StrId| strings.resolve(id).map(str::to_owned);
        let fd = |file: EventId| self.fds.resolve(file).map(|vfd| vfd.fd);
        let data = |len: u32| match self.trace.payload(index) {
            Some(bytes) => bytes.to_vec(),
            None => vec![0; len as usize],
        };
        let position = |position: Option<u32>| position.map(u64::from);

        let request = match *op {
            Op::Stat { path: p } => Request::Stat { path: path(p)? },
            Op::Lstat { path: p } => Request::Lstat { path: path(p)? },
            Op::Unlink { path: p } => Request::Unlink { path: path(p)? },
            Op::Rmdir { path: p } => Request::Rmdir { path: path(p)? },
            Op::Readdir { path: p } => Request::Readdir { path: path(p)? },
            Op::Exists { path: p } => Request::Exists { path: path(p)? },
            Op::Rename { from, to } => Request::Rename {
                from: path(from)?,
                to: path(to)?,
            },
            Op::Fstat { file } => Request::Fstat { fd: fd(file)? },
            Op::Close { file } => Request::Close { fd: fd(file)? },
            Op::Fsync { file } => Request::Fsync { fd: fd(file)? },
            Op::Ftruncate { file, len } => Request::Ftruncate {
                fd: fd(file)?,
                len: u64::from(len),
            },
            Op::Truncate { path: p, len } => Request::Truncate {
                path: path(p)?,
                len: u64::from(len),
            },
            Op::Mkdir { path: p, mode } => Request::Mkdir {
                path: path(p)?,
                mode,
            },
            Op::Open {
                path: p,
                flag,
                mode,
            } => Request::Open {
                path: path(p)?,
                flag,
                mode,
            },
            Op::Read {
                file,
                len,
                position: at,
            } => Request::Read {
                fd: fd(file)?,
                len: len as usize,
                position: position(at),
            },
            Op::Write {
                file,
                len,
                position: at,
            } => Request::Write {
                fd: fd(file)?,
                data: data(len),
                position: position(at),
            },
            Op::ReadFile { path: p, options } => Request::ReadFile {
                path: path(p)?,
                options,
            },
            Op::WriteFile {
                path: p,
                len,
                options,
            } => Request::WriteFile {
                path: path(p)?,
                data: data(len),
                options,
            },
            Op::AppendFile {
                path: p,
                len,
                options,
            } => Request::AppendFile {
                path: path(p)?,
                data: data(len),
                options,
            },
        };
        Ok(request)
    }

    /// Settles a completed operation: releases its locks and updates the
    /// descriptor map.
    fn finish(&mut self, index: EventId, result: io::Result<Response>) -> Result<(), ReplayError> {
        let flight = self
            .in_flight
            .remove(&index)
            .ok_or(ReplayError::UnknownCompletion(index))?;
        let event = self.trace.events()[index as usize];
        let fail = |source| ReplayError::Event {
            index,
            event,
            source,
        };

        self.locks.release(&flight.claim).map_err(fail)?;
        let result = match (flight.op, result) {
            (Op::Open { path, .. }, Ok(Response::Fd(fd))) => {
                self.fds.register(index, fd, path).map_err(fail)?;
                Ok(Response::Fd(fd))
            }
            (Op::Open { .. }, Ok(other)) => {
                self.fds.mark_failed(index);
                Err(backend::unexpected("open", &other))
            }
            (Op::Open { .. }, Err(error)) => {
                self.fds.mark_failed(index);
                Err(error)
            }
            (Op::Close { file }, Ok(response)) => {
                self.fds.remove(file).map_err(fail)?;
                Ok(response)
            }
            (_, result) => result,
        };

        match result {
            Ok(_) => debug!(index, %event, "completed"),
            Err(error) => {
                warn!(index, %event, %error, "operation failed");
                self.failures.push(Failure {
                    index,
                    event,
                    error: error.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Replays `trace` once against `backend` with the default configuration.
pub fn replay<B: Backend + ?Sized>(
    trace: &Trace,
    backend: &B,
) -> Result<ReplayReport, ReplayError> {
    Replayer::new(trace, backend).run()
}
