use std::collections::HashMap;
use std::io;
use std::mem;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::backend::{Backend, Completion, Fd, Request, Response};
use crate::trace::{Event, EventId, EventKind, Op, StringTable, Trace, NULL_OFFSET};
use crate::{Error, Result};

/// Maps live descriptors seen while recording to the id of the event that
/// opened them.
#[derive(Debug, Default)]
pub struct DescriptorMap {
    events: HashMap<Fd, EventId>,
}

impl DescriptorMap {
    pub fn register(&mut self, event: EventId, fd: Fd) {
        if let Some(previous) = self.events.insert(fd, event) {
            debug!(%fd, previous, event, "descriptor reused without close");
        }
    }

    pub fn resolve(&self, fd: Fd) -> Result<EventId> {
        self.events
            .get(&fd)
            .copied()
            .ok_or(Error::DescriptorNotFound(fd.0))
    }

    pub fn remove(&mut self, fd: Fd) -> Option<EventId> {
        self.events.remove(&fd)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Default)]
struct Log {
    strings: StringTable,
    events: Vec<Event>,
    payload: Option<Vec<u8>>,
    fds: DescriptorMap,
}

/// Bookkeeping to apply once a forwarded call finishes.
#[derive(Debug, Clone, Copy)]
enum Effect {
    None,
    Register(EventId),
    Release(Fd),
}

/// Records every request passing through it, then forwards the request
/// unmodified to the wrapped backend.
pub struct Recorder<B> {
    backend: B,
    root: PathBuf,
    log: Arc<Mutex<Log>>,
}

impl<B: Backend> Recorder<B> {
    /// Paths are recorded relative to `root`.
    /// A relative `root` is taken against the current directory, so
    /// absolute spellings of the same file still normalize under it.
    pub fn new(backend: B, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = match std::env::current_dir() {
            Ok(cwd) if root.is_relative() => cwd.join(root),
            _ => root,
        };
        Self {
            backend,
            root,
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    /// Also keep the bytes of every write so replay can reproduce content.
    pub fn capture_payload(self) -> Self {
        self.log().payload.get_or_insert_with(Vec::new);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn event_count(&self) -> u32 {
        self.log().events.len() as u32
    }

    /// Appends the event for `request` and returns its id, or `None` for a
    /// request outside the trace vocabulary.
    pub fn record(&self, request: &Request, sync: bool) -> Result<Option<EventId>> {
        let Some(kind) = traced_kind(request) else {
            warn!(request = request.name(), "forwarding untraced request");
            return Ok(None);
        };
        let kind = if sync { kind.to_sync() } else { kind };
        let mut log = self.log();
        let log = &mut *log;
        let id = log.events.len() as EventId;
        let mut path = |p: &str| log.strings.intern(&normalize(&self.root, p));
        let op = match request {
            Request::Stat { path: p } => Op::Stat { path: path(p) },
            Request::Lstat { path: p } => Op::Lstat { path: path(p) },
            Request::Unlink { path: p } => Op::Unlink { path: path(p) },
            Request::Rmdir { path: p } => Op::Rmdir { path: path(p) },
            Request::Readdir { path: p } => Op::Readdir { path: path(p) },
            Request::Exists { path: p } => Op::Exists { path: path(p) },
            Request::Rename { from, to } => Op::Rename {
                from: path(from),
                to: path(to),
            },
            Request::Truncate { path: p, len } => Op::Truncate {
                len: narrow(kind, "length", *len)?,
                path: path(p),
            },
            Request::Mkdir { path: p, mode } => Op::Mkdir {
                path: path(p),
                mode: *mode,
            },
            Request::Open { path: p, flag, mode } => Op::Open {
                path: path(p),
                flag: *flag,
                mode: *mode,
            },
            Request::ReadFile { path: p, options } => Op::ReadFile {
                path: path(p),
                options: *options,
            },
            Request::WriteFile {
                path: p,
                data,
                options,
            } => Op::WriteFile {
                len: narrow(kind, "length", data.len() as u64)?,
                path: path(p),
                options: *options,
            },
            Request::AppendFile {
                path: p,
                data,
                options,
            } => Op::AppendFile {
                len: narrow(kind, "length", data.len() as u64)?,
                path: path(p),
                options: *options,
            },
            Request::Fstat { fd } => Op::Fstat {
                file: log.fds.resolve(*fd)?,
            },
            Request::Close { fd } => Op::Close {
                file: log.fds.resolve(*fd)?,
            },
            Request::Fsync { fd } => Op::Fsync {
                file: log.fds.resolve(*fd)?,
            },
            Request::Ftruncate { fd, len } => Op::Ftruncate {
                file: log.fds.resolve(*fd)?,
                len: narrow(kind, "length", *len)?,
            },
            Request::Read { fd, len, position } => Op::Read {
                file: log.fds.resolve(*fd)?,
                len: narrow(kind, "length", *len as u64)?,
                position: position.map(|p| offset(kind, p)).transpose()?,
            },
            Request::Write { fd, data, position } => Op::Write {
                file: log.fds.resolve(*fd)?,
                len: narrow(kind, "length", data.len() as u64)?,
                position: position.map(|p| offset(kind, p)).transpose()?,
            },
            Request::Chmod { .. } => unreachable!("chmod has no event kind"),
        };
        let event = op.to_event(sync);
        if let (Some(payload), Some(data)) = (log.payload.as_mut(), written_data(request)) {
            payload.extend_from_slice(data);
        }
        debug!(index = id, %event, "recorded");
        log.events.push(event);
        Ok(Some(id))
    }

    /// Ends the recording, returning the wrapped backend and the trace.
    pub fn finish(self) -> Result<(B, Trace)> {
        let Log {
            strings,
            events,
            payload,
            ..
        } = mem::take(&mut *self.log());
        let trace = Trace::new(strings, events, payload)?;
        Ok((self.backend, trace))
    }

    /// Ends the recording and writes the trace artifacts for `prefix`.
    pub fn save(self, prefix: impl AsRef<Path>) -> Result<B> {
        let (backend, trace) = self.finish()?;
        trace.save(prefix)?;
        Ok(backend)
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        lock(&self.log)
    }

    fn effect(request: &Request, event: Option<EventId>) -> Effect {
        match (request, event) {
            (Request::Open { .. }, Some(id)) => Effect::Register(id),
            (Request::Close { fd }, Some(_)) => Effect::Release(*fd),
            _ => Effect::None,
        }
    }
}

impl<B: Backend> Backend for Recorder<B> {
    fn supports_sync(&self) -> bool {
        self.backend.supports_sync()
    }

    fn call(&self, request: Request) -> io::Result<Response> {
        let event = self.record(&request, true).map_err(Error::into_io)?;
        let effect = Self::effect(&request, event);
        let result = self.backend.call(request);
        settle(&self.log, effect, &result);
        result
    }

    fn submit(&self, request: Request, done: Completion) {
        let event = match self.record(&request, false) {
            Ok(event) => event,
            Err(err) => return done.complete(Err(err.into_io())),
        };
        let effect = Self::effect(&request, event);
        let log = Arc::clone(&self.log);
        let done = done.inspect(move |result| settle(&log, effect, result));
        self.backend.submit(request, done)
    }
}

fn lock(log: &Mutex<Log>) -> MutexGuard<'_, Log> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle(log: &Mutex<Log>, effect: Effect, result: &io::Result<Response>) {
    match (effect, result) {
        (Effect::Register(event), Ok(Response::Fd(fd))) => lock(log).fds.register(event, *fd),
        (Effect::Release(fd), Ok(_)) => {
            lock(log).fds.remove(fd);
        }
        _ => {}
    }
}

fn traced_kind(request: &Request) -> Option<EventKind> {
    let kind = match request {
        Request::Stat { .. } => EventKind::Stat,
        Request::Lstat { .. } => EventKind::Lstat,
        Request::Fstat { .. } => EventKind::Fstat,
        Request::Rename { .. } => EventKind::Rename,
        Request::Truncate { .. } => EventKind::Truncate,
        Request::Ftruncate { .. } => EventKind::Ftruncate,
        Request::Unlink { .. } => EventKind::Unlink,
        Request::Rmdir { .. } => EventKind::Rmdir,
        Request::Mkdir { .. } => EventKind::Mkdir,
        Request::Readdir { .. } => EventKind::Readdir,
        Request::Open { .. } => EventKind::Open,
        Request::Close { .. } => EventKind::Close,
        Request::Fsync { .. } => EventKind::Fsync,
        Request::Read { .. } => EventKind::Read,
        Request::Write { .. } => EventKind::Write,
        Request::ReadFile { .. } => EventKind::ReadFile,
        Request::WriteFile { .. } => EventKind::WriteFile,
        Request::AppendFile { .. } => EventKind::AppendFile,
        Request::Exists { .. } => EventKind::Exists,
        Request::Chmod { .. } => return None,
    };
    Some(kind)
}

fn written_data(request: &Request) -> Option<&[u8]> {
    match request {
        Request::Write { data, .. }
        | Request::WriteFile { data, .. }
        | Request::AppendFile { data, .. } => Some(data),
        _ => None,
    }
}

fn narrow(kind: EventKind, what: &str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidArgument {
        kind,
        reason: format!("{what} {value} does not fit in 32 bits"),
    })
}

fn offset(kind: EventKind, position: u64) -> Result<u32> {
    match narrow(kind, "position", position)? {
        NULL_OFFSET => Err(Error::InvalidArgument {
            kind,
            reason: format!("position {position} collides with the null sentinel"),
        }),
        position => Ok(position),
    }
}

fn clean(path: &Path) -> Vec<Component<'_>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts
}

/// Rewrites `path` relative to `root`, resolving `.` and `..` lexically, so
/// that every spelling of one location interns to one id.
pub fn normalize(root: &Path, path: &str) -> String {
    let joined = root.join(path);
    let base = clean(root);
    let target = clean(&joined);
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 && joined.has_root() {
        return target.iter().collect::<PathBuf>().to_string_lossy().into_owned();
    }
    let relative: PathBuf = std::iter::repeat(Component::ParentDir)
        .take(base.len() - common)
        .chain(target[common..].iter().copied())
        .collect();
    if relative.as_os_str().is_empty() {
        ".".to_owned()
    } else {
        relative.to_string_lossy().into_owned()
    }
}
