#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fs_rr::backend::FileStat;
use fs_rr::{Backend, Completion, Fd, Request, Response};

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}"))
}

fn bad_fd(fd: Fd) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("bad descriptor {fd}"))
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    pos: u64,
    append: bool,
}

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    fds: HashMap<Fd, OpenFile>,
    next_fd: u32,
}

/// Synchronous in-memory filesystem keyed by the exact path strings it is
/// handed.
#[derive(Debug, Default)]
pub struct MemFs {
    state: Mutex<MemState>,
    reads: Mutex<Vec<Vec<u8>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_owned(), data.to_vec());
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().dirs.insert(path.to_owned());
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().fds.len()
    }

    /// Bytes returned by every successful read, in call order.
    pub fn reads(&self) -> Vec<Vec<u8>> {
        self.reads.lock().unwrap().clone()
    }

    fn apply(&self, request: Request) -> io::Result<Response> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let stat = |state: &MemState, path: &str| {
            if let Some(data) = state.files.get(path) {
                Ok(Response::Stat(FileStat {
                    len: data.len() as u64,
                    is_dir: false,
                }))
            } else if state.dirs.contains(path) {
                Ok(Response::Stat(FileStat {
                    len: 0,
                    is_dir: true,
                }))
            } else {
                Err(not_found(path))
            }
        };

        match request {
            Request::Stat { path } | Request::Lstat { path } => stat(state, &path),
            Request::Fstat { fd } => {
                let path = state.fds.get(&fd).ok_or_else(|| bad_fd(fd))?.path.clone();
                stat(state, &path)
            }
            Request::Rename { from, to } => {
                let data = state.files.remove(&from).ok_or_else(|| not_found(&from))?;
                state.files.insert(to, data);
                Ok(Response::Done)
            }
            Request::Truncate { path, len } => {
                let data = state.files.get_mut(&path).ok_or_else(|| not_found(&path))?;
                data.resize(len as usize, 0);
                Ok(Response::Done)
            }
            Request::Ftruncate { fd, len } => {
                let path = &state.fds.get(&fd).ok_or_else(|| bad_fd(fd))?.path;
                let data = state.files.get_mut(path).ok_or_else(|| not_found(path))?;
                data.resize(len as usize, 0);
                Ok(Response::Done)
            }
            Request::Unlink { path } => {
                state.files.remove(&path).ok_or_else(|| not_found(&path))?;
                Ok(Response::Done)
            }
            Request::Rmdir { path } => {
                if !state.dirs.remove(&path) {
                    return Err(not_found(&path));
                }
                Ok(Response::Done)
            }
            Request::Mkdir { path, .. } => {
                if !state.dirs.insert(path.clone()) {
                    return Err(io::Error::new(io::ErrorKind::AlreadyExists, path));
                }
                Ok(Response::Done)
            }
            Request::Readdir { path } => {
                if !state.dirs.contains(&path) {
                    return Err(not_found(&path));
                }
                let prefix = format!("{path}/");
                let entries = state
                    .files
                    .keys()
                    .chain(state.dirs.iter())
                    .filter_map(|p| p.strip_prefix(&prefix))
                    .filter(|rest| !rest.contains('/'))
                    .map(str::to_owned)
                    .collect();
                Ok(Response::Entries(entries))
            }
            Request::Open { path, flag, .. } => {
                let exists = state.files.contains_key(&path);
                if !exists && !flag.creates() {
                    return Err(not_found(&path));
                }
                if exists && flag.exclusive() {
                    return Err(io::Error::new(io::ErrorKind::AlreadyExists, path));
                }
                let data = state.files.entry(path.clone()).or_default();
                if flag.truncates() {
                    data.clear();
                }
                state.next_fd += 1;
                let fd = Fd(state.next_fd);
                state.fds.insert(
                    fd,
                    OpenFile {
                        path,
                        pos: 0,
                        append: flag.appends(),
                    },
                );
                Ok(Response::Fd(fd))
            }
            Request::Close { fd } => {
                state.fds.remove(&fd).ok_or_else(|| bad_fd(fd))?;
                Ok(Response::Done)
            }
            Request::Fsync { fd } => {
                state.fds.get(&fd).ok_or_else(|| bad_fd(fd))?;
                Ok(Response::Done)
            }
            Request::Read { fd, len, position } => {
                let file = state.fds.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
                let data = state.files.get(&file.path).ok_or_else(|| not_found(&file.path))?;
                let start = (position.unwrap_or(file.pos) as usize).min(data.len());
                let end = (start + len).min(data.len());
                if position.is_none() {
                    file.pos = end as u64;
                }
                Ok(Response::Data(data[start..end].to_vec()))
            }
            Request::Write {
                fd,
                data: bytes,
                position,
            } => {
                let file = state.fds.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
                let data = state
                    .files
                    .get_mut(&file.path)
                    .ok_or_else(|| not_found(&file.path))?;
                let start = match position {
                    _ if file.append => data.len(),
                    Some(position) => position as usize,
                    None => file.pos as usize,
                };
                let end = start + bytes.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(&bytes);
                if position.is_none() {
                    file.pos = end as u64;
                }
                Ok(Response::Written(bytes.len()))
            }
            Request::ReadFile { path, .. } => state
                .files
                .get(&path)
                .map(|data| Response::Data(data.clone()))
                .ok_or_else(|| not_found(&path)),
            Request::WriteFile { path, data, .. } => {
                state.files.insert(path, data);
                Ok(Response::Done)
            }
            Request::AppendFile { path, data, .. } => {
                state.files.entry(path).or_default().extend_from_slice(&data);
                Ok(Response::Done)
            }
            Request::Exists { path } => Ok(Response::Exists(
                state.files.contains_key(&path) || state.dirs.contains(&path),
            )),
            Request::Chmod { path, .. } => {
                stat(state, &path)?;
                Ok(Response::Done)
            }
        }
    }
}

impl Backend for MemFs {
    fn call(&self, request: Request) -> io::Result<Response> {
        let result = self.apply(request);
        if let Ok(Response::Data(data)) = &result {
            self.reads.lock().unwrap().push(data.clone());
        }
        result
    }
}

/// Short label of a request's first path or descriptor, for call logs.
pub fn label(request: &Request) -> String {
    match request {
        Request::Stat { path }
        | Request::Lstat { path }
        | Request::Truncate { path, .. }
        | Request::Unlink { path }
        | Request::Rmdir { path }
        | Request::Mkdir { path, .. }
        | Request::Readdir { path }
        | Request::Open { path, .. }
        | Request::ReadFile { path, .. }
        | Request::WriteFile { path, .. }
        | Request::AppendFile { path, .. }
        | Request::Exists { path }
        | Request::Chmod { path, .. } => path.clone(),
        Request::Rename { from, to } => format!("{from}->{to}"),
        Request::Fstat { fd }
        | Request::Ftruncate { fd, .. }
        | Request::Close { fd }
        | Request::Fsync { fd }
        | Request::Read { fd, .. }
        | Request::Write { fd, .. } => fd.to_string(),
    }
}

fn canned(request: &Request, next_fd: &mut u32) -> Response {
    match request {
        Request::Open { .. } => {
            *next_fd += 1;
            Response::Fd(Fd(*next_fd))
        }
        Request::Read { len, .. } => Response::Data(vec![0; *len]),
        Request::Write { data, .. } => Response::Written(data.len()),
        Request::Exists { .. } => Response::Exists(true),
        _ => Response::Done,
    }
}

#[derive(Default)]
struct GateState {
    pending: Vec<(String, Request, Completion)>,
    log: Vec<String>,
    next_fd: u32,
}

/// Asynchronous-only stub that holds completions back until `threshold`
/// calls are pending, then fires them all in submission order.
pub struct Gate {
    threshold: usize,
    state: Mutex<GateState>,
}

impl Gate {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            state: Mutex::new(GateState::default()),
        }
    }

    /// `dispatch <label>` and `complete <label>` entries in call order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

impl Backend for Gate {
    fn supports_sync(&self) -> bool {
        false
    }

    fn call(&self, request: Request) -> io::Result<Response> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("synchronous {} on an asynchronous backend", request.name()),
        ))
    }

    fn submit(&self, request: Request, done: Completion) {
        let ready = {
            let mut state = self.state.lock().unwrap();
            let label = label(&request);
            state.log.push(format!("dispatch {label}"));
            state.pending.push((label, request, done));
            if state.pending.len() < self.threshold {
                return;
            }
            let ready = std::mem::take(&mut state.pending);
            let mut fired = Vec::with_capacity(ready.len());
            for (label, request, done) in ready {
                state.log.push(format!("complete {label}"));
                let response = canned(&request, &mut state.next_fd);
                fired.push((done, response));
            }
            fired
        };
        for (done, response) in ready {
            done.complete(Ok(response));
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    busy: HashSet<String>,
    fds: HashMap<Fd, String>,
    next_fd: u32,
    in_flight: usize,
    peak: usize,
    violations: Vec<String>,
    calls: usize,
}

/// Asynchronous-only stub that completes each call from its own thread
/// after a short delay and notes any two overlapping calls on one path.
#[derive(Clone, Default)]
pub struct Tracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn peak(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    fn keys(state: &TrackerState, request: &Request) -> Vec<String> {
        match request {
            Request::Rename { from, to } if from == to => vec![from.clone()],
            Request::Rename { from, to } => vec![from.clone(), to.clone()],
            Request::Fstat { fd }
            | Request::Ftruncate { fd, .. }
            | Request::Close { fd }
            | Request::Fsync { fd }
            | Request::Read { fd, .. }
            | Request::Write { fd, .. } => state
                .fds
                .get(fd)
                .cloned()
                .map(|path| vec![path])
                .unwrap_or_default(),
            other => vec![label(other)],
        }
    }
}

impl Backend for Tracker {
    fn supports_sync(&self) -> bool {
        false
    }

    fn call(&self, request: Request) -> io::Result<Response> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("synchronous {} on an asynchronous backend", request.name()),
        ))
    }

    fn submit(&self, request: Request, done: Completion) {
        let (keys, response) = {
            let mut state = self.state.lock().unwrap();
            let keys = Self::keys(&state, &request);
            for key in &keys {
                if !state.busy.insert(key.clone()) {
                    state.violations.push(format!("{} overlaps on {key}", request.name()));
                }
            }
            let response = canned(&request, &mut state.next_fd);
            if let (Request::Open { path, .. }, Response::Fd(fd)) = (&request, &response) {
                state.fds.insert(*fd, path.clone());
            }
            state.calls += 1;
            state.in_flight += 1;
            state.peak = state.peak.max(state.in_flight);
            (keys, response)
        };

        let state = Arc::clone(&self.state);
        thread::spawn(move || {
            thread::sleep(Duration::from_micros(200));
            {
                let mut state = state.lock().unwrap();
                for key in &keys {
                    state.busy.remove(key);
                }
                state.in_flight -= 1;
            }
            done.complete(Ok(response));
        });
    }
}
