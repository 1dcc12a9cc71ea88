//! The storage capability surface that traces are recorded from and
//! replayed against.

use std::fmt;
use std::io;

use serde::Serialize;

use crate::trace::{FileOptions, OpenFlag};

pub mod local;

pub use local::LocalFs;

/// Descriptor number handed out by a backend.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_dir: bool,
}

/// One backend call with its concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Stat { path: String },
    Lstat { path: String },
    Fstat { fd: Fd },
    Rename { from: String, to: String },
    Truncate { path: String, len: u64 },
    Ftruncate { fd: Fd, len: u64 },
    Unlink { path: String },
    Rmdir { path: String },
    Mkdir { path: String, mode: Option<u32> },
    Readdir { path: String },
    Open {
        path: String,
        flag: OpenFlag,
        mode: Option<u32>,
    },
    Close { fd: Fd },
    Fsync { fd: Fd },
    Read {
        fd: Fd,
        len: usize,
        position: Option<u64>,
    },
    Write {
        fd: Fd,
        data: Vec<u8>,
        position: Option<u64>,
    },
    ReadFile { path: String, options: FileOptions },
    WriteFile {
        path: String,
        data: Vec<u8>,
        options: FileOptions,
    },
    AppendFile {
        path: String,
        data: Vec<u8>,
        options: FileOptions,
    },
    Exists { path: String },
    /// Not part of the trace vocabulary; recorders forward it untouched.
    Chmod { path: String, mode: u32 },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Stat { .. } => "stat",
            Request::Lstat { .. } => "lstat",
            Request::Fstat { .. } => "fstat",
            Request::Rename { .. } => "rename",
            Request::Truncate { .. } => "truncate",
            Request::Ftruncate { .. } => "ftruncate",
            Request::Unlink { .. } => "unlink",
            Request::Rmdir { .. } => "rmdir",
            Request::Mkdir { .. } => "mkdir",
            Request::Readdir { .. } => "readdir",
            Request::Open { .. } => "open",
            Request::Close { .. } => "close",
            Request::Fsync { .. } => "fsync",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::ReadFile { .. } => "readFile",
            Request::WriteFile { .. } => "writeFile",
            Request::AppendFile { .. } => "appendFile",
            Request::Exists { .. } => "exists",
            Request::Chmod { .. } => "chmod",
        }
    }
}

/// Successful result of a backend call.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done,
    Stat(FileStat),
    Fd(Fd),
    Entries(Vec<String>),
    Data(Vec<u8>),
    Written(usize),
    Exists(bool),
}

/// Completion notification for an asynchronous call. Must be fired exactly
/// once; a call whose completion never fires stalls whoever waits on it.
pub struct Completion(Box<dyn FnOnce(io::Result<Response>) + Send>);

impl Completion {
    pub fn new(f: impl FnOnce(io::Result<Response>) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn complete(self, result: io::Result<Response>) {
        (self.0)(result)
    }

    /// Runs `f` on the result before handing it to this completion.
    pub fn inspect(self, f: impl FnOnce(&io::Result<Response>) + Send + 'static) -> Self {
        Completion::new(move |result| {
            f(&result);
            self.complete(result)
        })
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// A storage backend offering the filesystem primitives of [`Request`] in a
/// synchronous and an asynchronous calling convention.
pub trait Backend: Send + Sync {
    /// Whether [`Backend::call`] may be used. Backends answering `false`
    /// only receive requests through [`Backend::submit`].
    fn supports_sync(&self) -> bool {
        true
    }

    /// Performs `request` and returns its result.
    fn call(&self, request: Request) -> io::Result<Response>;

    /// Starts `request` and reports its result through `done`, possibly from
    /// another thread. The default runs the call inline.
    fn submit(&self, request: Request, done: Completion) {
        done.complete(self.call(request))
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn supports_sync(&self) -> bool {
        (**self).supports_sync()
    }

    fn call(&self, request: Request) -> io::Result<Response> {
        (**self).call(request)
    }

    fn submit(&self, request: Request, done: Completion) {
        (**self).submit(request, done)
    }
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn supports_sync(&self) -> bool {
        (**self).supports_sync()
    }

    fn call(&self, request: Request) -> io::Result<Response> {
        (**self).call(request)
    }

    fn submit(&self, request: Request, done: Completion) {
        (**self).submit(request, done)
    }
}

pub(crate) fn unexpected(request: &str, response: &Response) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{request} returned unexpected {response:?}"),
    )
}
