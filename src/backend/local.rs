use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{self, SendError, Sender};

use super::{Backend, Completion, Fd, FileStat, Request, Response};
use crate::trace::OpenFlag;

/// Backend over the local disk. Relative paths resolve under `root`.
/// Asynchronous calls run on a fixed pool of worker threads so that
/// independent operations overlap.
#[derive(Clone, Debug)]
pub struct LocalFs {
    inner: Arc<Inner>,
}

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    files: Mutex<HashMap<Fd, Arc<Mutex<File>>>>,
    next_fd: AtomicU32,
    // Workers exit once the last handle drops this sender.
    jobs: Sender<Job>,
}

/// Worker count when none is given.
const DEFAULT_WORKERS: usize = 16;

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_workers(root, DEFAULT_WORKERS)
    }

    /// Like [`LocalFs::new`] with `workers` threads serving asynchronous
    /// calls (at least one).
    pub fn with_workers(root: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                files: Mutex::new(HashMap::new()),
                next_fd: AtomicU32::new(3),
                jobs: spawn_workers(workers.max(1)),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Number of descriptors currently open.
    pub fn open_files(&self) -> usize {
        self.files().len()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.inner.root.join(path)
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<Fd, Arc<Mutex<File>>>> {
        // A panic while holding the table cannot leave it half-updated.
        self.inner
            .files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn file(&self, fd: Fd) -> io::Result<Arc<Mutex<File>>> {
        self.files()
            .get(&fd)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("bad descriptor {fd}")))
    }

    fn with_file<T>(&self, fd: Fd, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let file = self.file(fd)?;
        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut file)
    }

    fn open(&self, path: &str, flag: OpenFlag, mode: Option<u32>) -> io::Result<Fd> {
        let file = open_options(flag, mode).open(self.resolve(path))?;
        let fd = Fd(self.inner.next_fd.fetch_add(1, Ordering::Relaxed));
        self.files().insert(fd, Arc::new(Mutex::new(file)));
        Ok(fd)
    }

    fn write_whole(&self, path: &str, data: &[u8], flag: OpenFlag) -> io::Result<()> {
        let mut file = open_options(flag, None).open(self.resolve(path))?;
        file.write_all(data)
    }
}

fn open_options(flag: OpenFlag, mode: Option<u32>) -> OpenOptions {
    let mut options = OpenOptions::new();
    options
        .read(flag.readable())
        .write(flag.writable() && !flag.appends())
        .append(flag.appends())
        .truncate(flag.truncates())
        .create(flag.creates() && !flag.exclusive())
        .create_new(flag.exclusive());
    if let Some(mode) = mode {
        platform::open_mode(&mut options, mode);
    }
    options
}

#[cfg(unix)]
mod platform {
    use std::fs::{self, DirBuilder, OpenOptions};
    use std::io;
    use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
    use std::path::Path;

    pub fn open_mode(options: &mut OpenOptions, mode: u32) {
        options.mode(mode);
    }

    pub fn dir_mode(builder: &mut DirBuilder, mode: u32) {
        builder.mode(mode);
    }

    pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
}

#[cfg(not(unix))]
mod platform {
    use std::fs::{DirBuilder, OpenOptions};
    use std::io;
    use std::path::Path;

    pub fn open_mode(_options: &mut OpenOptions, _mode: u32) {}

    pub fn dir_mode(_builder: &mut DirBuilder, _mode: u32) {}

    pub fn chmod(_path: &Path, _mode: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "chmod is not supported on this platform",
        ))
    }
}

fn stat(metadata: fs::Metadata) -> FileStat {
    FileStat {
        len: metadata.len(),
        is_dir: metadata.is_dir(),
    }
}

/// Runs `f` with the cursor at `position`, restoring it afterwards.
fn spawn_workers(count: usize) -> Sender<Job> {
    let (jobs, queue) = channel::unbounded::<Job>();
    for _ in 0..count {
        let queue = queue.clone();
        thread::spawn(move || {
            for job in queue {
                job();
            }
        });
    }
    jobs
}

fn at_position<T>(
    file: &mut File,
    position: Option<u64>,
    f: impl FnOnce(&mut File) -> io::Result<T>,
) -> io::Result<T> {
    let Some(position) = position else {
        return f(file);
    };
    let saved = file.stream_position()?;
    file.seek(SeekFrom::Start(position))?;
    let result = f(file);
    file.seek(SeekFrom::Start(saved))?;
    result
}

impl Backend for LocalFs {
    fn call(&self, request: Request) -> io::Result<Response> {
        match request {
            Request::Stat { path } => Ok(Response::Stat(stat(fs::metadata(self.resolve(&path))?))),
            Request::Lstat { path } => Ok(Response::Stat(stat(fs::symlink_metadata(
                self.resolve(&path),
            )?))),
            Request::Fstat { fd } => {
                self.with_file(fd, |file| Ok(Response::Stat(stat(file.metadata()?))))
            }
            Request::Rename { from, to } => {
                fs::rename(self.resolve(&from), self.resolve(&to))?;
                Ok(Response::Done)
            }
            Request::Truncate { path, len } => {
                OpenOptions::new()
                    .write(true)
                    .open(self.resolve(&path))?
                    .set_len(len)?;
                Ok(Response::Done)
            }
            Request::Ftruncate { fd, len } => {
                self.with_file(fd, |file| file.set_len(len))?;
                Ok(Response::Done)
            }
            Request::Unlink { path } => {
                fs::remove_file(self.resolve(&path))?;
                Ok(Response::Done)
            }
            Request::Rmdir { path } => {
                fs::remove_dir(self.resolve(&path))?;
                Ok(Response::Done)
            }
            Request::Mkdir { path, mode } => {
                let mut builder = fs::DirBuilder::new();
                if let Some(mode) = mode {
                    platform::dir_mode(&mut builder, mode);
                }
                builder.create(self.resolve(&path))?;
                Ok(Response::Done)
            }
            Request::Readdir { path } => {
                let mut names = fs::read_dir(self.resolve(&path))?
                    .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                    .collect::<io::Result<Vec<_>>>()?;
                names.sort();
                Ok(Response::Entries(names))
            }
            Request::Open { path, flag, mode } => Ok(Response::Fd(self.open(&path, flag, mode)?)),
            Request::Close { fd } => {
                self.files().remove(&fd).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("bad descriptor {fd}"))
                })?;
                Ok(Response::Done)
            }
            Request::Fsync { fd } => {
                self.with_file(fd, |file| file.sync_all())?;
                Ok(Response::Done)
            }
            Request::Read { fd, len, position } => self.with_file(fd, |file| {
                at_position(file, position, |file| {
                    let mut data = Vec::with_capacity(len);
                    Read::by_ref(file).take(len as u64).read_to_end(&mut data)?;
                    Ok(Response::Data(data))
                })
            }),
            Request::Write { fd, data, position } => self.with_file(fd, |file| {
                at_position(file, position, |file| {
                    file.write_all(&data)?;
                    Ok(Response::Written(data.len()))
                })
            }),
            Request::ReadFile { path, .. } => Ok(Response::Data(fs::read(self.resolve(&path))?)),
            Request::WriteFile {
                path,
                data,
                options,
            } => {
                self.write_whole(&path, &data, options.flag.unwrap_or(OpenFlag::W))?;
                Ok(Response::Done)
            }
            Request::AppendFile {
                path,
                data,
                options,
            } => {
                self.write_whole(&path, &data, options.flag.unwrap_or(OpenFlag::A))?;
                Ok(Response::Done)
            }
            Request::Exists { path } => Ok(Response::Exists(self.resolve(&path).exists())),
            Request::Chmod { path, mode } => {
                platform::chmod(&self.resolve(&path), mode)?;
                Ok(Response::Done)
            }
        }
    }

    fn submit(&self, request: Request, done: Completion) {
        let fs = self.clone();
        let job: Job = Box::new(move || done.complete(fs.call(request)));
        // Only fails if every worker has died; run the call here instead.
        if let Err(SendError(job)) = self.inner.jobs.send(job) {
            job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn descriptor_round_trip() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::new(dir.path());
        let Response::Fd(fd) = fs
            .call(Request::Open {
                path: "f.bin".into(),
                flag: OpenFlag::WPlus,
                mode: None,
            })
            .unwrap()
        else {
            panic!("open did not return a descriptor");
        };
        fs.call(Request::Write {
            fd,
            data: b"hello world".to_vec(),
            position: None,
        })
        .unwrap();
        let read = fs
            .call(Request::Read {
                fd,
                len: 5,
                position: Some(6),
            })
            .unwrap();
        assert_eq!(read, Response::Data(b"world".to_vec()));
        fs.call(Request::Close { fd }).unwrap();
        assert_eq!(fs.open_files(), 0);
        assert!(fs.call(Request::Fsync { fd }).is_err());
    }

    #[test]
    fn sequential_reads_advance_the_file_position() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), b"hello world").unwrap();
        let fs = LocalFs::new(dir.path());
        let Response::Fd(fd) = fs
            .call(Request::Open {
                path: "f.txt".into(),
                flag: OpenFlag::R,
                mode: None,
            })
            .unwrap()
        else {
            panic!("open did not return a descriptor");
        };
        let mut chunks = Vec::new();
        for _ in 0..3 {
            match fs
                .call(Request::Read {
                    fd,
                    len: 6,
                    position: None,
                })
                .unwrap()
            {
                Response::Data(data) => chunks.push(data),
                other => panic!("read returned {other:?}"),
            }
        }
        assert_eq!(chunks, [&b"hello "[..], b"world", b""]);
    }

    #[test]
    fn asynchronous_calls_share_the_worker_pool() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::with_workers(dir.path(), 2);
        let (tx, rx) = channel::unbounded();
        for i in 0..64 {
            let tx = tx.clone();
            fs.submit(
                Request::WriteFile {
                    path: format!("f{i}"),
                    data: vec![b'x'; i],
                    options: Default::default(),
                },
                Completion::new(move |result| {
                    let _ = tx.send((result.is_ok(), thread::current().id()));
                }),
            );
        }
        drop(tx);
        let done: Vec<_> = rx.iter().collect();
        assert_eq!(done.len(), 64);
        assert!(done.iter().all(|(ok, _)| *ok));
        let threads: std::collections::HashSet<_> = done.iter().map(|(_, id)| *id).collect();
        assert!(threads.len() <= 2, "{} worker threads", threads.len());
        assert!(!threads.contains(&thread::current().id()));
        assert_eq!(fs::read(dir.path().join("f63")).unwrap().len(), 63);
    }

    #[test]
    fn exclusive_open_fails_on_existing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("taken"), b"x").unwrap();
        let fs = LocalFs::new(dir.path());
        let err = fs
            .call(Request::Open {
                path: "taken".into(),
                flag: OpenFlag::Wx,
                mode: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn append_file_extends() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::new(dir.path());
        for chunk in [&b"ab"[..], b"cd"] {
            fs.call(Request::AppendFile {
                path: "log".into(),
                data: chunk.to_vec(),
                options: Default::default(),
            })
            .unwrap();
        }
        assert_eq!(fs::read(dir.path().join("log")).unwrap(), b"abcd");
    }
}
