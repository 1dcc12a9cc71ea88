use std::fmt;

use serde::{Deserialize, Serialize};

use super::options::{FileOptions, OpenFlag};
use super::strings::StrId;
use crate::{Error, Result};

/// Position of an event in the trace. Descriptor-keyed operations refer to
/// the id of the event that opened the descriptor.
pub type EventId = u32;

/// Argument value standing for a null file position.
pub const NULL_OFFSET: u32 = u32::MAX;

pub fn encode_offset(position: Option<u32>) -> u32 {
    position.unwrap_or(NULL_OFFSET)
}

pub fn decode_offset(raw: u32) -> Option<u32> {
    (raw != NULL_OFFSET).then_some(raw)
}

macro_rules! event_kinds {
    ($($name:ident = $tag:literal,)*) => {
        /// Operation kind tag of a recorded event. Each filesystem primitive
        /// has an asynchronous kind and a `*Sync` kind.
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[serde(rename_all = "snake_case")]
        #[repr(u8)]
        pub enum EventKind {
            $($name = $tag,)*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$name,)*];

            pub fn from_tag(tag: u8) -> Result<Self> {
                match tag {
                    $($tag => Ok(EventKind::$name),)*
                    other => Err(Error::InvalidOperation(other)),
                }
            }
        }
    };
}

event_kinds! {
    Rename = 0,
    RenameSync = 1,
    Ftruncate = 2,
    FtruncateSync = 3,
    Truncate = 4,
    TruncateSync = 5,
    Stat = 6,
    Lstat = 7,
    StatSync = 8,
    LstatSync = 9,
    Fstat = 10,
    FstatSync = 11,
    Unlink = 12,
    UnlinkSync = 13,
    Rmdir = 14,
    RmdirSync = 15,
    Mkdir = 16,
    MkdirSync = 17,
    Readdir = 18,
    ReaddirSync = 19,
    Close = 20,
    CloseSync = 21,
    Open = 22,
    OpenSync = 23,
    Fsync = 24,
    FsyncSync = 25,
    Write = 26,
    WriteSync = 27,
    Read = 28,
    ReadSync = 29,
    ReadFile = 30,
    ReadFileSync = 31,
    WriteFile = 32,
    WriteFileSync = 33,
    AppendFile = 34,
    AppendFileSync = 35,
    Exists = 36,
    ExistsSync = 37,
}

impl EventKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn is_sync(self) -> bool {
        self.to_async() != self
    }

    /// The asynchronous counterpart of a synchronous kind. Asynchronous kinds
    /// map to themselves.
    pub fn to_async(self) -> EventKind {
        match self {
            EventKind::RenameSync => EventKind::Rename,
            EventKind::FtruncateSync => EventKind::Ftruncate,
            EventKind::TruncateSync => EventKind::Truncate,
            EventKind::StatSync => EventKind::Stat,
            EventKind::LstatSync => EventKind::Lstat,
            EventKind::FstatSync => EventKind::Fstat,
            EventKind::UnlinkSync => EventKind::Unlink,
            EventKind::RmdirSync => EventKind::Rmdir,
            EventKind::MkdirSync => EventKind::Mkdir,
            EventKind::ReaddirSync => EventKind::Readdir,
            EventKind::CloseSync => EventKind::Close,
            EventKind::OpenSync => EventKind::Open,
            EventKind::FsyncSync => EventKind::Fsync,
            EventKind::WriteSync => EventKind::Write,
            EventKind::ReadSync => EventKind::Read,
            EventKind::ReadFileSync => EventKind::ReadFile,
            EventKind::WriteFileSync => EventKind::WriteFile,
            EventKind::AppendFileSync => EventKind::AppendFile,
            EventKind::ExistsSync => EventKind::Exists,
            other => other,
        }
    }

    /// The synchronous counterpart of an asynchronous kind.
    pub fn to_sync(self) -> EventKind {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.is_sync() && kind.to_async() == self)
            .unwrap_or(self)
    }

    pub fn is_open(self) -> bool {
        matches!(self, EventKind::Open | EventKind::OpenSync)
    }

    /// Whether the event carries a data buffer of `arg2` bytes.
    pub fn carries_data(self) -> bool {
        matches!(
            self.to_async(),
            EventKind::Write | EventKind::WriteFile | EventKind::AppendFile
        )
    }
}

/// Resources an operation touches while in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Path(StrId),
    Paths(StrId, StrId),
    Descriptor(EventId),
}

/// Typed arguments of one operation, with paths already interned and
/// descriptors replaced by the id of their opening event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Stat { path: StrId },
    Lstat { path: StrId },
    Unlink { path: StrId },
    Rmdir { path: StrId },
    Readdir { path: StrId },
    Exists { path: StrId },
    Rename { from: StrId, to: StrId },
    Fstat { file: EventId },
    Close { file: EventId },
    Fsync { file: EventId },
    Ftruncate { file: EventId, len: u32 },
    Truncate { path: StrId, len: u32 },
    Mkdir { path: StrId, mode: Option<u32> },
    Open { path: StrId, flag: OpenFlag, mode: Option<u32> },
    Read { file: EventId, len: u32, position: Option<u32> },
    Write { file: EventId, len: u32, position: Option<u32> },
    ReadFile { path: StrId, options: FileOptions },
    WriteFile { path: StrId, len: u32, options: FileOptions },
    AppendFile { path: StrId, len: u32, options: FileOptions },
}

impl Op {
    /// Asynchronous event kind of this operation.
    pub fn kind(&self) -> EventKind {
        match self {
            Op::Stat { .. } => EventKind::Stat,
            Op::Lstat { .. } => EventKind::Lstat,
            Op::Unlink { .. } => EventKind::Unlink,
            Op::Rmdir { .. } => EventKind::Rmdir,
            Op::Readdir { .. } => EventKind::Readdir,
            Op::Exists { .. } => EventKind::Exists,
            Op::Rename { .. } => EventKind::Rename,
            Op::Fstat { .. } => EventKind::Fstat,
            Op::Close { .. } => EventKind::Close,
            Op::Fsync { .. } => EventKind::Fsync,
            Op::Ftruncate { .. } => EventKind::Ftruncate,
            Op::Truncate { .. } => EventKind::Truncate,
            Op::Mkdir { .. } => EventKind::Mkdir,
            Op::Open { .. } => EventKind::Open,
            Op::Read { .. } => EventKind::Read,
            Op::Write { .. } => EventKind::Write,
            Op::ReadFile { .. } => EventKind::ReadFile,
            Op::WriteFile { .. } => EventKind::WriteFile,
            Op::AppendFile { .. } => EventKind::AppendFile,
        }
    }

    pub fn target(&self) -> Target {
        match *self {
            Op::Stat { path }
            | Op::Lstat { path }
            | Op::Unlink { path }
            | Op::Rmdir { path }
            | Op::Readdir { path }
            | Op::Exists { path }
            | Op::Truncate { path, .. }
            | Op::Mkdir { path, .. }
            | Op::Open { path, .. }
            | Op::ReadFile { path, .. }
            | Op::WriteFile { path, .. }
            | Op::AppendFile { path, .. } => Target::Path(path),
            Op::Rename { from, to } if from == to => Target::Path(from),
            Op::Rename { from, to } => Target::Paths(from, to),
            Op::Fstat { file }
            | Op::Close { file }
            | Op::Fsync { file }
            | Op::Ftruncate { file, .. }
            | Op::Read { file, .. }
            | Op::Write { file, .. } => Target::Descriptor(file),
        }
    }

    /// Builds the record for this operation in the given calling convention.
    pub fn to_event(&self, sync: bool) -> Event {
        let kind = if sync {
            self.kind().to_sync()
        } else {
            self.kind()
        };
        let [arg1, arg2, arg3] = match *self {
            Op::Stat { path }
            | Op::Lstat { path }
            | Op::Unlink { path }
            | Op::Rmdir { path }
            | Op::Readdir { path }
            | Op::Exists { path } => [Some(path), None, None],
            Op::Rename { from, to } => [Some(from), Some(to), None],
            Op::Fstat { file } | Op::Close { file } | Op::Fsync { file } => {
                [Some(file), None, None]
            }
            Op::Ftruncate { file, len } => [Some(file), Some(len), None],
            Op::Truncate { path, len } => [Some(path), Some(len), None],
            Op::Mkdir { path, mode } => [Some(path), mode, None],
            Op::Open { path, flag, mode } => [Some(path), Some(u32::from(flag.code())), mode],
            Op::Read {
                file,
                len,
                position,
            }
            | Op::Write {
                file,
                len,
                position,
            } => [Some(file), Some(len), Some(encode_offset(position))],
            Op::ReadFile { path, options } => [Some(path), None, Some(options.pack())],
            Op::WriteFile { path, len, options } | Op::AppendFile { path, len, options } => {
                [Some(path), Some(len), Some(options.pack())]
            }
        };
        Event::new(kind, arg1, arg2, arg3)
    }
}

fn optional(raw: u32) -> Option<u32> {
    (raw != 0).then_some(raw)
}

/// One fixed-width trace record: a kind tag and three little-endian `u32`
/// arguments whose meaning depends on the kind.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
}

impl Event {
    pub const SIZE: usize = 13;

    /// Absent arguments are stored as zero.
    pub fn new(kind: EventKind, arg1: Option<u32>, arg2: Option<u32>, arg3: Option<u32>) -> Self {
        Self {
            kind,
            arg1: arg1.unwrap_or(0),
            arg2: arg2.unwrap_or(0),
            arg3: arg3.unwrap_or(0),
        }
    }

    pub fn encode(&self) -> [u8; Event::SIZE] {
        let mut record = [0u8; Event::SIZE];
        record[0] = self.kind.tag();
        record[1..5].copy_from_slice(&self.arg1.to_le_bytes());
        record[5..9].copy_from_slice(&self.arg2.to_le_bytes());
        record[9..13].copy_from_slice(&self.arg3.to_le_bytes());
        record
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() != Event::SIZE {
            return Err(Error::TruncatedEvents { len: record.len() });
        }
        let word = |at: usize| {
            u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
        };
        Ok(Self {
            kind: EventKind::from_tag(record[0])?,
            arg1: word(1),
            arg2: word(5),
            arg3: word(9),
        })
    }

    /// Interprets the arguments according to the kind.
    pub fn op(&self) -> Result<Op> {
        let Event {
            arg1, arg2, arg3, ..
        } = *self;
        let op = match self.kind.to_async() {
            EventKind::Stat => Op::Stat { path: arg1 },
            EventKind::Lstat => Op::Lstat { path: arg1 },
            EventKind::Unlink => Op::Unlink { path: arg1 },
            EventKind::Rmdir => Op::Rmdir { path: arg1 },
            EventKind::Readdir => Op::Readdir { path: arg1 },
            EventKind::Exists => Op::Exists { path: arg1 },
            EventKind::Rename => Op::Rename {
                from: arg1,
                to: arg2,
            },
            EventKind::Fstat => Op::Fstat { file: arg1 },
            EventKind::Close => Op::Close { file: arg1 },
            EventKind::Fsync => Op::Fsync { file: arg1 },
            EventKind::Ftruncate => Op::Ftruncate {
                file: arg1,
                len: arg2,
            },
            EventKind::Truncate => Op::Truncate {
                path: arg1,
                len: arg2,
            },
            EventKind::Mkdir => Op::Mkdir {
                path: arg1,
                mode: optional(arg2),
            },
            EventKind::Open => {
                let code = u16::try_from(arg2)
                    .map_err(|_| Error::InvalidFlag(format!("code {arg2}")))?;
                Op::Open {
                    path: arg1,
                    flag: OpenFlag::from_code(code)?,
                    mode: optional(arg3),
                }
            }
            EventKind::Read => Op::Read {
                file: arg1,
                len: arg2,
                position: decode_offset(arg3),
            },
            EventKind::Write => Op::Write {
                file: arg1,
                len: arg2,
                position: decode_offset(arg3),
            },
            EventKind::ReadFile => Op::ReadFile {
                path: arg1,
                options: FileOptions::unpack(arg3)?,
            },
            EventKind::WriteFile => Op::WriteFile {
                path: arg1,
                len: arg2,
                options: FileOptions::unpack(arg3)?,
            },
            EventKind::AppendFile => Op::AppendFile {
                path: arg1,
                len: arg2,
                options: FileOptions::unpack(arg3)?,
            },
            sync => unreachable!("{sync:?} has an asynchronous counterpart"),
        };
        Ok(op)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({}, {}, {})",
            self.kind, self.arg1, self.arg2, self.arg3
        )
    }
}

/// Encodes a record from a raw kind tag.
pub fn encode(
    tag: u8,
    arg1: Option<u32>,
    arg2: Option<u32>,
    arg3: Option<u32>,
) -> Result<[u8; Event::SIZE]> {
    let kind = EventKind::from_tag(tag)?;
    Ok(Event::new(kind, arg1, arg2, arg3).encode())
}

/// Decodes a record into its kind and raw arguments.
pub fn decode(record: &[u8]) -> Result<(EventKind, u32, u32, u32)> {
    let event = Event::decode(record)?;
    Ok((event.kind, event.arg1, event.arg2, event.arg3))
}
