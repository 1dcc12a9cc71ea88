//! On-disk trace model: string pool, fixed-width event records and the
//! conversions between them and readable listings.

mod convert;
mod event;
mod format;
mod options;
mod strings;

pub use convert::{convert, read_trace, write_trace, TraceListing};
pub use event::{
    decode, decode_offset, encode, encode_offset, Event, EventId, EventKind, Op, Target,
    NULL_OFFSET,
};
pub use format::{Trace, TraceFormat, TracePaths};
pub use options::{Encoding, FileOptions, OpenFlag};
pub use strings::{StrId, StringTable};
