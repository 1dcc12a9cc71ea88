//! fs-rr: record and concurrent replay of filesystem operation traces
//!
//! A [`Recorder`] wraps a storage [`Backend`] and logs every call an
//! application makes into a compact [`Trace`]. A [`Replayer`] later issues the
//! same calls against any backend, overlapping operations on unrelated paths
//! while keeping operations on the same path in recorded order.

pub mod backend;
pub mod cli;
mod error;
pub mod playback;
pub mod recorder;
pub mod trace;
pub mod util;

pub use backend::{Backend, Completion, Fd, LocalFs, Request, Response};
pub use error::{Error, ReplayError, Result};
pub use playback::{replay, ReplayConfig, ReplayReport, Replayer, Summary};
pub use recorder::Recorder;
pub use trace::{Event, EventKind, Trace};
