use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::bail;

use super::event::{Event, EventId};
use super::strings::StringTable;
use crate::{Error, Result};

/// Representations a trace can be converted between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// The binary `_events.dat` / `_stringpool.dat` pair, named by prefix.
    Trace,
    Json,
    Cbor,
}

impl TraceFormat {
    pub fn from_path_and_option(path: &Path, format_opt: Option<&str>) -> anyhow::Result<Self> {
        if let Some(format_str) = format_opt {
            return match format_str {
                "trace" => Ok(TraceFormat::Trace),
                "json" => Ok(TraceFormat::Json),
                "cbor" => Ok(TraceFormat::Cbor),
                _ => bail!("unsupported format: {}", format_str),
            };
        }

        // Infer from file extension; a bare prefix names a binary trace
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Ok(TraceFormat::Json),
            Some("cbor") => Ok(TraceFormat::Cbor),
            Some(ext) => bail!("unsupported file extension: .{}", ext),
            None => Ok(TraceFormat::Trace),
        }
    }
}

/// File names of the artifacts of trace `X`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePaths {
    pub events: PathBuf,
    pub strings: PathBuf,
    pub payload: PathBuf,
}

impl TracePaths {
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        let name = prefix
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            events: prefix.with_file_name(format!("{name}_events.dat")),
            strings: prefix.with_file_name(format!("{name}_stringpool.dat")),
            payload: prefix.with_file_name(format!("{name}_payload.dat")),
        }
    }
}

#[derive(Debug, Clone)]
struct Payload {
    bytes: Vec<u8>,
    offsets: HashMap<EventId, u64>,
}

/// A fully loaded trace: string table, decoded events and, when captured,
/// the data written by each data-carrying event.
#[derive(Debug, Clone)]
pub struct Trace {
    strings: StringTable,
    events: Vec<Event>,
    payload: Option<Payload>,
}

impl Trace {
    pub fn new(strings: StringTable, events: Vec<Event>, payload: Option<Vec<u8>>) -> Result<Self> {
        let payload = payload
            .map(|bytes| index_payload(&events, bytes))
            .transpose()?;
        Ok(Self {
            strings,
            events,
            payload,
        })
    }

    pub fn from_bytes(events: &[u8], strings: &[u8], payload: Option<Vec<u8>>) -> Result<Self> {
        if events.len() % Event::SIZE != 0 {
            return Err(Error::TruncatedEvents { len: events.len() });
        }
        let events = events
            .chunks_exact(Event::SIZE)
            .map(Event::decode)
            .collect::<Result<Vec<_>>>()?;
        Trace::new(StringTable::deserialize(strings)?, events, payload)
    }

    /// Reads the pair named by `prefix`, plus the payload artifact if one
    /// exists next to it.
    pub fn load(prefix: impl AsRef<Path>) -> Result<Self> {
        let paths = TracePaths::new(prefix);
        let events = fs::read(&paths.events)?;
        let strings = fs::read(&paths.strings)?;
        let payload = match fs::read(&paths.payload) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Trace::from_bytes(&events, &strings, payload)
    }

    /// Writes every artifact and returns once each file is synced to disk.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let paths = TracePaths::new(prefix);
        write_synced(&paths.events, &self.event_bytes())?;
        write_synced(&paths.strings, self.strings.as_bytes())?;
        if let Some(payload) = &self.payload {
            write_synced(&paths.payload, &payload.bytes)?;
        }
        Ok(())
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(id as usize)
    }

    pub fn len(&self) -> u32 {
        self.events.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Captured data of a write-like event, if a payload was recorded.
    pub fn payload(&self, id: EventId) -> Option<&[u8]> {
        let payload = self.payload.as_ref()?;
        let start = *payload.offsets.get(&id)? as usize;
        let len = self.event(id)?.arg2 as usize;
        payload.bytes.get(start..start + len)
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|payload| payload.bytes.as_slice())
    }

    pub fn event_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.events.len() * Event::SIZE);
        for event in &self.events {
            bytes.extend_from_slice(&event.encode());
        }
        bytes
    }
}

fn index_payload(events: &[Event], bytes: Vec<u8>) -> Result<Payload> {
    let mut offsets = HashMap::new();
    let mut offset = 0u64;
    for (index, event) in events.iter().enumerate() {
        if !event.kind.carries_data() {
            continue;
        }
        let index = index as EventId;
        if offset + u64::from(event.arg2) > bytes.len() as u64 {
            return Err(Error::TruncatedPayload {
                index,
                offset,
                needed: event.arg2,
            });
        }
        offsets.insert(index, offset);
        offset += u64::from(event.arg2);
    }
    Ok(Payload { bytes, offsets })
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
