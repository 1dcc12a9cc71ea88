use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::event::Event;
use super::format::{Trace, TraceFormat};
use super::strings::StringTable;
use crate::util::cbor::is_cbor_eof;
use crate::Error;

/// Readable form of a trace. Strings are listed in id order, so interning
/// them again reproduces the original pool offsets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TraceListing {
    pub strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl TraceListing {
    pub fn from_trace(trace: &Trace) -> Self {
        Self {
            strings: trace.strings().iter().map(str::to_owned).collect(),
            payload: trace.payload_bytes().map(<[u8]>::to_vec),
            events: trace.events().to_vec(),
        }
    }

    pub fn into_trace(self) -> crate::Result<Trace> {
        // A repeated entry would shift every later offset.
        let mut strings = StringTable::new();
        for s in &self.strings {
            if strings.get(s).is_some() {
                return Err(Error::CorruptStringPool {
                    offset: strings.as_bytes().len(),
                });
            }
            strings.intern(s);
        }
        Trace::new(strings, self.events, self.payload)
    }
}

/// Header item of a CBOR listing; the events follow as one item each.
#[derive(Serialize, Deserialize)]
struct CborHeader {
    strings: Vec<String>,
    payload: Option<Vec<u8>>,
}

pub fn read_trace(input: &Path, format: TraceFormat) -> Result<Trace> {
    let listing = match format {
        TraceFormat::Trace => {
            return Trace::load(input)
                .with_context(|| format!("failed to load trace {}", input.display()));
        }
        TraceFormat::Json => serde_json::from_reader(open(input)?)
            .with_context(|| format!("failed to parse JSON trace file at {}", input.display()))?,
        TraceFormat::Cbor => read_cbor(open(input)?)
            .with_context(|| format!("failed to parse CBOR trace file at {}", input.display()))?,
    };
    listing
        .into_trace()
        .with_context(|| format!("invalid trace listing in {}", input.display()))
}

fn open(input: &Path) -> Result<BufReader<File>> {
    let input_file = File::open(input)
        .with_context(|| format!("failed to open input trace file at {}", input.display()))?;
    Ok(BufReader::new(input_file))
}

fn read_cbor(mut reader: impl Read) -> Result<TraceListing> {
    let CborHeader { strings, payload } =
        ciborium::from_reader(&mut reader).map_err(|e| anyhow!("{e}"))?;
    let mut events = Vec::new();
    loop {
        match ciborium::from_reader::<Event, _>(&mut reader) {
            Ok(event) => events.push(event),
            Err(e) if is_cbor_eof(&e) => break,
            Err(e) => return Err(anyhow!("{e}")),
        }
    }
    Ok(TraceListing {
        strings,
        payload,
        events,
    })
}

pub fn write_trace(trace: &Trace, output: &Path, format: TraceFormat) -> Result<()> {
    match format {
        TraceFormat::Trace => {
            trace
                .save(output)
                .with_context(|| format!("failed to save trace {}", output.display()))?;
        }
        TraceFormat::Json => {
            serde_json::to_writer_pretty(create(output)?, &TraceListing::from_trace(trace))
                .with_context(|| {
                    format!("failed to write JSON trace file at {}", output.display())
                })?;
        }
        TraceFormat::Cbor => {
            let mut writer = BufWriter::new(create(output)?);
            let header = CborHeader {
                strings: trace.strings().iter().map(str::to_owned).collect(),
                payload: trace.payload_bytes().map(<[u8]>::to_vec),
            };
            ciborium::into_writer(&header, &mut writer).with_context(|| {
                format!("failed to write CBOR trace file at {}", output.display())
            })?;
            for event in trace.events() {
                ciborium::into_writer(event, &mut writer).with_context(|| {
                    format!("failed to write CBOR trace file at {}", output.display())
                })?;
            }
            writer.flush().with_context(|| {
                format!("failed to flush CBOR trace file at {}", output.display())
            })?;
        }
    }

    Ok(())
}

fn create(output: &Path) -> Result<File> {
    File::create(output)
        .with_context(|| format!("failed to create output trace file at {}", output.display()))
}

pub fn convert(
    input: &Path,
    output: &Path,
    input_format: TraceFormat,
    output_format: TraceFormat,
) -> Result<()> {
    let trace = read_trace(input, input_format)?;
    write_trace(&trace, output, output_format)
}
