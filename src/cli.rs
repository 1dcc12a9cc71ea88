use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Record and concurrently replay filesystem operation traces
#[derive(Parser, Debug)]
#[command(name = "fs-rr", author, version, about, propagate_version = true)]
pub struct Cli {
    /// Log every dispatch and completion (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a recorded trace against a directory
    Replay {
        /// Trace prefix X, naming X_events.dat and X_stringpool.dat
        trace: PathBuf,
        /// Directory the recorded paths resolve under
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Number of times to replay the trace
        #[arg(short = 'n', long, value_name = "N", default_value_t = 1)]
        repeat: usize,
        /// Issue every operation through the asynchronous calling convention
        #[arg(long = "async")]
        force_async: bool,
        /// Write the per-run reports to this file as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Convert a trace between the binary pair and JSON or CBOR listings
    Convert {
        /// Input trace (a bare prefix names a binary trace)
        input: PathBuf,
        /// Output trace (extension determines format: .json or .cbor)
        output: PathBuf,
        /// Input format (trace, json or cbor). If not specified, inferred from file extension
        #[arg(
            long = "input-format",
            value_name = "FORMAT",
            value_parser = ["trace", "json", "cbor"]
        )]
        input_format: Option<String>,
        /// Output format (trace, json or cbor). If not specified, inferred from file extension
        #[arg(
            long = "output-format",
            value_name = "FORMAT",
            value_parser = ["trace", "json", "cbor"]
        )]
        output_format: Option<String>,
    },
    /// Print every string of a string-pool file, one per line
    Strings {
        /// Path to an X_stringpool.dat file
        pool: PathBuf,
    },
}
