//! CLI command implementations.

pub mod echo;
pub mod inspect;
pub mod offline;
pub mod takeover;

use clap::ValueEnum;
use dayflow_remote::MemoryRemote;
use dayflow_testkit::{DeviceBuilder, TestDevice};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// How reports are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// One JSON document.
    Json,
}

/// Prints a report in the requested format.
pub fn print<R>(report: &R, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>>
where
    R: Serialize + fmt::Display,
{
    match format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

/// Builds a device, file-backed under `root/<name>` when a root is given.
pub fn device(
    remote: &MemoryRemote,
    name: &str,
    root: Option<&Path>,
) -> Result<TestDevice, Box<dyn std::error::Error>> {
    let builder = DeviceBuilder::new(remote, name);
    let builder = match root {
        Some(root) => builder.with_files(root.join(name)),
        None => builder,
    };
    Ok(builder.build()?)
}
