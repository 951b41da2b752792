//! Result exporters and output destinations
//!
//! A destination is never overwritten: it must not exist when the run starts
//! and is opened with create-new semantics when the result is written.

pub mod json;
pub mod sql;

pub use json::JsonExporter;
pub use sql::SqlScriptExporter;

use crate::config::ExportFormat;
use crate::error::ExportError;
use crate::extract::ExtractionResult;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Renders an extraction result into a byte stream
pub trait ResultExporter {
    fn format(&self) -> ExportFormat;

    fn export(&self, result: &ExtractionResult, out: &mut dyn Write) -> Result<(), ExportError>;
}

/// Exporter for an output format
pub fn exporter_for(format: ExportFormat) -> Box<dyn ResultExporter> {
    match format {
        ExportFormat::Sql => Box::new(SqlScriptExporter),
        ExportFormat::Json => Box::new(JsonExporter),
    }
}

/// An output path that did not exist when it was checked
#[derive(Debug, Clone)]
pub struct Destination {
    path: PathBuf,
}

impl Destination {
    /// Fail fast when `path` already exists
    pub fn check(path: impl Into<PathBuf>) -> Result<Self, ExportError> {
        let path = path.into();
        if path.exists() {
            return Err(ExportError::DestinationExists(path.display().to_string()));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the destination, refusing to replace a file created in the meantime
    pub fn create(&self) -> Result<BufWriter<File>, ExportError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    ExportError::DestinationExists(self.path.display().to_string())
                }
                _ => self.write_failed(e),
            })?;
        Ok(BufWriter::new(file))
    }

    /// Render `result` with `exporter` into the destination
    pub fn write(&self, result: &ExtractionResult, exporter: &dyn ResultExporter) -> Result<(), ExportError> {
        let mut out = self.create()?;
        exporter.export(result, &mut out).map_err(|e| match e {
            ExportError::Io(io) => self.write_failed(io),
            other => other,
        })?;
        out.flush().map_err(|e| self.write_failed(e))?;

        tracing::info!("Wrote {:?} output to {}", exporter.format(), self.path.display());
        Ok(())
    }

    fn write_failed(&self, e: std::io::Error) -> ExportError {
        ExportError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}
