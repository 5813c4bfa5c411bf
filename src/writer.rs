use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use serde::Serialize;

use crate::{LapsyncError, telemetry::Lap};

/// Writes one JSON document per line and returns how many were written.
pub fn write_jsonl<'a, T: Serialize + 'a>(
    file: &Path,
    items: impl IntoIterator<Item = &'a T>,
) -> Result<usize, LapsyncError> {
    let output_file = File::create(file).map_err(|e| LapsyncError::WriterError { source: e })?;
    let mut output_writer = BufWriter::new(output_file);
    let mut written = 0;
    for item in items {
        let line = serde_json::to_string(item)
            .map_err(|e| LapsyncError::OutputSerializeError { source: e })?;
        writeln!(output_writer, "{}", line)
            .map_err(|e| LapsyncError::WriterError { source: e })?;
        written += 1;
    }
    output_writer
        .flush()
        .map_err(|e| LapsyncError::WriterError { source: e })?;
    Ok(written)
}

/// Exports normalized laps as ingestion samples, so the output can be fed
/// back into the loader. Returns the number of samples written.
pub fn write_laps<'a>(
    file: &Path,
    laps: impl IntoIterator<Item = &'a Lap>,
) -> Result<usize, LapsyncError> {
    let samples: Vec<_> = laps.into_iter().flat_map(Lap::to_raw).collect();
    let written = write_jsonl(file, &samples)?;
    info!("Exported {} samples to {:?}", written, file);
    Ok(written)
}
