//! File edges of the pipeline: vendor exports in, stage files and findings
//! out. A path of `-` means stdin/stdout.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::ports::{FindingSink, RecordSink};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::parser::RawRow;
use crate::pipeline::processing::validate::ValidationWarning;

pub const STDIO_PATH: &str = "-";

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO_PATH
}

pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    if is_stdio(path) {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).map_err(|e| {
        PipelineError::Io(io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
    })?;
    Ok(Box::new(BufReader::new(file)))
}

/// Opens `path` for writing, or stdout when absent or `-`
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) if !is_stdio(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            info!(path = %path.display(), "Writing output file");
            Ok(Box::new(BufWriter::new(File::create(path)?)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Headerless positional rows from a vendor export. Every physical record is
/// yielded, header rows included; invalid UTF-8 is replaced rather than
/// rejected. A reader error is yielded once and ends the file.
pub struct RawRowReader {
    name: String,
    records: csv::ByteRecordsIntoIter<Box<dyn Read + Send>>,
    failed: bool,
}

impl RawRowReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_reader(path.display().to_string(), open_input(path)?))
    }

    pub fn from_reader(name: impl Into<String>, reader: Box<dyn Read + Send>) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_byte_records();
        Self {
            name: name.into(),
            records,
            failed: false,
        }
    }
}

impl Iterator for RawRowReader {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Result<RawRow>> {
        if self.failed {
            return None;
        }
        match self.records.next()? {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                let fields = record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect();
                Some(Ok(RawRow::new(line, fields)))
            }
            Err(e) => {
                // A reader error leaves the stream position unknown
                error!(file = %self.name, error = %e, "Stopping read of vendor file");
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Typed records from a stage file written by [`CsvSink`]
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<impl Iterator<Item = Result<T>>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_input(path)?);
    Ok(reader
        .into_deserialize::<T>()
        .map(|item| item.map_err(PipelineError::from)))
}

/// Stage-file writer with a header row taken from the record's field names.
/// A file target is written as a `.partial` sibling that `finish` renames
/// into place; dropped unfinished, the partial file is removed.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    written: usize,
    staged: Option<Staged>,
}

struct Staged {
    partial: PathBuf,
    target: PathBuf,
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

impl CsvSink<Box<dyn Write + Send>> {
    pub fn create(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if !is_stdio(path) => {
                let partial = partial_path(path);
                let mut sink = Self::new(open_output(Some(&partial))?);
                sink.staged = Some(Staged {
                    partial,
                    target: path.to_path_buf(),
                });
                Ok(sink)
            }
            _ => Ok(Self::new(open_output(None)?)),
        }
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            written: 0,
            staged: None,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl<T: Serialize, W: Write + Send> RecordSink<T> for CsvSink<W> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        self.writer.serialize(record)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        if let Some(staged) = self.staged.take() {
            std::fs::rename(&staged.partial, &staged.target)?;
            info!(path = %staged.target.display(), records = self.written, "Output file complete");
        }
        Ok(())
    }
}

impl<W: Write> Drop for CsvSink<W> {
    fn drop(&mut self) {
        if let Some(staged) = self.staged.take() {
            warn!(path = %staged.target.display(), "Discarding unfinished output");
            if let Err(e) = std::fs::remove_file(&staged.partial) {
                warn!(path = %staged.partial.display(), error = %e, "Could not remove partial output");
            }
        }
    }
}

/// One JSON object per finding
pub struct NdjsonFindingSink<W: Write> {
    writer: W,
}

impl NdjsonFindingSink<Box<dyn Write + Send>> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(open_output(Some(path))?))
    }
}

impl<W: Write> NdjsonFindingSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FindingSink for NdjsonFindingSink<W> {
    fn write_finding(&mut self, finding: &ValidationWarning) -> Result<()> {
        serde_json::to_writer(&mut self.writer, finding)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Drops findings; used when no report file is requested
#[derive(Debug, Default)]
pub struct DiscardFindings;

impl FindingSink for DiscardFindings {
    fn write_finding(&mut self, _finding: &ValidationWarning) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::trip;
    use crate::domain::TripRecord;
    use crate::pipeline::processing::validate::{Severity, WarningKind};
    use std::io::Cursor;

    #[test]
    fn test_raw_rows_keep_line_numbers_and_ragged_rows() {
        let text: &[u8] = b"a,b,c\n\nd,e\n\"f,g\",h,\xffi\n";
        let rows: Vec<RawRow> = RawRowReader::from_reader("inline", Box::new(Cursor::new(text.to_vec())))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].fields, vec!["a", "b", "c"]);
        assert_eq!(rows[1].line, 3);
        assert_eq!(rows[1].fields.len(), 2);
        assert_eq!(rows[2].fields[0], "f,g");
        assert_eq!(rows[2].fields[2], "\u{fffd}i");
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"))
        }
    }

    #[test]
    fn test_read_error_is_yielded_once() {
        let input = Cursor::new(b"a,b\n".to_vec()).chain(BrokenPipe);
        let mut reader = RawRowReader::from_reader("inline", Box::new(input));

        assert_eq!(reader.next().unwrap().unwrap().fields, vec!["a", "b"]);
        assert!(matches!(reader.next(), Some(Err(PipelineError::Csv(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unfinished_output_never_reaches_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anonymized.csv");

        let mut sink = CsvSink::create(Some(&path)).unwrap();
        RecordSink::<TripRecord>::write_record(&mut sink, &trip("1001", "M1", "C1")).unwrap();
        drop(sink);

        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_stage_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage").join("normalized.csv");

        let mut sink = CsvSink::create(Some(&path)).unwrap();
        let mut second = trip("1002", "M2", "C2");
        second.trip_length = None;
        second.pickup_lat = None;
        RecordSink::<TripRecord>::write_record(&mut sink, &trip("1001", "M1", "C1")).unwrap();
        RecordSink::<TripRecord>::write_record(&mut sink, &second).unwrap();
        RecordSink::<TripRecord>::finish(&mut sink).unwrap();
        assert_eq!(sink.written(), 2);
        drop(sink);

        let read: Vec<TripRecord> = read_records(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(read, vec![trip("1001", "M1", "C1"), second]);
    }

    #[test]
    fn test_unreadable_stage_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "trip_no,fare\n1,abc\n").unwrap();

        let first = read_records::<TripRecord>(&path).unwrap().next().unwrap();
        assert!(matches!(first, Err(PipelineError::Csv(_))));
    }

    #[test]
    fn test_findings_are_one_json_object_per_line() {
        let mut sink = NdjsonFindingSink::new(Vec::new());
        let finding = ValidationWarning {
            key: Some("1001".to_string()),
            kind: WarningKind::MeterOrder,
            severity: Severity::Error,
            field: Some("meter_off_datetime".to_string()),
            message: "meter off before meter on".to_string(),
        };
        sink.write_finding(&finding).unwrap();
        sink.write_finding(&finding).unwrap();
        sink.finish().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ValidationWarning = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, finding);
    }
}
