use crate::core::models::sequence::FastaRecord;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

const LINE_WIDTH: usize = 80;

#[derive(Debug, Error)]
pub enum FastaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Sequence data on line {line} appears before any '>' header")]
    MissingHeader { line: usize },
    #[error("No FASTA records found")]
    Empty,
}

/// Parses FASTA records from a buffered reader.
///
/// Headers are trimmed, sequence lines are uppercased and concatenated, and blank lines are
/// skipped.
///
/// # Errors
///
/// Returns [`FastaError::MissingHeader`] if sequence data precedes the first header.
pub fn read_fasta_from(reader: &mut impl BufRead) -> Result<Vec<FastaRecord>, FastaError> {
    let mut records = Vec::new();
    let mut current: Option<FastaRecord> = None;

    for (line_num, line_res) in reader.lines().enumerate() {
        let line = line_res?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('>') {
            if let Some(record) = current.take() {
                records.push(record);
            }
            current = Some(FastaRecord::new(header.trim(), String::new()));
        } else {
            match current.as_mut() {
                Some(record) => record.sequence.push_str(&line.to_ascii_uppercase()),
                None => return Err(FastaError::MissingHeader { line: line_num + 1 }),
            }
        }
    }

    if let Some(record) = current {
        records.push(record);
    }
    Ok(records)
}

/// Reads all FASTA records from `path`.
pub fn read_fasta(path: &Path) -> Result<Vec<FastaRecord>, FastaError> {
    let file = File::open(path)?;
    read_fasta_from(&mut BufReader::new(file))
}

/// Reads the first record of a FASTA file, which must contain a non-empty sequence.
///
/// # Errors
///
/// Returns [`FastaError::Empty`] if the file has no records or the first record has no
/// sequence.
pub fn read_query(path: &Path) -> Result<FastaRecord, FastaError> {
    read_fasta(path)?
        .into_iter()
        .next()
        .filter(|record| !record.is_empty())
        .ok_or(FastaError::Empty)
}

/// Writes records to `path`, wrapping sequences at 80 columns and creating parent
/// directories as needed.
pub fn write_fasta(records: &[FastaRecord], path: &Path) -> Result<(), FastaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        writeln!(writer, ">{}", record.header)?;
        for chunk in record.sequence.as_bytes().chunks(LINE_WIDTH) {
            writer.write_all(chunk)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn parses_multiline_records_and_uppercases() {
        let data = ">q1 test rna\nacgu\nGGCC\n\n>q2\nuuu\n";
        let records = read_fasta_from(&mut Cursor::new(data)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id(), "q1");
        assert_eq!(records[0].header, "q1 test rna");
        assert_eq!(records[0].sequence, "ACGUGGCC");
        assert_eq!(records[1].sequence, "UUU");
    }

    #[test]
    fn sequence_before_header_is_an_error() {
        let err = read_fasta_from(&mut Cursor::new("ACGU\n>q\nACGU\n")).unwrap_err();
        assert!(matches!(err, FastaError::MissingHeader { line: 1 }));
    }

    #[test]
    fn read_query_rejects_empty_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.fasta");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(read_query(&path), Err(FastaError::Empty)));

        fs::write(&path, ">header only\n").unwrap();
        assert!(matches!(read_query(&path), Err(FastaError::Empty)));
    }

    #[test]
    fn read_query_on_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = read_query(&dir.path().join("missing.fa")).unwrap_err();
        assert!(matches!(err, FastaError::Io(_)));
    }

    #[test]
    fn write_then_read_wraps_long_sequences() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.fasta");
        let record = FastaRecord::new("long", "A".repeat(170));
        write_fasta(std::slice::from_ref(&record), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].len(), 80);
        assert_eq!(lines[3].len(), 10);
        assert_eq!(read_query(&path).unwrap(), record);
    }
}
