//! Reads delimited text into a [`Table`] and writes a table back out.
//!
//! Format is chosen from the extension: `.csv` is comma separated, `.tsv` is
//! tab separated, anything else becomes one `text` column per line unless a
//! tab shows up near the start, in which case it is read as TSV. Delimited
//! files go through the `csv` reader, so quoted fields may hold delimiters,
//! quotes and newlines.
//!
//! Loading calls `poll` every [`POLL_EVERY`] records with bytes read so far
//! and the file size; returning false stops the load with
//! [`LoadError::Cancelled`].

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use log::debug;

use super::Table;

pub const POLL_EVERY: usize = 1000;

#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Csv(csv::Error),
    Cancelled,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "{e}"),
            LoadError::Csv(e) => write!(f, "{e}"),
            LoadError::Cancelled => write!(f, "load cancelled"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<csv::Error> for LoadError {
    fn from(e: csv::Error) -> Self {
        LoadError::Csv(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Tsv,
    Text,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("csv") => Format::Csv,
            Some("tsv") | Some("tab") => Format::Tsv,
            _ => Format::Text,
        }
    }

    fn delimiter(self) -> u8 {
        match self {
            Format::Csv => b',',
            _ => b'\t',
        }
    }
}

/// True when the first line holds a tab within its first 32 bytes.
fn starts_tab_separated(reader: &mut impl BufRead) -> io::Result<bool> {
    let buf = reader.fill_buf()?;
    Ok(buf
        .iter()
        .take_while(|b| **b != b'\n')
        .take(32)
        .any(|b| *b == b'\t'))
}

fn read_delimited(
    reader: impl Read,
    delimiter: u8,
    total: u64,
    poll: &mut impl FnMut(u64, u64) -> bool,
) -> Result<Vec<Vec<String>>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        if records.len() % POLL_EVERY == 0 && !poll(reader.position().byte().min(total), total) {
            return Err(LoadError::Cancelled);
        }
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(records)
}

fn read_lines(
    reader: impl BufRead,
    total: u64,
    poll: &mut impl FnMut(u64, u64) -> bool,
) -> Result<Vec<Vec<String>>, LoadError> {
    let mut records = Vec::new();
    let mut bytes = 0u64;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        bytes += line.len() as u64 + 1;
        if n % POLL_EVERY == 0 && !poll(bytes.min(total), total) {
            return Err(LoadError::Cancelled);
        }
        let line = line.strip_suffix('\r').unwrap_or(&line);
        records.push(vec![line.to_string()]);
    }
    Ok(records)
}

pub fn load(
    path: &Path,
    header: bool,
    mut poll: impl FnMut(u64, u64) -> bool,
) -> Result<Table, LoadError> {
    let file = File::open(path)?;
    let total = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::new(file);

    let format = match Format::from_path(path) {
        Format::Text if starts_tab_separated(&mut reader)? => Format::Tsv,
        format => format,
    };
    let mut records = match format {
        Format::Text => read_lines(reader, total, &mut poll)?,
        _ => read_delimited(reader, format.delimiter(), total, &mut poll)?,
    };
    poll(total, total);

    let columns = match format {
        Format::Text => vec!["text".to_string()],
        _ if header && !records.is_empty() => records.remove(0),
        _ => {
            let width = records.iter().map(Vec::len).max().unwrap_or(0);
            (0..width).map(|i| format!("{}", i + 1)).collect()
        }
    };
    debug!(
        "Loaded {:?} as {:?}: {} columns, {} rows",
        path,
        format,
        columns.len(),
        records.len()
    );
    Ok(Table::new(columns, records))
}

/// Header record (when any column is named) then one record per row.
pub fn write_delimited(table: &Table, delimiter: u8, out: impl Write) -> Result<(), LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(out);
    if table.columns.iter().any(|c| !c.trim().is_empty()) {
        writer.write_record(&table.columns)?;
    }
    for row in &table.rows {
        writer.write_record(&row.cells)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn to_tsv(table: &Table) -> Result<String, LoadError> {
    let mut out = Vec::new();
    write_delimited(table, b'\t', &mut out)?;
    String::from_utf8(out).map_err(|e| LoadError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Writes `table` to `path`: comma separated for `.csv`, tab separated
/// otherwise. Goes through a temp file and a rename.
pub fn save(table: &Table, path: &Path) -> Result<(), LoadError> {
    let tmp = path.with_extension("sheetdeck-tmp");
    let file = File::create(&tmp)?;
    write_delimited(table, Format::from_path(path).delimiter(), io::BufWriter::new(file))?;
    fs::rename(&tmp, path)?;
    debug!("Saved {} rows to {:?}", table.rows.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(ext: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("sheetdeck-{}.{}", uuid::Uuid::new_v4(), ext));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_csv_with_header() {
        let path = temp_file("csv", "name,n\nx,2\n\"y,z\",1\n\"say \"\"hi\"\"\",3\n");
        let table = load(&path, true, |_, _| true).unwrap();
        assert_eq!(table.columns, vec!["name", "n"]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[1].cell(0), "y,z");
        assert_eq!(table.rows[2].cell(0), r#"say "hi""#);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_quoted_newline_stays_in_one_row() {
        let path = temp_file("csv", "name,note\n\"a\",\"line1\nline2\"\nb,plain\n");
        let table = load(&path, true, |_, _| true).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells, vec!["a", "line1\nline2"]);
        assert_eq!(table.rows[1].cells, vec!["b", "plain"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_tsv_without_header_numbers_columns() {
        let path = temp_file("tsv", "a\tb\nc\td\te\n");
        let table = load(&path, false, |_, _| true).unwrap();
        assert_eq!(table.columns, vec!["1", "2", "3"]);
        assert_eq!(table.rows.len(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_txt_with_tabs_is_tsv() {
        let path = temp_file("txt", "k\tv\n1\t2\n");
        let table = load(&path, true, |_, _| true).unwrap();
        assert_eq!(table.columns, vec!["k", "v"]);
        assert_eq!(table.rows[0].cells, vec!["1", "2"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_plain_text_one_column() {
        let path = temp_file("log", "first line\nsecond\n");
        let table = load(&path, true, |_, _| true).unwrap();
        assert_eq!(table.columns, vec!["text"]);
        assert_eq!(table.rows.len(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_poll_false_cancels() {
        let path = temp_file("csv", "a,b\n1,2\n");
        assert!(matches!(load(&path, true, |_, _| false), Err(LoadError::Cancelled)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("sheetdeck-does-not-exist.csv");
        assert!(matches!(load(&path, true, |_, _| true), Err(LoadError::Io(_))));
    }

    #[test]
    fn test_to_tsv() {
        let table = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec!["1".into(), "2".into()]],
        );
        assert_eq!(to_tsv(&table).unwrap(), "a\tb\n1\t2\n");
    }

    #[test]
    fn test_tab_in_cell_survives_save_and_reload() {
        let table = Table::new(
            vec!["k".into(), "v".into()],
            vec![vec!["x\ty".into(), "z".into()]],
        );
        let path = std::env::temp_dir().join(format!("sheetdeck-{}.tsv", uuid::Uuid::new_v4()));
        fs::write(&path, to_tsv(&table).unwrap()).unwrap();
        let reloaded = load(&path, true, |_, _| true).unwrap();
        assert_eq!(reloaded.columns, vec!["k", "v"]);
        assert_eq!(reloaded.rows[0].cells, vec!["x\ty", "z"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_save_csv_round_trips() {
        let table = Table::new(
            vec!["name".into()],
            vec![vec!["a,b".into()], vec!["two\nlines".into()]],
        );
        let path = std::env::temp_dir().join(format!("sheetdeck-{}.csv", uuid::Uuid::new_v4()));
        save(&table, &path).unwrap();
        let reloaded = load(&path, true, |_, _| true).unwrap();
        assert_eq!(reloaded.rows.len(), 2);
        assert_eq!(reloaded.rows[0].cell(0), "a,b");
        assert_eq!(reloaded.rows[1].cell(0), "two\nlines");
        let _ = fs::remove_file(&path);
    }
}
