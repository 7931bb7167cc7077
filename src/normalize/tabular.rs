use std::borrow::Cow;
use std::path::Path;

use tracing::debug;

use super::NormalizeError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// An in-memory header row plus data rows from one delimited source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularSource {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularSource {
    pub fn from_rows(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Read a CSV export, trying UTF-8 with BOM, plain UTF-8, then Latin-1.
    pub fn read(path: &Path) -> Result<Self, NormalizeError> {
        let bytes = std::fs::read(path).map_err(|source| NormalizeError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let text = decode_text(&bytes);
        if matches!(text, Cow::Owned(_)) {
            debug!(path = %path.display(), "Source is not UTF-8; decoded as Latin-1");
        }
        Self::parse(name, &text).map_err(|source| NormalizeError::Csv {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse delimited text whose first record is the header row.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self::from_rows(name, headers, rows))
    }

    /// Index of the first header equal to one of `names`, case-insensitively.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        })
    }
}

/// Cell text, or empty when a short row lacks the column.
pub(crate) fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&byte| char::from(byte)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bom_is_stripped_from_first_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, b"\xEF\xBB\xBFuser_id,profile_image\n3,a.jpg\n").unwrap();
        let source = TabularSource::read(&path).unwrap();
        assert_eq!(source.name, "a.csv");
        assert_eq!(source.headers, vec!["user_id", "profile_image"]);
        assert_eq!(source.rows, vec![vec!["3".to_string(), "a.jpg".to_string()]]);
    }

    #[test]
    fn latin1_bytes_decode_instead_of_failing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.csv");
        std::fs::write(&path, b"id,profile_image\n4,caf\xE9.jpg\n").unwrap();
        let source = TabularSource::read(&path).unwrap();
        assert_eq!(source.rows[0][1], "caf\u{e9}.jpg");
    }

    #[test]
    fn quoted_multi_value_cells_and_short_rows() {
        let source =
            TabularSource::parse("c.csv", "id,additional\n5,\"a.jpg, b.jpg\"\n6\n").unwrap();
        assert_eq!(cell(&source.rows[0], 1), "a.jpg, b.jpg");
        assert_eq!(cell(&source.rows[1], 1), "");
        assert_eq!(source.column(&["missing", "ADDITIONAL"]), Some(1));
    }

    #[test]
    fn unreadable_source_reports_path() {
        let dir = tempdir().unwrap();
        let err = TabularSource::read(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, NormalizeError::SourceRead { .. }));
    }
}
