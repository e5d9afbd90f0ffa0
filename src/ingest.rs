//! # Row Ingestion
//!
//! Reads disbursement rows from files. Accepts a JSON array of rows or JSON
//! Lines (one row object per line).

use crate::error::ValidationError;
use crate::models::DisburseRow;
use std::fs;
use std::path::Path;
use tracing::debug;

/// How [`read_source`] splits file contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Whole file as one string
    #[default]
    Single,
    /// Whole file as one string with every newline removed
    SingleCollapsed,
    /// One string per line
    Multiline,
}

pub fn read_source(path: &Path, mode: ReadMode) -> Result<Vec<String>, ValidationError> {
    let text = fs::read_to_string(path).map_err(|e| {
        ValidationError::MalformedInput(format!("failed to read {}: {e}", path.display()))
    })?;

    Ok(match mode {
        ReadMode::Single => vec![text],
        ReadMode::SingleCollapsed => vec![text.replace('\n', "")],
        ReadMode::Multiline => text.split('\n').map(str::to_string).collect(),
    })
}

/// Parse a JSON array of rows
pub fn parse_rows(text: &str) -> Result<Vec<DisburseRow>, ValidationError> {
    serde_json::from_str(text)
        .map_err(|e| ValidationError::MalformedInput(format!("invalid row array: {e}")))
}

/// Parse JSON Lines, skipping blank lines; errors name the 1-based line
pub fn parse_row_lines<S: AsRef<str>>(lines: &[S]) -> Result<Vec<DisburseRow>, ValidationError> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.as_ref().trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line.as_ref().trim()).map_err(|e| {
                ValidationError::MalformedInput(format!("line {}: {e}", index + 1))
            })
        })
        .collect()
}

/// Load rows from `path`, detecting array or JSON Lines by the first character
pub fn load_rows(path: &Path) -> Result<Vec<DisburseRow>, ValidationError> {
    let text = read_source(path, ReadMode::Single)?.concat();

    let rows = if text.trim_start().starts_with('[') {
        parse_rows(&text)?
    } else {
        let lines: Vec<&str> = text.lines().collect();
        parse_row_lines(&lines)?
    };

    debug!(path = %path.display(), rows = rows.len(), "Rows loaded");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_modes() {
        let source = file("a\nb\nc");
        assert_eq!(read_source(source.path(), ReadMode::Single).unwrap(), vec!["a\nb\nc"]);
        assert_eq!(read_source(source.path(), ReadMode::SingleCollapsed).unwrap(), vec!["abc"]);
        assert_eq!(
            read_source(source.path(), ReadMode::Multiline).unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_load_array_and_json_lines() {
        let array = file(r#"[{"amount": "100", "to": "w-1"}, {"amount": "5", "to": "w-2"}]"#);
        let lines = file("{\"amount\": \"100\", \"to\": \"w-1\"}\n\n{\"amount\": \"5\", \"to\": \"w-2\"}\n");

        let expected = vec![DisburseRow::new("100", "w-1"), DisburseRow::new("5", "w-2")];
        assert_eq!(load_rows(array.path()).unwrap(), expected);
        assert_eq!(load_rows(lines.path()).unwrap(), expected);
    }

    #[test]
    fn test_malformed_input_is_a_validation_error() {
        let broken = file("{\"amount\": \"1\", \"to\": \"w\"}\nnot json\n");
        let err = load_rows(broken.path()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedInput(ref m) if m.starts_with("line 2")));
        assert!(load_rows(Path::new("/nonexistent/rows.json")).is_err());
    }
}
