//! Delimiter Inferrer (§4.E): guess a CSV-family file's field delimiter
//! from its extension or header line, and expose small diagnostics the
//! CSV Loader's recovery path uses to decide whether to retry.

use pipeline_core::{PipelineError, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Returns tab for `.tsv`/`.tab`, otherwise inspects the first non-empty
/// line: counts characters outside `[0-9a-zA-Z_ "-]` and returns the most
/// frequent one. If no such character appears, space wins when present,
/// otherwise comma.
pub fn infer_delimiter(path: &Path) -> Result<char> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if ext == "tsv" || ext == "tab" {
            return Ok('\t');
        }
    }

    let first_line = read_first_non_empty_line(path)?.unwrap_or_default();
    let stripped: String = first_line.chars().filter(|c| *c != ' ').collect();

    let mut counts: HashMap<char, u64> = HashMap::new();
    for c in stripped.chars() {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '"' || c == '-') {
            *counts.entry(c).or_insert(0) += 1;
        }
    }

    if let Some((delim, _)) = counts.into_iter().max_by_key(|(_, count)| *count) {
        return Ok(delim);
    }

    if first_line.contains(' ') {
        Ok(' ')
    } else {
        Ok(',')
    }
}

fn read_first_non_empty_line(path: &Path) -> Result<Option<String>> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::external("delimiter", e))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| PipelineError::external("delimiter", e))?;
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

/// Read the first `n` raw lines, for recovery-path diagnostics.
pub fn read_first_n_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::external("delimiter", e))?;
    let mut lines = Vec::with_capacity(n);
    for line in BufReader::new(file).lines().take(n) {
        lines.push(line.map_err(|e| PipelineError::external("delimiter", e))?);
    }
    Ok(lines)
}

/// Count data lines by scanning for newline bytes and subtracting one for
/// the header row. A file with no trailing newline still counts its last
/// line correctly because the scan counts `\n` occurrences, and a header-only
/// file (one newline) yields zero data lines.
pub fn count_data_lines(path: &Path) -> Result<u64> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::external("delimiter", e))?;
    let newline_count = bytes.iter().filter(|b| **b == b'\n').count() as u64;
    let has_trailing_newline = bytes.last() == Some(&b'\n');
    let total_lines = if has_trailing_newline || bytes.is_empty() {
        newline_count
    } else {
        newline_count + 1
    };
    Ok(total_lines.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-delimiter-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn tsv_extension_shortcuts_to_tab() {
        let path = write_temp("a.tsv", "a,b;c\n1,2\n");
        assert_eq!(infer_delimiter(&path).unwrap(), '\t');
    }

    #[test]
    fn semicolon_header_is_detected() {
        let path = write_temp("a.csv", "name;age;city\nAnn;30;NY\n");
        assert_eq!(infer_delimiter(&path).unwrap(), ';');
    }

    #[test]
    fn pipe_delimited_header_is_detected() {
        let path = write_temp("a.csv", "name|age|city\nAnn|30|NY\n");
        assert_eq!(infer_delimiter(&path).unwrap(), '|');
    }

    #[test]
    fn space_separated_falls_back_to_space() {
        let path = write_temp("a.csv", "name age city\nAnn 30 NY\n");
        assert_eq!(infer_delimiter(&path).unwrap(), ' ');
    }

    #[test]
    fn plain_alphanumeric_header_falls_back_to_comma() {
        let path = write_temp("a.csv", "nameagecity\n");
        assert_eq!(infer_delimiter(&path).unwrap(), ',');
    }

    #[test]
    fn counts_data_lines_excluding_header() {
        let path = write_temp("a.csv", "a,b\n1,2\n3,4\n");
        assert_eq!(count_data_lines(&path).unwrap(), 2);
    }

    #[test]
    fn counts_data_lines_without_trailing_newline() {
        let path = write_temp("a.csv", "a,b\n1,2\n3,4");
        assert_eq!(count_data_lines(&path).unwrap(), 2);
    }
}
