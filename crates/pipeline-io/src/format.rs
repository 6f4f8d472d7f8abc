//! Format Detector (§4.A): classify a file by extension, falling back to
//! magic bytes, and report size plus native-loadability.

use pipeline_core::model::FileFormat;
use pipeline_core::{PipelineError, Result};
use std::path::Path;

const MAGIC_PARQUET: &[u8] = b"PAR1";
const MAGIC_ZIP: &[u8] = b"PK\x03\x04";

fn extension_format(path: &Path) -> Option<FileFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "csv" => FileFormat::Csv,
        "tsv" | "tab" => FileFormat::Tsv,
        "json" => FileFormat::Json,
        "jsonl" | "ndjson" => FileFormat::Jsonl,
        "parquet" | "pq" => FileFormat::Parquet,
        "xlsx" | "xls" | "xlsm" | "xltx" => FileFormat::Excel,
        _ => return None,
    })
}

fn magic_bytes_format(prefix: &[u8]) -> FileFormat {
    if prefix.starts_with(MAGIC_PARQUET) {
        FileFormat::Parquet
    } else if prefix.starts_with(MAGIC_ZIP) {
        FileFormat::Excel
    } else {
        FileFormat::Unknown
    }
}

/// Classify `path`'s format: extension first, then the first 8 bytes as a
/// magic-byte fallback. I/O errors surface as [`PipelineError::External`]
/// rather than silently resolving to `Unknown`.
pub fn detect_format(path: &Path) -> Result<FileFormat> {
    if let Some(format) = extension_format(path) {
        return Ok(format);
    }

    let mut file = std::fs::File::open(path)
        .map_err(|e| PipelineError::external("format_detect", e))?;
    let mut prefix = [0u8; 8];
    let read = std::io::Read::read(&mut file, &mut prefix)
        .map_err(|e| PipelineError::external("format_detect", e))?;
    Ok(magic_bytes_format(&prefix[..read]))
}

#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    pub format: FileFormat,
    pub size_mb: f64,
    pub native_loadable: bool,
}

pub fn inspect_file(path: &Path) -> Result<FileDiagnostics> {
    let format = detect_format(path)?;
    let metadata =
        std::fs::metadata(path).map_err(|e| PipelineError::external("format_detect", e))?;
    Ok(FileDiagnostics {
        format,
        size_mb: metadata.len() as f64 / (1024.0 * 1024.0),
        native_loadable: format.is_native_loadable(),
    })
}

/// A file with no bytes, or one containing only whitespace, once the file
/// is smaller than `size_threshold_mb`. Large files skip the whitespace
/// check entirely rather than reading the whole thing.
pub fn is_blank_file(path: &Path, size_threshold_mb: f64) -> Result<bool> {
    let metadata =
        std::fs::metadata(path).map_err(|e| PipelineError::external("format_detect", e))?;
    if metadata.len() == 0 {
        return Ok(true);
    }
    let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
    if size_mb >= size_threshold_mb {
        return Ok(false);
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| PipelineError::external("format_detect", e))?;
    Ok(content.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-format-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn detects_by_extension() {
        let path = write_temp("a.csv", b"a,b\n1,2\n");
        assert_eq!(detect_format(&path).unwrap(), FileFormat::Csv);
    }

    #[test]
    fn falls_back_to_magic_bytes_for_unknown_extension() {
        let path = write_temp("a.dat", b"PAR1rest-of-file");
        assert_eq!(detect_format(&path).unwrap(), FileFormat::Parquet);
    }

    #[test]
    fn unrecognized_extension_and_bytes_is_unknown() {
        let path = write_temp("a.bin", b"nothing special here");
        assert_eq!(detect_format(&path).unwrap(), FileFormat::Unknown);
    }

    #[test]
    fn blank_file_is_detected() {
        let path = write_temp("blank.csv", b"   \n\t\n");
        assert!(is_blank_file(&path, 10.0).unwrap());
    }

    #[test]
    fn non_blank_file_is_not_blank() {
        let path = write_temp("nonblank.csv", b"a,b\n1,2\n");
        assert!(!is_blank_file(&path, 10.0).unwrap());
    }
}
