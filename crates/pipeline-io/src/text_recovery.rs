//! Text Recovery (§4.B): detect a text file's encoding from a sample and
//! transcode it to UTF-8 on disk when it isn't already.
//!
//! Grounded on the source's `charset_normalizer`-based recovery path;
//! `chardetng` plays the same role here, fed by `encoding_rs` for the
//! actual transcode.

use pipeline_core::{PipelineError, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const SAMPLE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub encoding_name: &'static str,
    pub was_recovered: bool,
    pub recovered_path: Option<PathBuf>,
}

fn read_sample(path: &Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path).map_err(|e| PipelineError::external("text_recovery", e))?;
    let mut buf = vec![0u8; SAMPLE_BYTES];
    let read = file
        .read(&mut buf)
        .map_err(|e| PipelineError::external("text_recovery", e))?;
    buf.truncate(read);
    Ok(buf)
}

fn detect_encoding(sample: &[u8]) -> &'static encoding_rs::Encoding {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(sample, true);
    detector.guess(None, true)
}

/// If the sample decodes cleanly as UTF-8, report `was_recovered: false` and
/// leave the file untouched. Otherwise decode with the detected encoding
/// (replacing malformed sequences) and write the transcoded text to a
/// sibling `<name>.recovered.txt` file, which the caller should load in its
/// place.
pub fn recover_if_needed(path: &Path) -> Result<RecoveryOutcome> {
    let sample = read_sample(path)?;
    if sample.is_empty() || std::str::from_utf8(&sample).is_ok() {
        return Ok(RecoveryOutcome {
            encoding_name: "UTF-8",
            was_recovered: false,
            recovered_path: None,
        });
    }

    let encoding = detect_encoding(&sample);
    let raw = std::fs::read(path).map_err(|e| PipelineError::external("text_recovery", e))?;
    let (decoded, _, had_errors) = encoding.decode(&raw);
    if had_errors && encoding != encoding_rs::UTF_8 {
        tracing::warn!(
            path = %path.display(),
            encoding = encoding.name(),
            "text recovery decoded with replacement characters"
        );
    }

    let recovered_path = path.with_extension("recovered.txt");
    let mut out = std::fs::File::create(&recovered_path)
        .map_err(|e| PipelineError::external("text_recovery", e))?;
    out.write_all(decoded.as_bytes())
        .map_err(|e| PipelineError::external("text_recovery", e))?;

    Ok(RecoveryOutcome {
        encoding_name: encoding.name(),
        was_recovered: true,
        recovered_path: Some(recovered_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-text-recovery-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn valid_utf8_is_not_recovered() {
        let path = write_temp("clean.csv", "a,b\n1,2\n".as_bytes());
        let outcome = recover_if_needed(&path).unwrap();
        assert!(!outcome.was_recovered);
        assert_eq!(outcome.encoding_name, "UTF-8");
    }

    #[test]
    fn latin1_bytes_are_recovered_to_a_sibling_file() {
        // 0xE9 is 'é' in Latin-1/Windows-1252 but is invalid standalone UTF-8.
        let path = write_temp("latin1.csv", b"name\ncaf\xe9\n");
        let outcome = recover_if_needed(&path).unwrap();
        assert!(outcome.was_recovered);
        let recovered_path = outcome.recovered_path.unwrap();
        let contents = std::fs::read_to_string(&recovered_path).unwrap();
        assert!(contents.contains("café"));
    }

    #[test]
    fn empty_file_is_not_recovered() {
        let path = write_temp("empty.csv", b"");
        let outcome = recover_if_needed(&path).unwrap();
        assert!(!outcome.was_recovered);
    }
}
