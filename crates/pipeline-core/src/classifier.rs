//! Abstraction over the external LLM-based classifiers (header detection,
//! PII detection). The core pipeline never calls a model directly; it talks
//! to whatever implements [`Classifier`]. The default implementation
//! fails open, matching the source's "never block ingestion on a model
//! call" posture.

use crate::model::PiiFinding;
use async_trait::async_trait;

/// Whether the first row of a CSV/TSV file looks like column headers or
/// data. Unknown defaults to `Headers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVerdict {
    Headers,
    Data,
}

/// A column sample submitted for PII classification: the column name and
/// up to five distinct non-null values observed in it.
#[derive(Debug, Clone)]
pub struct ColumnSample {
    pub column: String,
    pub values: Vec<String>,
}

/// External classifier seam. Both methods are best-effort: a failing
/// implementation should still return the safe default rather than
/// propagating, but the trait itself surfaces errors so callers can log
/// them before falling back.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect_header(&self, first_lines: &[String]) -> anyhow::Result<HeaderVerdict>;

    async fn detect_pii(&self, samples: &[ColumnSample]) -> anyhow::Result<Vec<PiiFinding>>;
}

/// Fail-open default: always reports headers present, never flags PII.
/// Used whenever no real classifier is configured, and as the baseline
/// every other implementation falls back to on error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailOpenClassifier;

#[async_trait]
impl Classifier for FailOpenClassifier {
    async fn detect_header(&self, _first_lines: &[String]) -> anyhow::Result<HeaderVerdict> {
        Ok(HeaderVerdict::Headers)
    }

    async fn detect_pii(&self, _samples: &[ColumnSample]) -> anyhow::Result<Vec<PiiFinding>> {
        Ok(Vec::new())
    }
}

/// Runs `classifier`, logging and falling back to [`FailOpenClassifier`] on
/// any error. The "fail-open" wrapper every call site should use instead
/// of calling a `Classifier` directly.
pub async fn detect_header_fail_open(
    classifier: &dyn Classifier,
    first_lines: &[String],
) -> HeaderVerdict {
    match classifier.detect_header(first_lines).await {
        Ok(verdict) => verdict,
        Err(err) => {
            tracing::warn!(error = %err, "header detection failed, defaulting to HEADERS");
            HeaderVerdict::Headers
        }
    }
}

pub async fn detect_pii_fail_open(
    classifier: &dyn Classifier,
    samples: &[ColumnSample],
) -> Vec<PiiFinding> {
    if samples.is_empty() {
        return Vec::new();
    }
    match classifier.detect_pii(samples).await {
        Ok(findings) => findings,
        Err(err) => {
            tracing::warn!(error = %err, "PII detection failed, returning empty result");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_open_classifier_defaults_to_headers() {
        let classifier = FailOpenClassifier;
        let verdict = classifier.detect_header(&[]).await.unwrap();
        assert_eq!(verdict, HeaderVerdict::Headers);
    }

    #[tokio::test]
    async fn fail_open_classifier_never_flags_pii() {
        let classifier = FailOpenClassifier;
        let findings = classifier.detect_pii(&[]).await.unwrap();
        assert!(findings.is_empty());
    }

    struct AlwaysErrorsClassifier;

    #[async_trait]
    impl Classifier for AlwaysErrorsClassifier {
        async fn detect_header(&self, _: &[String]) -> anyhow::Result<HeaderVerdict> {
            anyhow::bail!("boom")
        }
        async fn detect_pii(&self, _: &[ColumnSample]) -> anyhow::Result<Vec<PiiFinding>> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn fail_open_wrapper_recovers_from_errors() {
        let classifier = AlwaysErrorsClassifier;
        let verdict = detect_header_fail_open(&classifier, &[]).await;
        assert_eq!(verdict, HeaderVerdict::Headers);
        let samples = vec![ColumnSample {
            column: "c".into(),
            values: vec!["v".into()],
        }];
        let findings = detect_pii_fail_open(&classifier, &samples).await;
        assert!(findings.is_empty());
    }
}
