//! Column Namer (§4.C): normalize raw header strings into unique,
//! SQL-safe snake_case identifiers.

use datafusion::arrow::datatypes::{Field, Schema};
use datafusion::arrow::error::ArrowError;
use datafusion::arrow::record_batch::RecordBatch;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static LEADING_TRAILING_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_+|_+$").unwrap());

/// Normalize one raw header into a snake_case identifier. Does not dedup;
/// use [`normalize_columns`] for a whole header row.
fn normalize_one(raw: &str) -> String {
    let expanded = CAMEL_BOUNDARY.replace_all(raw.trim(), "${1}_${2}");
    let lowered = expanded.to_lowercase();
    let collapsed = NON_ALPHANUMERIC.replace_all(&lowered, "_");
    let trimmed = LEADING_TRAILING_UNDERSCORE.replace_all(&collapsed, "");
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else if trimmed.chars().next().unwrap().is_ascii_digit() {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Normalize a full header row, deduplicating collisions with `_1`, `_2`,
/// ... suffixes in encounter order. Returns the final column names plus a
/// map from original header to final name, for downstream rename reporting.
pub fn normalize_columns(raw_headers: &[String]) -> (Vec<String>, HashMap<String, String>) {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut final_names = Vec::with_capacity(raw_headers.len());
    let mut rename_map = HashMap::new();

    for raw in raw_headers {
        let base = normalize_one(raw);
        let count = seen.entry(base.clone()).or_insert(0);
        let name = if *count == 0 {
            base.clone()
        } else {
            format!("{base}_{count}")
        };
        *count += 1;
        rename_map.insert(raw.clone(), name.clone());
        final_names.push(name);
    }

    (final_names, rename_map)
}

/// Rebuilds each batch's schema with `names` substituted in field position
/// order for the original field names. Data types, nullability and the
/// underlying arrays are untouched; this only changes what a column is
/// addressed as in subsequent SQL.
pub fn apply_column_names(
    batches: Vec<RecordBatch>,
    names: &[String],
) -> Result<Vec<RecordBatch>, ArrowError> {
    batches
        .into_iter()
        .map(|batch| {
            let fields: Vec<Field> = batch
                .schema()
                .fields()
                .iter()
                .zip(names)
                .map(|(f, name)| Field::new(name, f.data_type().clone(), f.is_nullable()))
                .collect();
            batch.with_schema(Arc::new(Schema::new(fields)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_is_split_and_lowered() {
        assert_eq!(normalize_one("OrderID"), "order_id");
        assert_eq!(normalize_one("customerName"), "customer_name");
    }

    #[test]
    fn non_alphanumeric_collapses_to_underscore() {
        assert_eq!(normalize_one("Order #  Total!!"), "order_total");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(normalize_one("2024_revenue"), "_2024_revenue");
    }

    #[test]
    fn blank_header_becomes_unnamed() {
        assert_eq!(normalize_one("   "), "unnamed");
    }

    #[test]
    fn duplicate_headers_get_numeric_suffixes() {
        let headers = vec!["Total".to_string(), "total".to_string(), "Total".to_string()];
        let (names, rename_map) = normalize_columns(&headers);
        assert_eq!(names, vec!["total", "total_1", "total_2"]);
        assert_eq!(rename_map["Total"], "total_2");
    }

    #[test]
    fn apply_column_names_renames_fields_in_place() {
        use datafusion::arrow::array::{Int64Array, StringArray};
        use datafusion::arrow::datatypes::DataType;

        let schema = Arc::new(Schema::new(vec![
            Field::new("OrderID", DataType::Int64, false),
            Field::new("CustomerName", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("Ann"), Some("Bob")])),
            ],
        )
        .unwrap();

        let renamed = apply_column_names(
            vec![batch],
            &["order_id".to_string(), "customer_name".to_string()],
        )
        .unwrap();

        let names: Vec<String> = renamed[0]
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["order_id", "customer_name"]);
    }
}
