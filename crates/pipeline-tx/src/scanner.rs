//! Quality Scanner (§4.I): one pass over a loaded table in five wide
//! analytic queries, producing a tagged-union [`Finding`] list plus a
//! schema snapshot the Report Builders reuse directly.

use datafusion::arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt64Array};
use datafusion::arrow::record_batch::RecordBatch;
use pipeline_core::model::{FindingCategory, SuggestedCast};
use pipeline_core::report::ColumnSchemaEntry;
use pipeline_core::{Finding, Result, Severity};
use pipeline_io::AnalyticSession;
use std::collections::HashMap;
use tracing::instrument;

const NULL_LIKE_TOKENS: &[&str] = &["null", "none", "n/a", "na", "-", "", "#n/a", "nan", "missing"];
const PIPELINE_TIMESTAMP_COLUMN: &str = "processed_at";

pub struct ScanOutcome {
    pub findings: Vec<Finding>,
    pub schema: Vec<ColumnSchemaEntry>,
}

#[derive(Debug, Clone)]
struct ColumnType {
    name: String,
    arrow_type: datafusion::arrow::datatypes::DataType,
}

#[instrument(skip(session), fields(table_name))]
pub async fn scan_table(session: &AnalyticSession, table_name: &str) -> Result<ScanOutcome> {
    let columns = describe_columns(session, table_name).await?;
    let mut findings = Vec::new();

    let (schema, summarize_findings) = summarize(session, table_name, &columns).await?;
    findings.extend(summarize_findings);

    let varchar_columns: Vec<&ColumnType> = columns
        .iter()
        .filter(|c| is_varchar(&c.arrow_type))
        .collect();

    findings.extend(type_analysis(session, table_name, &varchar_columns).await?);
    findings.extend(null_like_and_whitespace(session, table_name, &varchar_columns).await?);

    if let Some(duplicate_finding) = duplicates(session, table_name, &columns).await? {
        findings.push(duplicate_finding);
    }

    let numeric_columns: Vec<&ColumnType> = columns
        .iter()
        .filter(|c| is_numeric(&c.arrow_type))
        .collect();
    findings.extend(outliers(session, table_name, &numeric_columns).await?);

    Ok(ScanOutcome { findings, schema })
}

async fn describe_columns(session: &AnalyticSession, table_name: &str) -> Result<Vec<ColumnType>> {
    let provider_columns = session.column_names(table_name).await?;
    let batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| std::sync::Arc::new(datafusion::arrow::datatypes::Schema::empty()));

    Ok(provider_columns
        .into_iter()
        .map(|name| {
            let arrow_type = schema
                .field_with_name(&name)
                .map(|f| f.data_type().clone())
                .unwrap_or(datafusion::arrow::datatypes::DataType::Utf8);
            ColumnType { name, arrow_type }
        })
        .collect())
}

fn is_varchar(data_type: &datafusion::arrow::datatypes::DataType) -> bool {
    matches!(data_type, datafusion::arrow::datatypes::DataType::Utf8)
}

fn is_numeric(data_type: &datafusion::arrow::datatypes::DataType) -> bool {
    use datafusion::arrow::datatypes::DataType::*;
    matches!(
        data_type,
        Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 | Float32 | Float64
    )
}

/// The SUMMARIZE-equivalent pass: per-column null rate, approx distinct
/// count, type, min/max/avg. Emits high-null findings and a single
/// constant-columns finding.
async fn summarize(
    session: &AnalyticSession,
    table_name: &str,
    columns: &[ColumnType],
) -> Result<(Vec<ColumnSchemaEntry>, Vec<Finding>)> {
    let total_rows = session.row_count(table_name).await?;
    let mut schema = Vec::new();
    let mut findings = Vec::new();
    let mut constant_columns = Vec::new();

    for column in columns {
        let sql = format!(
            "SELECT COUNT(*) - COUNT(\"{name}\") AS null_count, \
             approx_distinct(\"{name}\") AS approx_unique, \
             MIN(\"{name}\") AS min_v, MAX(\"{name}\") AS max_v, AVG(try_cast(\"{name}\" AS DOUBLE)) AS avg_v \
             FROM {table_name}",
            name = column.name
        );
        let batches = session.execute_unchecked(&sql).await?;
        let row = first_row(&batches);

        let null_count = row
            .as_ref()
            .and_then(|b| scalar_i64(b, 0))
            .unwrap_or(0)
            .max(0) as u64;
        let approx_unique = row.as_ref().and_then(|b| scalar_u64(b, 1));
        let min_v = row.as_ref().and_then(|b| scalar_string(b, 2));
        let max_v = row.as_ref().and_then(|b| scalar_string(b, 3));
        let avg_v = row.as_ref().and_then(|b| scalar_float_string(b, 4));

        let null_rate = if total_rows == 0 {
            0.0
        } else {
            null_count as f64 / total_rows as f64
        };

        schema.push(ColumnSchemaEntry {
            column_name: column.name.clone(),
            column_type: format!("{:?}", column.arrow_type),
            null_count,
            null_rate,
            approx_unique,
            min: min_v,
            max: max_v,
            avg: avg_v,
        });

        if null_rate > 0.5 {
            findings.push(Finding {
                severity: if null_rate > 0.9 {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                category: FindingCategory::NullAnalysis {
                    column: column.name.clone(),
                    null_count,
                    null_rate,
                },
            });
        }

        if let Some(unique) = approx_unique {
            if unique <= 1 {
                constant_columns.push(column.name.clone());
            }
        }
    }

    if !constant_columns.is_empty() {
        findings.push(Finding {
            severity: Severity::Warning,
            category: FindingCategory::ConstantColumns {
                columns: constant_columns,
            },
        });
    }

    Ok((schema, findings))
}

/// One wide query per VARCHAR column with FILTER clauses for non_null,
/// castable_double, castable_date, castable_boolean, and leading_zero.
async fn type_analysis(
    session: &AnalyticSession,
    table_name: &str,
    columns: &[&ColumnType],
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    for column in columns {
        let name = &column.name;
        let sql = format!(
            "SELECT \
             COUNT(*) FILTER (WHERE \"{name}\" IS NOT NULL) AS non_null, \
             COUNT(*) FILTER (WHERE try_cast(\"{name}\" AS DOUBLE) IS NOT NULL) AS castable_double, \
             COUNT(*) FILTER (WHERE try_cast(\"{name}\" AS DATE) IS NOT NULL) AS castable_date, \
             COUNT(*) FILTER (WHERE lower(trim(\"{name}\")) IN ('true','false','yes','no','y','n','1','0')) AS castable_boolean, \
             COUNT(*) FILTER (WHERE \"{name}\" LIKE '0%' AND length(\"{name}\") > 1 AND try_cast(\"{name}\" AS BIGINT) IS NOT NULL) AS leading_zero \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let row = match first_row(&batches) {
            Some(row) => row,
            None => continue,
        };

        let non_null = scalar_i64(&row, 0).unwrap_or(0).max(0) as u64;
        if non_null == 0 {
            continue;
        }
        let castable_double = scalar_i64(&row, 1).unwrap_or(0).max(0) as u64;
        let castable_date = scalar_i64(&row, 2).unwrap_or(0).max(0) as u64;
        let castable_boolean = scalar_i64(&row, 3).unwrap_or(0).max(0) as u64;
        let leading_zero_count = scalar_i64(&row, 4).unwrap_or(0).max(0) as u64;

        let double_rate = castable_double as f64 / non_null as f64;
        let date_rate = castable_date as f64 / non_null as f64;
        let boolean_rate = castable_boolean as f64 / non_null as f64;

        let any_above_threshold = double_rate > 0.9 || date_rate > 0.9 || boolean_rate > 0.9;
        if !any_above_threshold && leading_zero_count == 0 {
            continue;
        }

        let no_leading_zeros = leading_zero_count == 0;
        let suggested_cast = if !no_leading_zeros {
            None
        } else if date_rate > 0.9 {
            Some(SuggestedCast::Date)
        } else if double_rate > 0.9 {
            Some(SuggestedCast::Double)
        } else if boolean_rate > 0.9 {
            Some(SuggestedCast::Boolean)
        } else {
            None
        };

        let severity = if leading_zero_count > 0 && double_rate > 0.9 {
            Severity::Warning
        } else {
            Severity::Info
        };

        findings.push(Finding {
            severity,
            category: FindingCategory::TypeAnalysis {
                column: name.clone(),
                numeric_castable_rate: double_rate,
                date_castable_rate: date_rate,
                boolean_castable_rate: boolean_rate,
                leading_zero_count,
                suggested_cast,
            },
        });
    }
    Ok(findings)
}

/// Null-like sentinel and whitespace counts merged into one pass per
/// column, with a per-value breakdown fetched only for flagged columns.
async fn null_like_and_whitespace(
    session: &AnalyticSession,
    table_name: &str,
    columns: &[&ColumnType],
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let total_rows = session.row_count(table_name).await?;
    if total_rows == 0 {
        return Ok(findings);
    }

    for column in columns {
        let name = &column.name;
        let null_like_predicate = NULL_LIKE_TOKENS
            .iter()
            .map(|token| format!("'{token}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT \
             COUNT(*) FILTER (WHERE lower(trim(\"{name}\")) IN ({null_like_predicate})) AS null_like_count, \
             COUNT(*) FILTER (WHERE \"{name}\" IS NOT NULL AND \"{name}\" != trim(\"{name}\")) AS whitespace_count \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let row = match first_row(&batches) {
            Some(row) => row,
            None => continue,
        };
        let null_like_count = scalar_i64(&row, 0).unwrap_or(0).max(0) as u64;
        let whitespace_count = scalar_i64(&row, 1).unwrap_or(0).max(0) as u64;

        if null_like_count > 0 {
            let values = value_breakdown(session, table_name, name, NULL_LIKE_TOKENS).await?;
            findings.push(Finding {
                severity: Severity::Warning,
                category: FindingCategory::NullLikeStrings {
                    column: name.clone(),
                    total_count: null_like_count,
                    values,
                },
            });
        }

        if whitespace_count > 0 {
            findings.push(Finding {
                severity: Severity::Info,
                category: FindingCategory::Whitespace {
                    column: name.clone(),
                    affected_count: whitespace_count,
                    affected_rate: whitespace_count as f64 / total_rows as f64,
                },
            });
        }
    }
    Ok(findings)
}

async fn value_breakdown(
    session: &AnalyticSession,
    table_name: &str,
    column: &str,
    tokens: &[&str],
) -> Result<HashMap<String, u64>> {
    let mut breakdown = HashMap::new();
    for token in tokens {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} WHERE lower(trim(\"{column}\")) = '{token}'"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let count = first_row(&batches)
            .and_then(|row| scalar_i64(&row, 0))
            .unwrap_or(0)
            .max(0) as u64;
        if count > 0 {
            breakdown.insert((*token).to_string(), count);
        }
    }
    Ok(breakdown)
}

/// `count(*) - count(distinct *)` ignoring the pipeline timestamp column.
async fn duplicates(
    session: &AnalyticSession,
    table_name: &str,
    columns: &[ColumnType],
) -> Result<Option<Finding>> {
    let compare_columns: Vec<&str> = columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| *name != PIPELINE_TIMESTAMP_COLUMN)
        .collect();
    if compare_columns.is_empty() {
        return Ok(None);
    }

    let select_list = compare_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT (SELECT COUNT(*) FROM {table_name}) - \
         (SELECT COUNT(*) FROM (SELECT DISTINCT {select_list} FROM {table_name})) AS dup_count"
    );
    let batches = session.execute_unchecked(&sql).await?;
    let dup_count = first_row(&batches)
        .and_then(|row| scalar_i64(&row, 0))
        .unwrap_or(0)
        .max(0) as u64;

    if dup_count == 0 {
        return Ok(None);
    }

    Ok(Some(Finding {
        severity: if dup_count > 100 {
            Severity::Critical
        } else {
            Severity::Warning
        },
        category: FindingCategory::Duplicates {
            approximate_count: dup_count,
        },
    }))
}

/// IQR bounds per numeric column via `approx_percentile_cont`, emitted as an info
/// finding when any row falls outside `[q1 - 1.5*iqr, q3 + 1.5*iqr]`.
async fn outliers(
    session: &AnalyticSession,
    table_name: &str,
    columns: &[&ColumnType],
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    for column in columns {
        let name = &column.name;
        let quantile_sql = format!(
            "SELECT approx_percentile_cont(\"{name}\", 0.25) AS q1, \
             approx_percentile_cont(\"{name}\", 0.75) AS q3 \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&quantile_sql).await?;
        let row = match first_row(&batches) {
            Some(row) => row,
            None => continue,
        };
        let q1 = match scalar_f64(&row, 0) {
            Some(v) => v,
            None => continue,
        };
        let q3 = match scalar_f64(&row, 1) {
            Some(v) => v,
            None => continue,
        };
        let iqr = q3 - q1;
        let lower_bound = q1 - 1.5 * iqr;
        let upper_bound = q3 + 1.5 * iqr;

        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} \
             WHERE \"{name}\" < {lower_bound} OR \"{name}\" > {upper_bound}"
        );
        let count_batches = session.execute_unchecked(&count_sql).await?;
        let outlier_count = first_row(&count_batches)
            .and_then(|row| scalar_i64(&row, 0))
            .unwrap_or(0)
            .max(0) as u64;

        if outlier_count > 0 {
            findings.push(Finding {
                severity: Severity::Info,
                category: FindingCategory::Outliers {
                    column: name.clone(),
                    outlier_count,
                    lower_bound,
                    upper_bound,
                },
            });
        }
    }
    Ok(findings)
}

fn first_row(batches: &[RecordBatch]) -> Option<RecordBatch> {
    batches.iter().find(|b| b.num_rows() > 0).cloned()
}

fn scalar_i64(batch: &RecordBatch, col: usize) -> Option<i64> {
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(0))
        .or_else(|| {
            array
                .as_any()
                .downcast_ref::<UInt64Array>()
                .map(|a| a.value(0) as i64)
        })
}

fn scalar_u64(batch: &RecordBatch, col: usize) -> Option<u64> {
    scalar_i64(batch, col).map(|v| v.max(0) as u64)
}

fn scalar_f64(batch: &RecordBatch, col: usize) -> Option<f64> {
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .map(|a| a.value(0))
}

fn scalar_string(batch: &RecordBatch, col: usize) -> Option<String> {
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .map(|a| a.value(0).to_string())
        .or_else(|| {
            use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
            ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
                .ok()
                .map(|f| f.value(0).to_string())
        })
}

fn scalar_float_string(batch: &RecordBatch, col: usize) -> Option<String> {
    scalar_f64(batch, col).map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::StringArray as ArrowStringArray;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    async fn session_with_nulls() -> AnalyticSession {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("mostly_null", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(ArrowStringArray::from(vec![
                    None,
                    None,
                    None,
                    None,
                    Some("x"),
                ])),
            ],
        )
        .unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![batch]).unwrap();
        session
    }

    #[tokio::test]
    async fn high_null_column_is_flagged() {
        let session = session_with_nulls().await;
        let outcome = scan_table(&session, "t").await.unwrap();
        let has_null_finding = outcome.findings.iter().any(|f| {
            matches!(&f.category, FindingCategory::NullAnalysis { column, .. } if column == "mostly_null")
        });
        assert!(has_null_finding);
    }
}
