//! CSV Loader (§4.F): a fast path through the engine's own CSV reader, and
//! a recovery path that tries several quote/escape configurations and picks
//! whichever produces the fewest shifted (overflowed) columns.

use crate::column_namer::{apply_column_names, normalize_columns};
use crate::delimiter::{count_data_lines, infer_delimiter};
use crate::session::AnalyticSession;
use datafusion::prelude::CsvReadOptions;
use pipeline_core::classifier::detect_header_fail_open;
use pipeline_core::{Classifier, HeaderVerdict, PipelineError, Result};
use std::path::Path;
use tracing::{info, instrument, warn};

const OVERFLOW_NULL_RATE_THRESHOLD: f64 = 0.8;
const COERCION_RATE_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct CsvLoadOutcome {
    pub table_name: String,
    pub loaded_rows: u64,
    pub source_rows: u64,
    pub empty_rows_removed: u64,
    pub parse_strategy: String,
    pub overflow_columns_repaired: Vec<String>,
    pub overflow_rows_flagged: u64,
    pub is_header_detected: bool,
    pub delimiter: char,
}

struct QuoteEscape {
    quote: u8,
    escape: Option<u8>,
    label: &'static str,
}

const RECOVERY_CONFIGS: &[QuoteEscape] = &[
    QuoteEscape { quote: b'"', escape: Some(b'"'), label: "double_quote_double_escape" },
    QuoteEscape { quote: b'"', escape: Some(b'\\'), label: "double_quote_backslash_escape" },
    QuoteEscape { quote: b'\'', escape: Some(b'\''), label: "single_quote_single_escape" },
    QuoteEscape { quote: b'"', escape: None, label: "auto_detect_lenient" },
];

/// Attempts the fast path first; on failure, runs the recovery path. On
/// success the table is registered under `table_name` in `session`.
/// `classifier` is consulted by the recovery path for header detection;
/// callers without a configured external classifier should pass
/// [`pipeline_core::FailOpenClassifier`].
#[instrument(skip(session, classifier), fields(table_name))]
pub async fn load_csv(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    classifier: &dyn Classifier,
) -> Result<CsvLoadOutcome> {
    let delimiter = infer_delimiter(path)?;
    match try_fast_path(session, path, table_name, delimiter).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(error = %err, "csv fast path failed, falling back to recovery path");
            load_csv_recovery(session, path, table_name, delimiter, classifier).await
        }
    }
}

async fn try_fast_path(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    delimiter: char,
) -> Result<CsvLoadOutcome> {
    let options = CsvReadOptions::new()
        .delimiter(delimiter as u8)
        .quote(b'"')
        .has_header(true);
    let df = session
        .context()
        .read_csv(path.to_string_lossy().as_ref(), options)
        .await?;
    let batches = df.collect().await?;
    if batches.is_empty() {
        return Err(PipelineError::format("CSV fast path produced no batches"));
    }

    let raw_columns: Vec<String> = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let (final_names, _rename_map) = normalize_columns(&raw_columns);
    let batches = apply_column_names(batches, &final_names)
        .map_err(|e| PipelineError::external("csv_load", e))?;

    let batches = drop_all_null_rows(batches);
    let loaded_rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
    session.register_table(table_name, batches)?;

    let overflow_columns = detect_overflow_columns(session, table_name).await?;
    let overflow_rows_flagged = if overflow_columns.is_empty() {
        0
    } else {
        repair_overflow(session, table_name, &overflow_columns).await?
    };

    let source_rows = count_data_lines(path)?;
    Ok(CsvLoadOutcome {
        table_name: table_name.to_string(),
        loaded_rows,
        source_rows,
        empty_rows_removed: 0,
        parse_strategy: "fast_path".to_string(),
        overflow_columns_repaired: overflow_columns,
        overflow_rows_flagged,
        is_header_detected: true,
        delimiter,
    })
}

async fn load_csv_recovery(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    delimiter: char,
    classifier: &dyn Classifier,
) -> Result<CsvLoadOutcome> {
    let first_lines = crate::delimiter::read_first_n_lines(path, 5)?;
    let verdict = detect_header_fail_open(classifier, &first_lines).await;
    let has_header = !matches!(verdict, HeaderVerdict::Data);

    let mut best: Option<(String, Vec<datafusion::arrow::array::RecordBatch>, usize)> = None;

    for config in RECOVERY_CONFIGS {
        let mut options = CsvReadOptions::new()
            .delimiter(delimiter as u8)
            .quote(config.quote)
            .has_header(has_header);
        if let Some(escape) = config.escape {
            options = options.escape(escape);
        }
        let df = match session
            .context()
            .read_csv(path.to_string_lossy().as_ref(), options)
            .await
        {
            Ok(df) => df,
            Err(_) => continue,
        };
        let batches = match df.collect().await {
            Ok(b) => b,
            Err(_) => continue,
        };
        if batches.is_empty() {
            continue;
        }
        let overflow_count = count_trailing_overflow_columns(&batches);
        info!(config = config.label, overflow_count, "recovery attempt");
        let better = match &best {
            None => true,
            Some((_, _, best_overflow)) => overflow_count < *best_overflow,
        };
        if better {
            best = Some((config.label.to_string(), batches, overflow_count));
            if overflow_count == 0 {
                break;
            }
        }
    }

    let (strategy, batches, _) = best.ok_or_else(|| {
        PipelineError::format(format!("no CSV recovery configuration could parse {}", path.display()))
    })?;

    let raw_columns: Vec<String> = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let (final_names, _) = normalize_columns(&raw_columns);
    let batches = apply_column_names(batches, &final_names)
        .map_err(|e| PipelineError::external("csv_load", e))?;

    let source_count = batches.iter().map(|b| b.num_rows()).sum::<usize>();
    let batches = drop_all_null_rows(batches);
    let loaded_count = batches.iter().map(|b| b.num_rows()).sum::<usize>();
    let empty_rows_removed = (source_count - loaded_count) as u64;

    session.register_table(table_name, batches)?;

    let overflow_columns = detect_overflow_columns(session, table_name).await?;
    let overflow_rows_flagged = if overflow_columns.is_empty() {
        0
    } else {
        repair_overflow(session, table_name, &overflow_columns).await?
    };

    safe_type_coercion(session, table_name).await?;

    let source_rows = count_data_lines(path)?;
    let loaded_rows = session.row_count(table_name).await?;

    if loaded_rows + empty_rows_removed < source_rows {
        session.unregister_table(table_name);
        return Err(PipelineError::AtomicLoad {
            message: "recovered row count fell short of source data lines".to_string(),
            source_rows,
            loaded_rows,
            empty_rows_removed,
            parse_strategy: strategy,
        });
    }

    Ok(CsvLoadOutcome {
        table_name: table_name.to_string(),
        loaded_rows,
        source_rows,
        empty_rows_removed,
        parse_strategy: strategy,
        overflow_columns_repaired: overflow_columns,
        overflow_rows_flagged,
        is_header_detected: has_header,
        delimiter,
    })
}

fn drop_all_null_rows(
    batches: Vec<datafusion::arrow::array::RecordBatch>,
) -> Vec<datafusion::arrow::array::RecordBatch> {
    use datafusion::arrow::array::BooleanArray;
    use datafusion::arrow::compute::filter_record_batch;

    batches
        .into_iter()
        .filter_map(|batch| {
            let mut keep = vec![false; batch.num_rows()];
            for row in 0..batch.num_rows() {
                let all_null = (0..batch.num_columns()).all(|col| batch.column(col).is_null(row));
                keep[row] = !all_null;
            }
            let mask = BooleanArray::from(keep);
            filter_record_batch(&batch, &mask).ok()
        })
        .filter(|b| b.num_rows() > 0)
        .collect()
}

/// A column is an overflow column if it is a trailing column and its NULL
/// count is at least 80% of total rows.
async fn detect_overflow_columns(
    session: &AnalyticSession,
    table_name: &str,
) -> Result<Vec<String>> {
    let columns = session.column_names(table_name).await?;
    let total_rows = session.row_count(table_name).await?;
    if total_rows == 0 || columns.is_empty() {
        return Ok(Vec::new());
    }

    let mut overflow = Vec::new();
    for column in columns.iter().rev() {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} WHERE \"{column}\" IS NULL"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let null_count = scalar_count(&batches);
        let rate = null_count as f64 / total_rows as f64;
        if rate >= OVERFLOW_NULL_RATE_THRESHOLD {
            overflow.push(column.clone());
        } else {
            break;
        }
    }
    overflow.reverse();
    Ok(overflow)
}

fn scalar_count(batches: &[datafusion::arrow::array::RecordBatch]) -> u64 {
    use datafusion::arrow::array::Int64Array;
    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }
        if let Some(array) = batch.column(0).as_any().downcast_ref::<Int64Array>() {
            return array.value(0) as u64;
        }
    }
    0
}

fn count_trailing_overflow_columns(
    batches: &[datafusion::arrow::array::RecordBatch],
) -> usize {
    if batches.is_empty() {
        return 0;
    }
    let num_columns = batches[0].num_columns();
    let total_rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    if total_rows == 0 {
        return 0;
    }

    let mut overflow = 0;
    for col in (0..num_columns).rev() {
        let nulls: usize = batches.iter().map(|b| b.column(col).null_count()).sum();
        let rate = nulls as f64 / total_rows as f64;
        if rate >= OVERFLOW_NULL_RATE_THRESHOLD {
            overflow += 1;
        } else {
            break;
        }
    }
    overflow
}

/// Rebuilds the table keeping only non-overflow columns plus a boolean
/// `is_shifted` flag marking rows where any overflow column held non-blank
/// text, then swaps the repaired table in under the original name.
async fn repair_overflow(
    session: &mut AnalyticSession,
    table_name: &str,
    overflow_columns: &[String],
) -> Result<u64> {
    let all_columns = session.column_names(table_name).await?;
    let keep_columns: Vec<&String> = all_columns
        .iter()
        .filter(|c| !overflow_columns.contains(c))
        .collect();

    let select_list = keep_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let shifted_predicate = overflow_columns
        .iter()
        .map(|c| format!("(\"{c}\" IS NOT NULL AND trim(\"{c}\") != '')"))
        .collect::<Vec<_>>()
        .join(" OR ");

    let repaired_table = format!("{table_name}__repaired");
    let sql = format!(
        "SELECT {select_list}, ({shifted_predicate}) AS is_shifted FROM {table_name}"
    );
    let batches = session.execute_unchecked(&sql).await?;
    let flagged_rows = count_flagged_rows(&batches);

    session.register_table(&repaired_table, batches)?;
    session.unregister_table(table_name);
    rename_table(session, &repaired_table, table_name).await?;

    Ok(flagged_rows)
}

fn count_flagged_rows(batches: &[datafusion::arrow::array::RecordBatch]) -> u64 {
    use datafusion::arrow::array::BooleanArray;
    let mut count = 0u64;
    for batch in batches {
        if let Some(col) = batch.columns().last() {
            if let Some(array) = col.as_any().downcast_ref::<BooleanArray>() {
                count += (0..array.len()).filter(|i| array.value(*i)).count() as u64;
            }
        }
    }
    count
}

async fn rename_table(session: &mut AnalyticSession, from: &str, to: &str) -> Result<()> {
    let sql = format!("SELECT * FROM {from}");
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(to, batches)?;
    session.unregister_table(from);
    Ok(())
}

/// Casts a recovered VARCHAR column to DATE/DOUBLE/BOOLEAN when at least
/// 90% of its non-null values survive the cast and none of them look like
/// a zero-padded identifier (a leading zero that `try_cast AS BIGINT`
/// still accepts, e.g. a zip code). Leading-zero columns are left as text
/// so the Quality Scanner can flag them for the cleaning engine instead.
async fn safe_type_coercion(session: &mut AnalyticSession, table_name: &str) -> Result<()> {
    let columns = varchar_columns(session, table_name).await?;
    for column in columns {
        let sql = format!(
            "SELECT \
             COUNT(*) FILTER (WHERE \"{column}\" IS NOT NULL) AS non_null, \
             COUNT(*) FILTER (WHERE try_cast(\"{column}\" AS DOUBLE) IS NOT NULL) AS castable_double, \
             COUNT(*) FILTER (WHERE try_cast(\"{column}\" AS DATE) IS NOT NULL) AS castable_date, \
             COUNT(*) FILTER (WHERE lower(trim(\"{column}\")) IN ('true','false','yes','no','y','n','1','0')) AS castable_boolean, \
             COUNT(*) FILTER (WHERE \"{column}\" LIKE '0%' AND length(\"{column}\") > 1 AND try_cast(\"{column}\" AS BIGINT) IS NOT NULL) AS leading_zero \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let row = match first_row(&batches) {
            Some(row) => row,
            None => continue,
        };

        let non_null = scalar_count_at(&row, 0);
        if non_null == 0 {
            continue;
        }
        let leading_zero = scalar_count_at(&row, 4);
        if leading_zero > 0 {
            continue;
        }

        let double_rate = scalar_count_at(&row, 1) as f64 / non_null as f64;
        let date_rate = scalar_count_at(&row, 2) as f64 / non_null as f64;
        let boolean_rate = scalar_count_at(&row, 3) as f64 / non_null as f64;

        let expr = if date_rate >= COERCION_RATE_THRESHOLD {
            format!("to_char(try_cast(\"{column}\" AS DATE), '%Y-%m-%d')")
        } else if double_rate >= COERCION_RATE_THRESHOLD {
            format!("try_cast(\"{column}\" AS DOUBLE)")
        } else if boolean_rate >= COERCION_RATE_THRESHOLD {
            format!("try_cast(\"{column}\" AS BOOLEAN)")
        } else {
            continue;
        };
        rebuild_with_expr(session, table_name, &column, &expr).await?;
    }
    Ok(())
}

async fn varchar_columns(session: &AnalyticSession, table_name: &str) -> Result<Vec<String>> {
    let columns = session.column_names(table_name).await?;
    let batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let schema = match batches.first() {
        Some(batch) => batch.schema(),
        None => return Ok(Vec::new()),
    };
    Ok(columns
        .into_iter()
        .filter(|c| {
            schema
                .field_with_name(c)
                .map(|f| matches!(f.data_type(), datafusion::arrow::datatypes::DataType::Utf8))
                .unwrap_or(false)
        })
        .collect())
}

/// Rebuilds `table_name` replacing `column` with `expr`, keeping every
/// other column unchanged and in its original position.
async fn rebuild_with_expr(
    session: &mut AnalyticSession,
    table_name: &str,
    column: &str,
    expr: &str,
) -> Result<()> {
    let columns = session.column_names(table_name).await?;
    let select_list = columns
        .iter()
        .map(|c| {
            if c == column {
                format!("{expr} AS \"{c}\"")
            } else {
                format!("\"{c}\"")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {table_name}");
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(table_name, batches)?;
    Ok(())
}

fn first_row(
    batches: &[datafusion::arrow::array::RecordBatch],
) -> Option<datafusion::arrow::array::RecordBatch> {
    batches.iter().find(|b| b.num_rows() > 0).cloned()
}

fn scalar_count_at(batch: &datafusion::arrow::array::RecordBatch, col: usize) -> u64 {
    use datafusion::arrow::array::Int64Array;
    if batch.num_rows() == 0 {
        return 0;
    }
    batch
        .column(col)
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(0).max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::classifier::ColumnSample;
    use pipeline_core::model::PiiFinding;
    use pipeline_core::FailOpenClassifier;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-csv-loader-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn well_formed_csv_loads_on_fast_path() {
        let path = write_temp(
            "orders.csv",
            "OrderID,CustomerName,Total,Region\n1,Ann,10.5,NY\n2,Bob,20,CA\n",
        );
        let mut session = AnalyticSession::new();
        let outcome = load_csv(&mut session, &path, "orders", &FailOpenClassifier)
            .await
            .unwrap();
        assert_eq!(outcome.loaded_rows, 2);
        assert_eq!(outcome.parse_strategy, "fast_path");
        assert_eq!(session.row_count("orders").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fast_path_normalizes_column_names() {
        let path = write_temp(
            "orders2.csv",
            "OrderID,CustomerName,Total,Region\n1,Ann,10.5,NY\n2,Bob,20,CA\n",
        );
        let mut session = AnalyticSession::new();
        load_csv(&mut session, &path, "orders2", &FailOpenClassifier)
            .await
            .unwrap();
        let columns = session.column_names("orders2").await.unwrap();
        assert!(columns.contains(&"order_id".to_string()));
        assert!(columns.contains(&"customer_name".to_string()));
    }

    #[tokio::test]
    async fn overflow_columns_are_detected_and_repaired() {
        let path = write_temp(
            "shifted.csv",
            "a,b,c,d,e\n\
             1,x,,,\n\
             2,y,,,\n\
             3,z,,,extra\n\
             4,w,,,\n\
             5,v,,,\n",
        );
        let mut session = AnalyticSession::new();
        let outcome = load_csv(&mut session, &path, "shifted", &FailOpenClassifier)
            .await
            .unwrap();
        assert!(outcome.overflow_columns_repaired.contains(&"c".to_string()));
        let columns = session.column_names("shifted").await.unwrap();
        assert!(columns.contains(&"is_shifted".to_string()));
    }

    #[tokio::test]
    async fn safe_type_coercion_casts_mostly_numeric_varchar_column() {
        use datafusion::arrow::array::StringArray;
        use datafusion::arrow::datatypes::{DataType, Field, Schema};

        let schema = std::sync::Arc::new(Schema::new(vec![Field::new("amount", DataType::Utf8, true)]));
        let batch = datafusion::arrow::array::RecordBatch::try_new(
            schema,
            vec![std::sync::Arc::new(StringArray::from(vec![
                "10.5", "20.25", "30.75", "40.1", "50.9",
            ]))],
        )
        .unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("amounts", vec![batch]).unwrap();

        safe_type_coercion(&mut session, "amounts").await.unwrap();

        let batches = session
            .execute_unchecked("SELECT amount FROM amounts")
            .await
            .unwrap();
        let field = batches[0].schema().field_with_name("amount").unwrap().clone();
        assert_eq!(field.data_type(), &DataType::Float64);
    }

    #[tokio::test]
    async fn safe_type_coercion_leaves_leading_zero_column_as_text() {
        use datafusion::arrow::array::StringArray;
        use datafusion::arrow::datatypes::{DataType, Field, Schema};

        let schema = std::sync::Arc::new(Schema::new(vec![Field::new("zip", DataType::Utf8, true)]));
        let batch = datafusion::arrow::array::RecordBatch::try_new(
            schema,
            vec![std::sync::Arc::new(StringArray::from(vec![
                "02139", "02139", "94043", "94043", "10001",
            ]))],
        )
        .unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("zips", vec![batch]).unwrap();

        safe_type_coercion(&mut session, "zips").await.unwrap();

        let batches = session.execute_unchecked("SELECT zip FROM zips").await.unwrap();
        let field = batches[0].schema().field_with_name("zip").unwrap().clone();
        assert_eq!(field.data_type(), &DataType::Utf8);
    }

    struct AlwaysDataClassifier;

    #[async_trait::async_trait]
    impl Classifier for AlwaysDataClassifier {
        async fn detect_header(&self, _first_lines: &[String]) -> anyhow::Result<HeaderVerdict> {
            Ok(HeaderVerdict::Data)
        }
        async fn detect_pii(&self, _samples: &[ColumnSample]) -> anyhow::Result<Vec<PiiFinding>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn injected_classifier_overrides_header_detection_in_recovery_path() {
        let path = write_temp("headerless.csv", "1,Ann\n2,Bob\n");
        let mut session = AnalyticSession::new();
        let outcome = load_csv_recovery(&mut session, &path, "headerless", ',', &AlwaysDataClassifier)
            .await
            .unwrap();
        assert!(!outcome.is_header_detected);
        assert_eq!(outcome.loaded_rows, 2);
    }
}
