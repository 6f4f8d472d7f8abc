//! End-to-end scenarios covering load, quality scan, and cleaning acting
//! together over one table, plus the safe-exec refusal path they all rely
//! on. Each test here exercises the same sequence the orchestrator drives,
//! short of the object-storage and lakehouse stages.

use pipeline_core::FailOpenClassifier;
use pipeline_io::{load_csv, load_json, AnalyticSession};
use pipeline_tx::{clean_table, scan_table};

fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("pipeline-tx-end-to-end-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn well_formed_csv_is_clean() {
    let path = write_temp(
        "orders.csv",
        "OrderID,CustomerName,Total,Region\n\
         1,Ann,10.5,NY\n\
         2,Bob,20,CA\n\
         3,Cara,15.25,WA\n\
         4,Deb,30,NY\n\
         5,Eli,12,CA\n",
    );
    let mut session = AnalyticSession::new();
    let outcome = load_csv(&mut session, &path, "orders", &FailOpenClassifier).await.unwrap();
    assert_eq!(outcome.loaded_rows, 5);

    let columns = session.column_names("orders").await.unwrap();
    assert_eq!(columns.len(), 4);
    assert!(columns.contains(&"order_id".to_string()));
    assert!(columns.contains(&"customer_name".to_string()));

    let scan = scan_table(&session, "orders").await.unwrap();
    let clean = clean_table(&mut session, "orders", &scan.findings, &FailOpenClassifier).await.unwrap();

    assert_eq!(clean.after_rows, 5);
    let severity_is_blocking = scan
        .findings
        .iter()
        .any(|f| f.severity == pipeline_core::Severity::Critical);
    assert!(!severity_is_blocking, "well-formed data should not raise critical findings");
}

#[tokio::test]
async fn leading_zero_zip_column_is_preserved_as_text() {
    let path = write_temp(
        "zips.csv",
        "name,zip_code\n\
         Alice,07102\n\
         Bob,08901\n\
         Cara,07103\n\
         Dee,08902\n\
         Eli,07104\n",
    );
    let mut session = AnalyticSession::new();
    load_csv(&mut session, &path, "zips", &FailOpenClassifier).await.unwrap();

    let scan = scan_table(&session, "zips").await.unwrap();
    let flagged = scan.findings.iter().any(|f| matches!(
        &f.category,
        pipeline_core::model::FindingCategory::TypeAnalysis { column, leading_zero_count, suggested_cast, .. }
            if column == "zip_code" && *leading_zero_count > 0 && suggested_cast.is_none()
    ));
    assert!(flagged, "zip_code should be flagged with a leading-zero count and no suggested cast");

    let clean = clean_table(&mut session, "zips", &scan.findings, &FailOpenClassifier).await.unwrap();
    let identifier = clean
        .identifier_columns
        .iter()
        .find(|c| c.column == "zip_code")
        .expect("zip_code should be recorded as an identifier column");
    assert_eq!(identifier.pattern, "leading_zero");
    assert_eq!(identifier.preserved_as, "text");

    let probe = session.execute_unchecked("SELECT zip_code FROM zips").await.unwrap();
    let field = probe.first().unwrap().schema().field_with_name("zip_code").unwrap().clone();
    assert_eq!(field.data_type(), &datafusion::arrow::datatypes::DataType::Utf8);
}

#[tokio::test]
async fn null_like_sentinels_are_normalized_to_null() {
    let path = write_temp(
        "contacts.csv",
        "name,phone\n\
         Alice,NULL\n\
         Bob,N/A\n\
         Cara,None\n\
         Dee,n/a\n\
         Eli,555-0100\n",
    );
    let mut session = AnalyticSession::new();
    load_csv(&mut session, &path, "contacts", &FailOpenClassifier).await.unwrap();

    let scan = scan_table(&session, "contacts").await.unwrap();
    let has_null_like = scan
        .findings
        .iter()
        .any(|f| matches!(&f.category, pipeline_core::model::FindingCategory::NullLikeStrings { column, .. } if column == "phone"));
    assert!(has_null_like);

    let clean = clean_table(&mut session, "contacts", &scan.findings, &FailOpenClassifier).await.unwrap();
    assert!(clean
        .operations
        .iter()
        .any(|op| op.operation == "null_like_normalization"));

    let batches = session
        .execute_unchecked("SELECT phone FROM contacts WHERE phone IS NULL")
        .await
        .unwrap();
    let null_count: usize = batches.iter().map(|b| b.num_rows()).sum();
    assert_eq!(null_count, 4);
}

#[tokio::test]
async fn column_overflow_from_unquoted_commas_is_repaired() {
    let path = write_temp(
        "shifted.csv",
        "id,name,notes,extra,more\n\
         1,Ann,,,\n\
         2,Bob,,,\n\
         3,Cara,unexpected, comma, here\n\
         4,Deb,,,\n\
         5,Eli,,,\n",
    );
    let mut session = AnalyticSession::new();
    let outcome = load_csv(&mut session, &path, "shifted", &FailOpenClassifier).await.unwrap();

    assert!(!outcome.overflow_columns_repaired.is_empty());
    assert!(outcome.overflow_rows_flagged >= 1);

    let columns = session.column_names("shifted").await.unwrap();
    assert!(columns.contains(&"is_shifted".to_string()));
    assert_eq!(session.row_count("shifted").await.unwrap(), 5);
}

#[tokio::test]
async fn unrepairable_jsonl_fails_without_registering_a_table() {
    let path = write_temp(
        "broken.jsonl",
        "{\"id\":1,\"name\":\"Ann\"}\nthis is not json at all\n",
    );
    let mut session = AnalyticSession::new();
    let result = load_json(&mut session, &path, "broken").await;

    assert!(result.is_err());
    assert!(!session.registered_tables().iter().any(|t| t == "broken"));
}

#[tokio::test]
async fn destructive_sql_is_refused_with_rejected_sql_echoed() {
    let path = write_temp("t.csv", "id\n1\n2\n");
    let mut session = AnalyticSession::new();
    load_csv(&mut session, &path, "t", &FailOpenClassifier).await.unwrap();

    let sql = "DELETE FROM t";
    let result = session.execute_safe(sql).await;
    let err = result.expect_err("destructive statements must be rejected");
    let message = err.to_string();
    assert!(message.contains("destructive SQL rejected"));
    assert!(message.contains(sql));
}
