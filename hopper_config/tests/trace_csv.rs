use std::fs::File;
use std::io::Write;

use hopper_config::{RegisterTrace, TraceRow, load_trace_csv};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn trace_from_rows_keeps_order_and_span() {
    let rows = vec![
        TraceRow {
            elapsed_ms: 120,
            value: 1,
        },
        TraceRow {
            elapsed_ms: 35,
            value: 0,
        },
        TraceRow {
            elapsed_ms: 200,
            value: 1,
        },
    ];
    let trace = RegisterTrace::from_rows(rows).unwrap();
    assert_eq!(trace.rows.len(), 3);
    assert_eq!(trace.span_ms(), 355);
    assert_eq!(trace.rows[1].value, 0);
}

#[rstest]
fn trace_rejects_empty_rows() {
    let err = RegisterTrace::from_rows(Vec::new()).unwrap_err();
    assert!(format!("{err}").contains("at least one row"));
}

#[rstest]
fn trace_rejects_zero_elapsed_row() {
    let rows = vec![
        TraceRow {
            elapsed_ms: 50,
            value: 1,
        },
        TraceRow {
            elapsed_ms: 0,
            value: 0,
        },
    ];
    let err = RegisterTrace::from_rows(rows).unwrap_err();
    assert!(format!("{err}").contains("zero elapsed_ms"));
}

#[rstest]
fn csv_loader_happy_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "elapsed_ms,value").unwrap();
    writeln!(f, "120,1").unwrap();
    writeln!(f, "35,0").unwrap();
    drop(f);

    let trace = load_trace_csv(&path).unwrap();
    assert_eq!(trace.rows.len(), 2);
    assert_eq!(trace.rows[0].elapsed_ms, 120);
    assert_eq!(trace.rows[0].value, 1);
}

#[rstest]
fn csv_loader_rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "ms,register").unwrap();
    writeln!(f, "120,1").unwrap();
    drop(f);

    let err = load_trace_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("must have headers 'elapsed_ms,value'"));
}

#[rstest]
fn csv_loader_reports_bad_row_with_line_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "elapsed_ms,value").unwrap();
    writeln!(f, "120,1").unwrap();
    writeln!(f, "oops,2").unwrap();
    drop(f);

    let err = load_trace_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[rstest]
fn csv_loader_rejects_out_of_range_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "elapsed_ms,value").unwrap();
    writeln!(f, "120,999").unwrap();
    drop(f);

    assert!(load_trace_csv(&path).is_err());
}
