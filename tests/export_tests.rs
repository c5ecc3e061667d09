use iqrscope::export::{merged_table, write_csv, write_json, write_json_lines, ReportSummary};
use iqrscope::processor::{process_all, BatchOpts};
use iqrscope::table::{Dataset, Value};

fn sensors() -> Dataset {
    Dataset::from_columns(vec![
        ("temperature", [20.0, 22.0, 21.0, 50.0, 19.0, 18.0, 20.0, 21.0, 100.0, 22.0].map(Value::from).to_vec()),
        ("humidity", [60.0, 62.0, 61.0, 59.0, 58.0, 200.0, 61.0, 60.0, 59.0, 62.0].map(Value::from).to_vec()),
        ("site", ["a", "b", "a", "d", "a", "b", "a", "b", "a", "b"].map(Value::from).to_vec()),
    ])
    .unwrap()
}

fn to_string(buf: Vec<u8>) -> String {
    String::from_utf8(buf).unwrap()
}

#[test]
fn merged_table_appends_marker_columns() {
    let ds = sensors();
    let report = process_all(&ds, &BatchOpts::default());
    let merged = merged_table(&report).unwrap();

    let names: Vec<&str> = merged.schema().names().collect();
    assert_eq!(names, vec!["temperature", "humidity", "site", "anomaly", "anomaly_column"]);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.rows()[0][..3], ds.rows()[3][..]);
    assert_eq!(merged.rows()[0][3], Value::from("50 temperature"));
    assert_eq!(merged.rows()[0][4], Value::from("temperature"));
    assert_eq!(merged.rows()[2][3], Value::from("200 humidity"));
}

#[test]
fn csv_export() {
    let ds = sensors();
    let report = process_all(&ds, &BatchOpts::default());
    let mut buf = Vec::new();
    write_csv(&mut buf, &merged_table(&report).unwrap()).unwrap();
    let text = to_string(buf);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "temperature,humidity,site,anomaly,anomaly_column");
    assert_eq!(lines[1], "50,59,d,50 temperature,temperature");
    assert_eq!(lines[3], "18,200,b,200 humidity,humidity");
}

#[test]
fn json_export() {
    let ds = sensors();
    let report = process_all(&ds, &BatchOpts::default());
    let mut buf = Vec::new();
    write_json(&mut buf, &merged_table(&report).unwrap()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&to_string(buf)).unwrap();
    let arr = parsed.as_array().unwrap();
    assert_eq!(arr.len(), 3);
    assert_eq!(arr[0]["anomaly"], "50 temperature");
    assert_eq!(arr[0]["temperature"], serde_json::json!(50.0));
    assert_eq!(arr[2]["anomaly_column"], "humidity");
    let keys: Vec<&str> = arr[0].as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["temperature", "humidity", "site", "anomaly", "anomaly_column"]);
}

#[test]
fn json_lines_export() {
    let ds = sensors();
    let report = process_all(&ds, &BatchOpts::default());
    let mut buf = Vec::new();
    write_json_lines(&mut buf, &merged_table(&report).unwrap()).unwrap();
    let text = to_string(buf);
    let records: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1]["anomaly"], "100 temperature");
}

#[test]
fn empty_report_exports() {
    let ds = Dataset::from_columns(vec![("value", (10..=20).map(Value::from).collect())]).unwrap();
    let report = process_all(&ds, &BatchOpts::default());
    assert_eq!(report.columns.len(), 1);
    let merged = merged_table(&report).unwrap();
    assert!(merged.is_empty());

    let mut buf = Vec::new();
    write_json(&mut buf, &merged).unwrap();
    assert_eq!(to_string(buf), "[]\n");

    let mut buf = Vec::new();
    write_csv(&mut buf, &merged).unwrap();
    assert_eq!(to_string(buf), "value,anomaly,anomaly_column\n");

    let mut buf = Vec::new();
    write_json_lines(&mut buf, &merged).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn missing_cells_export_as_blank_and_null() {
    let ds = Dataset::from_columns(vec![
        ("value", [1.0, 2.0, 3.0, 4.0, 1000.0].map(Value::from).to_vec()),
        ("note", vec![Value::from("x"), Value::from("y"), Value::Missing, Value::from("z"), Value::Missing]),
    ])
    .unwrap();
    let report = process_all(&ds, &BatchOpts::default());
    let merged = merged_table(&report).unwrap();

    let mut buf = Vec::new();
    write_csv(&mut buf, &merged).unwrap();
    assert_eq!(to_string(buf).lines().nth(1), Some("1000,,1000 value,value"));

    let mut buf = Vec::new();
    write_json_lines(&mut buf, &merged).unwrap();
    let rec: serde_json::Value = serde_json::from_slice(&buf).unwrap();
    assert!(rec["note"].is_null());
}

#[test]
fn marker_column_names_avoid_collisions() {
    let ds = Dataset::from_columns(vec![
        ("value", [10.0, 12.0, 11.0, 100.0, 9.0].map(Value::from).to_vec()),
        ("anomaly", ["n", "n", "n", "y", "n"].map(Value::from).to_vec()),
    ])
    .unwrap();
    let report = process_all(&ds, &BatchOpts::default());
    let merged = merged_table(&report).unwrap();
    let names: Vec<&str> = merged.schema().names().collect();
    assert_eq!(names, vec!["value", "anomaly", "anomaly_", "anomaly_column"]);
    assert_eq!(merged.rows()[0][1], Value::from("y"));
    assert_eq!(merged.rows()[0][2], Value::from("100 value"));
}

#[test]
fn summary_reports_per_column_bounds() {
    let ds = sensors();
    let report = process_all(&ds, &BatchOpts::default());
    let summary = ReportSummary::from_report(&report);
    assert_eq!(summary.total_rows, 10);
    assert_eq!(summary.total_anomalies, 3);
    assert_eq!(summary.columns.len(), 2);

    let temp = &summary.columns[0];
    assert_eq!(temp.column, "temperature");
    assert_eq!((temp.q1, temp.q3, temp.iqr), (20.0, 22.0, 2.0));
    assert_eq!((temp.lower, temp.upper), (17.0, 25.0));
    assert_eq!(temp.anomaly_count, 2);
    assert_eq!(temp.rows, vec![3, 8]);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["columns"][1]["column"], "humidity");
    assert_eq!(json["columns"][1]["rows"], serde_json::json!([5]));
}
