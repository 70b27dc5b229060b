use corruption_sim::{StageId, StageTable, StageTableError};

const TABLE: &str = r#"{
  "awakening_stage": 1,
  "equilibrium_stage": 2,
  "late_stage": 3,
  "base_delta": 2,
  "stages": [
    { "name": "calm", "threshold": 0 },
    { "name": "stirring", "threshold": 100 },
    { "name": "duplicate", "threshold": 100 },
    { "name": "rising", "threshold": 500 },
    { "name": "regressed", "threshold": 300 },
    { "name": "overrun", "threshold": 1000 }
  ]
}"#;

#[test]
fn non_increasing_rows_are_dropped() {
    let table = StageTable::from_json_str(TABLE).expect("table parses");
    let names: Vec<&str> = table.stages().iter().map(|stage| stage.name.as_str()).collect();
    assert_eq!(names, ["calm", "stirring", "rising", "overrun"]);
    insta::assert_snapshot!(table.threshold_summary(), @"0:0 1:100 2:500 3:1000");
    assert_eq!(table.highest(), StageId(3));
}

#[test]
fn thresholds_must_be_strictly_exceeded() {
    let table = StageTable::from_json_str(TABLE).expect("table parses");
    assert_eq!(table.stage_for_total(0), StageId(0));
    assert_eq!(table.stage_for_total(100), StageId(0));
    assert_eq!(table.stage_for_total(101), StageId(1));
    assert_eq!(table.stage_for_total(1_000), StageId(2));
    assert_eq!(table.stage_for_total(i64::MAX), StageId(3));
    assert_eq!(table.stage_for_total(-50), StageId(0));
}

#[test]
fn base_delta_flips_at_equilibrium() {
    let table = StageTable::from_json_str(TABLE).expect("table parses");
    assert_eq!(table.base_delta(StageId(1)), -2);
    assert_eq!(table.base_delta(StageId(2)), 0);
    assert_eq!(table.base_delta(StageId(3)), 2);
    assert!(table.is_awakened(StageId(1)));
    assert!(!table.is_late(StageId(2)));
}

#[test]
fn table_without_rows_is_rejected() {
    let err = StageTable::from_json_str(r#"{ "stages": [] }"#).expect_err("empty table");
    assert!(matches!(err, StageTableError::Empty));
}

#[test]
fn table_loads_from_file() {
    let path = std::env::temp_dir().join(format!("stage_table_{}.json", std::process::id()));
    std::fs::write(&path, TABLE).expect("write table");
    let table = StageTable::from_file(&path).expect("table loads");
    assert_eq!(table.len(), 4);
    assert_eq!(table.starting_progress(StageId(2)), 501);
    let _ = std::fs::remove_file(&path);

    let missing = StageTable::from_file(&path).expect_err("file removed");
    assert!(matches!(missing, StageTableError::Read { .. }));
}
