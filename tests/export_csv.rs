use std::sync::Arc;

use offerline::{
    write_feature_table, write_training_table, write_training_table_file, ChannelFlags,
    CustomerProfile, Event, EventKind, Gender, OfferCatalog, OfferDefinition, OfferType,
    PipelineConfig, ProfileTable, SnapshotPipeline,
};
use tempfile::TempDir;

fn pipeline() -> SnapshotPipeline {
    let catalog = OfferCatalog::new(vec![OfferDefinition {
        offer_id: "offer-a".to_string(),
        code: "b.10.10.7".to_string(),
        offer_type: OfferType::Bogo,
        difficulty: 10.0,
        reward: 10.0,
        duration_hours: 168,
        channels: ChannelFlags {
            email: true,
            mobile: false,
            social: false,
            web: true,
        },
    }])
    .expect("catalog should build");
    let profiles = ProfileTable::new(vec![CustomerProfile {
        customer_id: "C1".to_string(),
        age: 55,
        income: None,
        enrollment_time: 408_000,
        gender: Some(Gender::Female),
    }])
    .expect("profiles should build");
    SnapshotPipeline::new(
        Arc::new(catalog),
        Arc::new(profiles),
        &PipelineConfig::default(),
    )
    .expect("pipeline should build")
}

fn events() -> Vec<Event> {
    vec![
        Event::offer("C1", 1, 0, EventKind::OfferReceived, "offer-a"),
        Event::transaction("C1", 2, 6, 12.5),
        Event::offer("C1", 3, 6, EventKind::OfferCompleted, "offer-a").with_reward(10.0),
        Event::transaction("C1", 4, 200, 3.0),
    ]
}

fn parse(bytes: &[u8]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_reader(bytes);
    let header = reader
        .headers()
        .expect("header row")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("csv record").iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

#[test]
fn feature_table_csv_has_key_columns_then_schema_columns() {
    let pipeline = pipeline();
    let log = pipeline.event_log(events()).expect("event log");
    let table = pipeline.build_features(&log).expect("features");

    let mut buf = Vec::new();
    let rows = write_feature_table(&mut buf, &table).expect("write features");
    assert_eq!(rows, 4);

    let (header, records) = parse(&buf);
    assert_eq!(&header[..4], ["customer_id", "event", "offer_id", "offer_code"]);
    assert_eq!(header.len(), 4 + pipeline.schema().len());
    assert_eq!(records.len(), 4);

    let col = |name: &str| header.iter().position(|h| h == name).expect("column");
    assert_eq!(records[0][1], "offer_received");
    assert_eq!(records[0][3], "b.10.10.7");
    assert_eq!(records[1][2], "");
    assert_eq!(records[1][3], "");
    assert_eq!(records[0][col("income")], "");
    assert_eq!(records[0][col("average_transaction_value")], "");
    assert_eq!(records[2][col("cum_spending")], "12.5");
    assert_eq!(records[2][col("active_b.10.10.7")], "1");
    assert_eq!(records[0][col("gender_f")], "1");
}

#[test]
fn training_table_file_is_written_with_target_columns() {
    let pipeline = pipeline();
    let log = pipeline.event_log(events()).expect("event log");
    let table = pipeline.build_training_table(&log).expect("training table");

    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("out").join("training.csv");
    let rows = write_training_table_file(&path, &table).expect("write training table");
    assert_eq!(rows, 1);

    let bytes = std::fs::read(&path).expect("output exists");
    let (header, records) = parse(&bytes);
    assert_eq!(header.last().map(String::as_str), Some("spending_next_168h"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].last().map(String::as_str), Some("12.5"));

    let mut in_memory = Vec::new();
    write_training_table(&mut in_memory, &table).expect("write in memory");
    assert_eq!(in_memory, bytes);
}

#[test]
fn censored_labels_are_written_as_empty_cells() {
    let pipeline = pipeline();
    let log = pipeline
        .event_log(vec![
            Event::offer("C1", 1, 0, EventKind::OfferReceived, "offer-a"),
            Event::transaction("C1", 2, 20, 4.0),
        ])
        .expect("event log");
    let table = pipeline.build_training_table(&log).expect("training table");

    let mut buf = Vec::new();
    write_training_table(&mut buf, &table).expect("write training table");
    let (_, records) = parse(&buf);
    assert_eq!(records[0].last().map(String::as_str), Some(""));
}
