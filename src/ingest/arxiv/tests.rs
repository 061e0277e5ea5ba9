use super::*;
use std::io::Cursor;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn default_filter() -> SnapshotFilter {
    SnapshotFilter::new("cs.", date(2020, 1, 1), date(2024, 12, 31))
}

fn line(id: &str, categories: &str, update_date: &str) -> String {
    serde_json::json!({
        "id": id,
        "submitter": "Someone",
        "authors": "A. One, B. Two",
        "title": "A title",
        "categories": categories,
        "abstract": "  An abstract with six words.  ",
        "update_date": update_date,
        "versions": [{"version": "v1"}]
    })
    .to_string()
}

#[test]
fn parses_snapshot_record() {
    let record: ArxivRecord =
        serde_json::from_str(&line("2101.00001", "cs.LG stat.ML", "2021-01-04"))
            .expect("valid record");

    assert_eq!(record.id, "2101.00001");
    assert_eq!(record.authors, "A. One, B. Two");
    assert_eq!(record.parsed_update_date(), Some(date(2021, 1, 4)));
    assert_eq!(record.word_count(), 5);
}

#[test]
fn filter_matches_category_case_insensitively() {
    let filter = default_filter();
    let upper: ArxivRecord =
        serde_json::from_str(&line("1", "CS.AI", "2022-02-02")).expect("valid record");
    let physics: ArxivRecord =
        serde_json::from_str(&line("2", "physics.optics", "2022-02-02")).expect("valid record");
    // Substring match also accepts codes like "physics.comp-ph cs.NA"
    let cross: ArxivRecord =
        serde_json::from_str(&line("3", "physics.comp-ph cs.NA", "2022-02-02"))
            .expect("valid record");

    assert!(filter.matches(&upper));
    assert!(!filter.matches(&physics));
    assert!(filter.matches(&cross));
}

#[test]
fn filter_date_window_is_inclusive() {
    let filter = default_filter();
    let parse = |d: &str| -> ArxivRecord {
        serde_json::from_str(&line("x", "cs.CV", d)).expect("valid record")
    };

    assert!(filter.matches(&parse("2020-01-01")));
    assert!(filter.matches(&parse("2024-12-31")));
    assert!(!filter.matches(&parse("2019-12-31")));
    assert!(!filter.matches(&parse("2025-01-01")));
    assert!(!filter.matches(&parse("not a date")));
}

#[test]
fn collect_counts_malformed_lines() {
    let input = [
        line("a", "cs.LG", "2021-05-05"),
        "{ not json".to_string(),
        String::new(),
        line("b", "math.AG", "2021-05-05"),
        r#"{"id": "c"}"#.to_string(),
        line("d", "cs.CL", "2023-01-01"),
    ]
    .join("\n");

    let (records, summary) =
        collect_from_reader(Cursor::new(input), &default_filter()).expect("reading succeeds");

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "d"]);
    assert_eq!(
        summary,
        SnapshotSummary {
            lines: 5,
            kept: 2,
            malformed: 2,
        }
    );
}

#[test]
fn missing_file_is_an_error() {
    let result = collect_snapshot(Path::new("/nonexistent/snapshot.json"), &default_filter());
    assert!(result.is_err());
}
