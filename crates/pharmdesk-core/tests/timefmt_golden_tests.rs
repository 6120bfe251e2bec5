//! Golden tests for timestamp display.
//!
//! Each case decodes a stored JSON time value the way the store does and
//! checks all three renderings in UTC.

use pharmdesk_core::timefmt::{RawTime, ServerTimestamp, TimeFormatter};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Test case from golden file.
struct GoldenCase {
    id: &'static str,
    stored: Value,
    expected_time: &'static str,
    expected_date: &'static str,
    expected_long_date: &'static str,
}

fn get_golden_cases() -> Vec<GoldenCase> {
    vec![
        GoldenCase {
            id: "null",
            stored: Value::Null,
            expected_time: "",
            expected_date: "N/A",
            expected_long_date: "N/A",
        },
        GoldenCase {
            id: "client-seconds-nanoseconds",
            stored: json!({ "seconds": 1_700_000_000, "nanoseconds": 500_000_000 }),
            expected_time: "10:13 PM",
            expected_date: "11/14/2023",
            expected_long_date: "Nov 14, 2023",
        },
        GoldenCase {
            id: "admin-underscore-seconds",
            stored: json!({ "_seconds": 1_704_103_200, "_nanoseconds": 0 }),
            expected_time: "10:00 AM",
            expected_date: "1/1/2024",
            expected_long_date: "Jan 1, 2024",
        },
        GoldenCase {
            id: "preformatted-string",
            stored: json!("2024-01-15"),
            expected_time: "2024-01-15",
            expected_date: "2024-01-15",
            expected_long_date: "2024-01-15",
        },
        GoldenCase {
            id: "display-string",
            stored: json!("Yesterday"),
            expected_time: "Yesterday",
            expected_date: "Yesterday",
            expected_long_date: "Yesterday",
        },
        GoldenCase {
            id: "epoch-millis-number",
            stored: json!(1_709_985_600_000_i64),
            expected_time: "12:00 PM",
            expected_date: "3/9/2024",
            expected_long_date: "Mar 9, 2024",
        },
        GoldenCase {
            id: "object-without-seconds",
            stored: json!({ "when": "later" }),
            expected_time: "Invalid time",
            expected_date: "Invalid date",
            expected_long_date: "Invalid date",
        },
        GoldenCase {
            id: "boolean",
            stored: json!(true),
            expected_time: "Invalid time",
            expected_date: "Invalid date",
            expected_long_date: "Invalid date",
        },
        GoldenCase {
            id: "seconds-overflow",
            stored: json!({ "seconds": i64::MAX, "nanoseconds": 0 }),
            expected_time: "Invalid time",
            expected_date: "Invalid date",
            expected_long_date: "Invalid date",
        },
    ]
}

#[test]
fn test_golden_cases() {
    let formatter = TimeFormatter::utc();

    for case in get_golden_cases() {
        let raw = RawTime::from(&case.stored);

        assert_eq!(
            formatter.format_time(&raw),
            case.expected_time,
            "Case {}: time mismatch",
            case.id
        );
        assert_eq!(
            formatter.format_date(&raw),
            case.expected_date,
            "Case {}: date mismatch",
            case.id
        );
        assert_eq!(
            formatter.format_long_date(&raw),
            case.expected_long_date,
            "Case {}: long date mismatch",
            case.id
        );
    }
}

#[test]
fn test_unresolved_server_timestamp_renders_empty() {
    let formatter = TimeFormatter::utc();
    let pending = RawTime::Server(ServerTimestamp::pending());

    assert_eq!(formatter.format_time(&pending), "");
    assert_eq!(formatter.format_date(&pending), "N/A");
}

#[test]
fn test_display_offset() {
    let formatter = TimeFormatter::from_offset_minutes(-5 * 60).unwrap();
    let raw = RawTime::from(&json!({ "seconds": 1_704_103_200, "nanoseconds": 0 }));

    assert_eq!(formatter.format_time(&raw), "05:00 AM");
    assert_eq!(formatter.format_date(&raw), "1/1/2024");
}

#[test]
fn test_stored_shape_survives_serde() {
    let raw = RawTime::from(&json!({ "_seconds": 1_704_103_200, "_nanoseconds": 0 }));
    let encoded = serde_json::to_value(&raw).unwrap();
    assert_eq!(encoded, json!({ "seconds": 1_704_103_200, "nanoseconds": 0 }));

    let decoded: RawTime = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded.to_instant(), raw.to_instant());
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        any::<f64>().prop_map(|f| json!(f)),
        ".*".prop_map(Value::String),
        (any::<i64>(), any::<i64>())
            .prop_map(|(s, n)| json!({ "seconds": s, "nanoseconds": n })),
        (any::<i64>(), any::<i64>())
            .prop_map(|(s, n)| json!({ "_seconds": s, "_nanoseconds": n })),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::Array)
    })
}

proptest! {
    #[test]
    fn prop_formatting_never_panics_and_is_deterministic(value in arb_json()) {
        let formatter = TimeFormatter::utc();
        let raw = RawTime::from(&value);

        let first = (
            formatter.format_time(&raw),
            formatter.format_date(&raw),
            formatter.format_long_date(&raw),
        );
        let second = (
            formatter.format_time(&raw),
            formatter.format_date(&raw),
            formatter.format_long_date(&raw),
        );
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_unusable_values_use_fallback_labels(value in prop::collection::vec(any::<bool>(), 0..4)) {
        let formatter = TimeFormatter::utc();
        let raw = RawTime::from(&json!(value));

        prop_assert_eq!(formatter.format_time(&raw), "Invalid time");
        prop_assert_eq!(formatter.format_date(&raw), "Invalid date");
    }
}
