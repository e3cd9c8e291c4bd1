//! Tests for merge operators
//!
//! These tests verify:
//! - MergeValue encoding and rejection of malformed bytes
//! - Combinator table lookup
//! - merge() on absent, plain and accumulated values
//! - Ordered append and checked counter addition

use stratakv::merge::{merge, MergeKind, MergeValue, COMBINATORS};
use stratakv::StrataError;

fn appender(bytes: &[u8]) -> Vec<u8> {
    MergeValue::Appender(bytes.to_vec()).encode().unwrap()
}

fn counter(n: i64) -> Vec<u8> {
    MergeValue::Counter(n).encode().unwrap()
}

fn decode(bytes: &[u8]) -> MergeValue {
    MergeValue::decode(bytes).unwrap()
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_decode_rejects_garbage() {
    assert!(matches!(MergeValue::decode(b""), Err(StrataError::Encoding(_))));
    assert!(matches!(
        MergeValue::decode(b"plain text value"),
        Err(StrataError::Encoding(_))
    ));
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = counter(7);
    bytes.push(0);
    assert!(matches!(MergeValue::decode(&bytes), Err(StrataError::Encoding(_))));
}

#[test]
fn test_encoding_is_compact() {
    // 4-byte discriminant + 8-byte fixed-width integer
    assert_eq!(counter(1).len(), 12);
    // 4-byte discriminant + 8-byte length + payload
    assert_eq!(appender(b"abc").len(), 4 + 8 + 3);
}

#[test]
fn test_kind_selects_combinator() {
    assert_eq!(MergeValue::Appender(vec![]).kind(), MergeKind::Appender);
    assert_eq!(MergeValue::Counter(0).kind(), MergeKind::Counter);

    for (i, combinator) in COMBINATORS.iter().enumerate() {
        assert_eq!(combinator.kind as usize, i);
        assert_eq!(combinator.kind.combinator().name, combinator.name);
    }
    assert_eq!(MergeKind::Appender.combinator().name, "appender");
    assert_eq!(MergeKind::Counter.combinator().name, "counter");
}

// =============================================================================
// merge() Tests
// =============================================================================

#[test]
fn test_merge_into_absent_value() {
    let operand = appender(b"first");
    assert_eq!(merge(None, &operand).unwrap(), operand);
}

#[test]
fn test_merge_preserves_issue_order() {
    let mut acc = merge(None, &appender(b"x")).unwrap();
    acc = merge(Some(&acc), &appender(b"y")).unwrap();
    acc = merge(Some(&acc), &appender(b"z")).unwrap();

    assert_eq!(decode(&acc), MergeValue::Appender(b"xyz".to_vec()));
}

#[test]
fn test_merge_is_associative() {
    let (a, b, c) = (appender(b"a"), appender(b"bb"), appender(b"ccc"));

    let left = merge(Some(&merge(Some(&a), &b).unwrap()), &c).unwrap();
    let right = merge(Some(&a), &merge(Some(&b), &c).unwrap()).unwrap();

    assert_eq!(left, right);
}

#[test]
fn test_merge_replaces_plain_value() {
    let merged = merge(Some(&b"written by put"[..]), &appender(b"fresh")).unwrap();
    assert_eq!(decode(&merged), MergeValue::Appender(b"fresh".to_vec()));
}

#[test]
fn test_merge_rejects_bad_operand() {
    let existing = appender(b"kept");
    assert!(matches!(
        merge(Some(&existing), b"junk"),
        Err(StrataError::Encoding(_))
    ));
    assert!(matches!(merge(None, b"junk"), Err(StrataError::Encoding(_))));
}

#[test]
fn test_merge_rejects_kind_mismatch() {
    let existing = counter(5);
    let err = merge(Some(&existing), &appender(b"x")).unwrap_err();
    match err {
        StrataError::Encoding(msg) => {
            assert!(msg.contains("appender"));
            assert!(msg.contains("counter"));
        }
        other => panic!("expected encoding error, got {:?}", other),
    }
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_counter_adds() {
    let acc = merge(Some(&counter(40)), &counter(2)).unwrap();
    assert_eq!(decode(&acc), MergeValue::Counter(42));

    let acc = merge(Some(&acc), &counter(-50)).unwrap();
    assert_eq!(decode(&acc), MergeValue::Counter(-8));
}

#[test]
fn test_counter_overflow() {
    match merge(Some(&counter(i64::MAX)), &counter(1)) {
        Err(StrataError::Overflow { current, delta, .. }) => {
            assert_eq!(current, i64::MAX);
            assert_eq!(delta, 1);
        }
        other => panic!("expected overflow, got {:?}", other),
    }

    assert!(matches!(
        merge(Some(&counter(i64::MIN)), &counter(-1)),
        Err(StrataError::Overflow { .. })
    ));
}
