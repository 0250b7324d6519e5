//! Property-based tests (fuzzing) for message decoding and statement building.
//!
//! Uses proptest to generate random/malformed payloads and verify decoding
//! never panics, only returns clean errors, and that well-formed events
//! survive the wire form intact.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use labsync::dispatch::router::decode;
use labsync::dispatch::{Category, Event, Router};
use labsync::engine::statements::INSERT_CHUNK_SIZE;
use labsync::engine::Tables;
use labsync::{Request, Sample, SyncError};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn category_strategy() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::NewRequest),
        Just(Category::UpdateRequest),
        Just(Category::UpdateSample),
    ]
}

/// Extra top-level fields, never colliding with the typed ones.
fn metadata_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map("x[a-zA-Z]{0,12}", ".{0,20}".prop_map(Value::String), 0..5)
        .prop_map(|m| m.into_iter().collect())
}

fn sample_strategy(request_id: String) -> impl Strategy<Value = Sample> {
    (
        ".{1,20}",
        ".{0,20}",
        prop::option::of("[A-Z0-9]{1,8}"),
        metadata_strategy(),
    )
        .prop_map(move |(name, alt, barcode, metadata)| {
            let mut sample = Sample::new(request_id.clone(), name, alt);
            sample.barcode = barcode;
            sample.metadata = metadata;
            sample
        })
}

fn request_strategy() -> impl Strategy<Value = Request> {
    "[A-Z]{2,5}[0-9]{1,6}(_[A-Z])?".prop_flat_map(|id| {
        (
            prop::collection::vec(sample_strategy(id.clone()), 0..8),
            metadata_strategy(),
        )
            .prop_map(move |(samples, metadata)| Request {
                request_id: id.clone(),
                samples,
                metadata,
            })
    })
}

/// Wire form: the JSON document carried as a JSON string literal.
fn quoted(doc: &Value) -> Vec<u8> {
    serde_json::to_vec(&doc.to_string()).unwrap()
}

// =============================================================================
// Decode Fuzz Tests
// =============================================================================

proptest! {
    /// Decoding should never panic on arbitrary bytes
    #[test]
    fn fuzz_decode_random_bytes(
        category in category_strategy(),
        bytes in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let _ = decode(category, "fuzz", &bytes);
    }

    /// Arbitrary JSON, raw or quoted, decodes or fails with a decode error
    #[test]
    fn fuzz_decode_arbitrary_json(category in category_strategy(), doc in arbitrary_json_strategy()) {
        for payload in [serde_json::to_vec(&doc).unwrap(), quoted(&doc)] {
            match decode(category, "fuzz", &payload) {
                Ok(event) => prop_assert_eq!(event.category(), category),
                Err(e) => {
                    let is_decode = matches!(e, SyncError::Decode { .. });
                    prop_assert!(is_decode);
                }
            }
        }
    }

    /// Unquoted documents are never accepted
    #[test]
    fn fuzz_unquoted_object_rejected(request in request_strategy()) {
        let raw = serde_json::to_vec(&request).unwrap();
        prop_assert!(decode(Category::NewRequest, "fuzz", &raw).is_err());
    }

    /// Corrupted payloads should fail gracefully
    #[test]
    fn fuzz_corrupted_payload(
        request in request_strategy(),
        corruption in prop::collection::vec(any::<u8>(), 1..50),
        position in 0usize..10000,
    ) {
        let mut payload = quoted(&serde_json::to_value(&request).unwrap());
        let pos = position % payload.len();
        for (i, b) in corruption.iter().enumerate() {
            let idx = (pos + i) % payload.len();
            payload[idx] ^= b;
        }

        let _ = decode(Category::NewRequest, "fuzz", &payload);
    }
}

// =============================================================================
// Wire Form Invariants
// =============================================================================

proptest! {
    /// A quoted request decodes to the same request
    #[test]
    fn prop_new_request_survives_wire_form(request in request_strategy()) {
        let payload = quoted(&serde_json::to_value(&request).unwrap());

        match decode(Category::NewRequest, "lims.request.new", &payload) {
            Ok(Event::NewRequest(decoded)) => prop_assert_eq!(decoded, request),
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    /// Version lists keep their order; the first element is the new version
    #[test]
    fn prop_request_versions_keep_order(
        versions in prop::collection::vec(request_strategy(), 1..4),
    ) {
        let payload = quoted(&serde_json::to_value(&versions).unwrap());

        match decode(Category::UpdateRequest, "lims.request.update", &payload) {
            Ok(Event::UpdateRequest(decoded)) => {
                let ids: Vec<&str> = decoded.iter().map(|r| r.request_id.as_str()).collect();
                let expected: Vec<&str> = versions.iter().map(|r| r.request_id.as_str()).collect();
                prop_assert_eq!(ids, expected);
            }
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    /// Sample keys survive the wire form, barcode included
    #[test]
    fn prop_sample_key_survives_wire_form(sample in sample_strategy("REQ001".into())) {
        let payload = quoted(&json!([sample, sample]));

        match decode(Category::UpdateSample, "lims.sample.update", &payload) {
            Ok(Event::UpdateSample(decoded)) => prop_assert_eq!(decoded[1].key(), sample.key()),
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    /// The stored request document never carries samples
    #[test]
    fn prop_request_document_has_no_samples(request in request_strategy()) {
        let doc: Value = serde_json::from_str(&request.to_document().unwrap()).unwrap();
        prop_assert_eq!(&doc["samples"], &json!([]));
        prop_assert_eq!(&doc["igoRequestId"], &json!(request.request_id));
    }
}

// =============================================================================
// Routing and Statement Invariants
// =============================================================================

proptest! {
    /// Only the three configured subjects route
    #[test]
    fn prop_router_exact_match(subject in "[a-z.]{0,24}") {
        let router = Router::new("lims.request.new", "lims.request.update", "lims.sample.update");
        let routed = router.classify(&subject);
        let known = ["lims.request.new", "lims.request.update", "lims.sample.update"];
        prop_assert_eq!(routed.is_some(), known.contains(&subject.as_str()));
    }

    /// Sample inserts are chunked and every placeholder has a bound value
    #[test]
    fn prop_sample_insert_chunks(count in 0usize..1200) {
        let tables = Tables::new("lims.requests", "lims.samples");
        let samples: Vec<Sample> = (0..count)
            .map(|i| Sample::new("REQ001", format!("S{}", i), "C"))
            .collect();

        let statements = tables.insert_samples("REQ001", &samples).unwrap();

        prop_assert_eq!(statements.len(), count.div_ceil(INSERT_CHUNK_SIZE));
        let mut total = 0;
        for stmt in &statements {
            prop_assert_eq!(stmt.sql.matches('?').count(), stmt.params.len());
            total += stmt.params.len() / 5;
        }
        prop_assert_eq!(total, count);
    }
}
