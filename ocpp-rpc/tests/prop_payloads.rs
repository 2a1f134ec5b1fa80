//! Property tests for payload handling
//!
//! Tests invariants for:
//! - Extensible data: decode(encode(b)) == b
//! - Validator: range and enumeration acceptance
//! - Framing: Call frames survive serialization

use ocpp_rpc::custom_data::{CustomData, VENDOR_ID_KEY};
use ocpp_rpc::messages::{Call, Message};
use ocpp_rpc::validate::{validate, Field, Shape, ViolationKind};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Strategies
// ============================================================================

fn vendor_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9._-]{1,64}"
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z ]{0,16}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn vendor_values() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-zA-Z]{1,10}", json_value(), 0..6).prop_map(|m| {
        m.into_iter()
            .filter(|(k, _)| k != VENDOR_ID_KEY)
            .collect()
    })
}

// ============================================================================
// Extensible data
// ============================================================================

proptest! {
    /// CORE INVARIANT: decode(encode({V, M})) == {V, M}
    #[test]
    fn custom_data_round_trip(vendor in vendor_id(), values in vendor_values()) {
        let data = CustomData { vendor_id: vendor, values };
        let decoded = CustomData::decode(&data.encode()).unwrap();
        prop_assert_eq!(decoded, data);
    }

    /// The bag never exposes the identity key after decoding
    #[test]
    fn decoded_bag_has_no_vendor_id(vendor in vendor_id(), values in vendor_values()) {
        let mut raw = values.clone();
        raw.insert(VENDOR_ID_KEY.to_string(), Value::String(vendor.clone()));

        let decoded = CustomData::decode(&Value::Object(raw)).unwrap();
        prop_assert!(decoded.get(VENDOR_ID_KEY).is_none());
        prop_assert_eq!(decoded.vendor_id, vendor);
        prop_assert_eq!(decoded.values, values);
    }

    /// Only objects decode
    #[test]
    fn non_objects_are_malformed(value in leaf()) {
        prop_assert!(CustomData::decode(&value).is_err());
    }
}

// ============================================================================
// Validator
// ============================================================================

fn schedule_request() -> Shape {
    Shape::new("GetCompositeScheduleRequest")
        .field(Field::integer("duration").required().non_negative())
        .field(Field::enumeration("chargingRateUnit", &["W", "A"]))
        .field(Field::integer("evseId").required().non_negative())
}

proptest! {
    /// Every in-range combination with or without the optional field passes
    #[test]
    fn in_range_is_accepted(
        duration in 0i64..1_000_000,
        evse_id in 0i64..1_000,
        unit in prop::option::of(prop_oneof![Just("W"), Just("A")])
    ) {
        let mut value = json!({"duration": duration, "evseId": evse_id});
        if let Some(unit) = unit {
            value["chargingRateUnit"] = json!(unit);
        }
        prop_assert!(validate(&value, &schedule_request()).is_empty());
    }

    /// A negative value on a non-negative field is always caught at that field
    #[test]
    fn negative_is_rejected(duration in i64::MIN / 2..0, evse_id in 0i64..1_000) {
        let value = json!({"duration": duration, "evseId": evse_id});
        let violations = validate(&value, &schedule_request());
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(violations[0].path.as_str(), "duration");
        let out_of_range = matches!(violations[0].kind, ViolationKind::OutOfRange { .. });
        prop_assert!(out_of_range);
    }

    /// Unlisted literals never pass an enumeration
    #[test]
    fn unlisted_literal_is_rejected(unit in "[a-z]{2,12}") {
        let value = json!({"duration": 1, "evseId": 1, "chargingRateUnit": unit});
        prop_assert_eq!(validate(&value, &schedule_request()).len(), 1);
    }

    /// Validation leaves its input untouched
    #[test]
    fn validation_is_pure(value in json_value()) {
        let before = value.clone();
        let _ = validate(&value, &schedule_request());
        prop_assert_eq!(value, before);
    }
}

// ============================================================================
// Framing
// ============================================================================

proptest! {
    #[test]
    fn call_frame_survives_serialization(
        id in "[a-f0-9-]{1,36}",
        action in "[A-Z][A-Za-z]{0,30}",
        payload in json_value()
    ) {
        let call = Call::new(id, action, payload);
        let parsed = Message::parse(&call.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(parsed, Message::Call(call));
    }
}
