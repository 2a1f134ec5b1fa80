//! Shapes shared by several profiles

use serde_json::json;

use crate::validate::{Field, Kind, Rule, Shape};

pub const GENERIC_STATUS: &[&str] = &["Accepted", "Rejected"];

pub const CHARGING_RATE_UNIT: &[&str] = &["W", "A"];

pub const MONITOR_TYPE: &[&str] = &[
    "UpperThreshold",
    "LowerThreshold",
    "Delta",
    "Periodic",
    "PeriodicClockAligned",
];

pub fn status_info() -> Shape {
    Shape::new("StatusInfo")
        .field(Field::string("reasonCode").required().max_len(20))
        .field(Field::string("additionalInfo").max_len(512))
}

/// Response carrying only a status and optional status info
pub fn status_response(name: &'static str, statuses: &'static [&'static str]) -> Shape {
    Shape::new(name)
        .field(Field::enumeration("status", statuses).required())
        .field(Field::object("statusInfo", status_info()))
}

pub fn evse() -> Shape {
    Shape::new("EVSE")
        .field(Field::integer("id").required().non_negative())
        .field(Field::integer("connectorId").non_negative())
}

pub fn component() -> Shape {
    Shape::new("Component")
        .field(Field::string("name").required().max_len(50))
        .field(Field::string("instance").max_len(50))
        .field(Field::object("evse", evse()))
}

pub fn variable() -> Shape {
    Shape::new("Variable")
        .field(Field::string("name").required().max_len(50))
        .field(Field::string("instance").max_len(50))
}

pub fn id_token() -> Shape {
    let additional = Shape::new("AdditionalInfo")
        .field(Field::string("additionalIdToken").required().max_len(36))
        .field(Field::string("type").required().max_len(50));

    Shape::new("IdToken")
        .field(Field::string("idToken").required().max_len(36))
        .field(
            Field::enumeration(
                "type",
                &[
                    "Central",
                    "eMAID",
                    "ISO14443",
                    "ISO15693",
                    "KeyCode",
                    "Local",
                    "MacAddress",
                    "NoAuthorization",
                ],
            )
            .required(),
        )
        .field(Field::array_of("additionalInfo", additional).min_items(1))
}

pub fn certificate_hash_data() -> Shape {
    Shape::new("CertificateHashData")
        .field(Field::enumeration("hashAlgorithm", &["SHA256", "SHA384", "SHA512"]).required())
        .field(Field::string("issuerNameHash").required().max_len(128))
        .field(Field::string("issuerKeyHash").required().max_len(128))
        .field(Field::string("serialNumber").required().max_len(40))
}

pub fn charging_schedule_period() -> Shape {
    Shape::new("ChargingSchedulePeriod")
        .field(Field::integer("startPeriod").required().non_negative())
        .field(Field::number("limit").required())
        .field(Field::integer("numberPhases").range(1.0, 3.0))
        .field(Field::integer("phaseToUse").range(1.0, 3.0))
        .rule(Rule::OnlyWhen {
            field: "phaseToUse",
            other: "numberPhases",
            equals: json!(1),
        })
}

/// Monitoring severity, 0 (danger) to 9 (debug)
pub fn severity() -> Field {
    Field::integer("severity").required().range(0.0, 9.0)
}

/// Integer list field, at least one entry
pub fn id_list(name: &'static str) -> Field {
    Field::array(name, Kind::Integer).required().min_items(1)
}
