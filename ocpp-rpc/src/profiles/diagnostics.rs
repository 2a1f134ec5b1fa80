//! Diagnostics: monitoring, event reporting, logs and customer information

use crate::registry::{Direction, Feature, Profile};
use crate::validate::{Field, Kind, Rule, Shape};

use super::common::{
    certificate_hash_data, component, id_list, id_token, severity, status_info, status_response, variable,
    GENERIC_STATUS, MONITOR_TYPE,
};

pub const PROFILE_NAME: &str = "Diagnostics";

const MONITORING_STATUS: &[&str] = &["Accepted", "Rejected", "NotSupported", "EmptyResultSet"];

pub fn profile() -> Profile {
    Profile::new(PROFILE_NAME)
        .feature(clear_variable_monitoring())
        .feature(customer_information())
        .feature(get_log())
        .feature(get_monitoring_report())
        .feature(log_status_notification())
        .feature(notify_customer_information())
        .feature(notify_event())
        .feature(notify_monitoring_report())
        .feature(set_monitoring_base())
        .feature(set_monitoring_level())
        .feature(set_variable_monitoring())
}

/// Fields every paged report from a station carries
fn report(name: &'static str) -> Shape {
    Shape::new(name)
        .field(Field::integer("requestId").required())
        .field(Field::boolean("tbc"))
        .field(Field::integer("seqNo").required().non_negative())
        .field(Field::date_time("generatedAt").required())
}

fn clear_variable_monitoring() -> Feature {
    let result = Shape::new("ClearMonitoringResult")
        .field(Field::enumeration("status", &["Accepted", "Rejected", "NotFound"]).required())
        .field(Field::integer("id").required())
        .field(Field::object("statusInfo", status_info()));

    Feature::new(
        "ClearVariableMonitoring",
        Direction::ToStation,
        Shape::new("ClearVariableMonitoringRequest").field(id_list("id")),
        Shape::new("ClearVariableMonitoringResponse")
            .field(Field::array_of("clearMonitoringResult", result).required().min_items(1)),
    )
}

fn customer_information() -> Feature {
    Feature::new(
        "CustomerInformation",
        Direction::ToStation,
        Shape::new("CustomerInformationRequest")
            .field(Field::integer("requestId").required())
            .field(Field::boolean("report").required())
            .field(Field::boolean("clear").required())
            .field(Field::object("customerCertificate", certificate_hash_data()))
            .field(Field::object("idToken", id_token()))
            .field(Field::string("customerIdentifier").max_len(64))
            .rule(Rule::AtMostOneOf(&["customerCertificate", "idToken", "customerIdentifier"])),
        status_response("CustomerInformationResponse", &["Accepted", "Rejected", "Invalid"]),
    )
}

fn get_log() -> Feature {
    let log = Shape::new("LogParameters")
        .field(Field::string("remoteLocation").required().max_len(512))
        .field(Field::date_time("oldestTimestamp"))
        .field(Field::date_time("latestTimestamp"));

    Feature::new(
        "GetLog",
        Direction::ToStation,
        Shape::new("GetLogRequest")
            .field(Field::object("log", log).required())
            .field(Field::enumeration("logType", &["DiagnosticsLog", "SecurityLog"]).required())
            .field(Field::integer("requestId").required())
            .field(Field::integer("retries").non_negative())
            .field(Field::integer("retryInterval").non_negative()),
        Shape::new("GetLogResponse")
            .field(Field::enumeration("status", &["Accepted", "Rejected", "AcceptedCanceled"]).required())
            .field(Field::object("statusInfo", status_info()))
            .field(Field::string("filename").max_len(255)),
    )
}

fn get_monitoring_report() -> Feature {
    let component_variable = Shape::new("ComponentVariable")
        .field(Field::object("component", component()).required())
        .field(Field::object("variable", variable()));

    Feature::new(
        "GetMonitoringReport",
        Direction::ToStation,
        Shape::new("GetMonitoringReportRequest")
            .field(Field::integer("requestId").required())
            .field(
                Field::array("monitoringCriteria", Kind::String)
                    .one_of(&["ThresholdMonitoring", "DeltaMonitoring", "PeriodicMonitoring"])
                    .min_items(1)
                    .max_items(3),
            )
            .field(Field::array_of("componentVariable", component_variable).min_items(1)),
        status_response("GetMonitoringReportResponse", MONITORING_STATUS),
    )
}

fn log_status_notification() -> Feature {
    Feature::new(
        "LogStatusNotification",
        Direction::ToCsms,
        Shape::new("LogStatusNotificationRequest")
            .field(
                Field::enumeration(
                    "status",
                    &[
                        "BadMessage",
                        "Idle",
                        "NotSupportedOperation",
                        "PermissionDenied",
                        "Uploaded",
                        "UploadFailure",
                        "Uploading",
                        "AcceptedCanceled",
                    ],
                )
                .required(),
            )
            .field(Field::integer("requestId")),
        Shape::new("LogStatusNotificationResponse"),
    )
}

fn notify_customer_information() -> Feature {
    Feature::new(
        "NotifyCustomerInformation",
        Direction::ToCsms,
        report("NotifyCustomerInformationRequest").field(Field::string("data").required().max_len(512)),
        Shape::new("NotifyCustomerInformationResponse"),
    )
}

fn notify_event() -> Feature {
    let event = Shape::new("EventData")
        .field(Field::integer("eventId").required())
        .field(Field::date_time("timestamp").required())
        .field(Field::enumeration("trigger", &["Alerting", "Delta", "Periodic"]).required())
        .field(Field::integer("cause"))
        .field(Field::string("actualValue").required().max_len(2500))
        .field(Field::string("techCode").max_len(50))
        .field(Field::string("techInfo").max_len(500))
        .field(Field::boolean("cleared"))
        .field(Field::string("transactionId").max_len(36))
        .field(Field::integer("variableMonitoringId"))
        .field(
            Field::enumeration(
                "eventNotificationType",
                &["HardWiredNotification", "HardWiredMonitor", "PreconfiguredMonitor", "CustomMonitor"],
            )
            .required(),
        )
        .field(Field::object("component", component()).required())
        .field(Field::object("variable", variable()).required());

    Feature::new(
        "NotifyEvent",
        Direction::ToCsms,
        Shape::new("NotifyEventRequest")
            .field(Field::date_time("generatedAt").required())
            .field(Field::boolean("tbc"))
            .field(Field::integer("seqNo").required().non_negative())
            .field(Field::array_of("eventData", event).required().min_items(1)),
        Shape::new("NotifyEventResponse"),
    )
}

fn notify_monitoring_report() -> Feature {
    let monitoring = Shape::new("VariableMonitoring")
        .field(Field::integer("id").required())
        .field(Field::boolean("transaction").required())
        .field(Field::number("value").required())
        .field(Field::enumeration("type", MONITOR_TYPE).required())
        .field(severity());
    let monitor = Shape::new("MonitoringData")
        .field(Field::object("component", component()).required())
        .field(Field::object("variable", variable()).required())
        .field(Field::array_of("variableMonitoring", monitoring).required().min_items(1));

    Feature::new(
        "NotifyMonitoringReport",
        Direction::ToCsms,
        report("NotifyMonitoringReportRequest").field(Field::array_of("monitor", monitor).min_items(1)),
        Shape::new("NotifyMonitoringReportResponse"),
    )
}

fn set_monitoring_base() -> Feature {
    Feature::new(
        "SetMonitoringBase",
        Direction::ToStation,
        Shape::new("SetMonitoringBaseRequest")
            .field(Field::enumeration("monitoringBase", &["All", "FactoryDefault", "HardWiredOnly"]).required()),
        status_response("SetMonitoringBaseResponse", MONITORING_STATUS),
    )
}

fn set_monitoring_level() -> Feature {
    Feature::new(
        "SetMonitoringLevel",
        Direction::ToStation,
        Shape::new("SetMonitoringLevelRequest").field(severity()),
        status_response("SetMonitoringLevelResponse", GENERIC_STATUS),
    )
}

fn set_variable_monitoring() -> Feature {
    let data = Shape::new("SetMonitoringData")
        .field(Field::integer("id"))
        .field(Field::boolean("transaction"))
        .field(Field::number("value").required())
        .field(Field::enumeration("type", MONITOR_TYPE).required())
        .field(severity())
        .field(Field::object("component", component()).required())
        .field(Field::object("variable", variable()).required());
    let result = Shape::new("SetMonitoringResult")
        .field(Field::integer("id"))
        .field(
            Field::enumeration(
                "status",
                &[
                    "Accepted",
                    "UnknownComponent",
                    "UnknownVariable",
                    "UnsupportedMonitorType",
                    "Rejected",
                    "Duplicate",
                ],
            )
            .required(),
        )
        .field(Field::enumeration("type", MONITOR_TYPE).required())
        .field(severity())
        .field(Field::object("component", component()).required())
        .field(Field::object("variable", variable()).required())
        .field(Field::object("statusInfo", status_info()));

    Feature::new(
        "SetVariableMonitoring",
        Direction::ToStation,
        Shape::new("SetVariableMonitoringRequest")
            .field(Field::array_of("setMonitoringData", data).required().min_items(1)),
        Shape::new("SetVariableMonitoringResponse")
            .field(Field::array_of("setMonitoringResult", result).required().min_items(1)),
    )
}
