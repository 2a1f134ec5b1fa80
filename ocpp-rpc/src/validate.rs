//! Structural validation of message payloads
//!
//! A [`Shape`] declares the fields of a JSON object together with their
//! constraints. [`validate`] walks a payload against a shape and returns every
//! violation it finds, in field declaration order. Validation never mutates
//! the payload and never stops at the first problem.
//!
//! Unknown keys are tolerated; vendor data belongs in `customData`, which
//! every shape built with [`Shape::new`] accepts.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::custom_data::CustomData;
use crate::messages::ErrorCode;

/// JSON type a field must hold
#[derive(Debug, Clone)]
pub enum Kind {
    String,
    /// RFC 3339 timestamp carried as a string
    DateTime,
    Integer,
    Number,
    Boolean,
    Object(Arc<Shape>),
    Array(Box<Kind>),
    /// Anything, including null
    Any,
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::DateTime => "date-time string",
            Kind::Integer => "integer",
            Kind::Number => "number",
            Kind::Boolean => "boolean",
            Kind::Object(_) => "object",
            Kind::Array(_) => "array",
            Kind::Any => "any",
        }
    }
}

/// One declared field and its constraints.
///
/// Length, range and enumeration constraints apply to the field value, or to
/// each element when the field is an array of scalars.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: Kind,
    pub required: bool,
    pub max_len: Option<usize>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub one_of: Option<&'static [&'static str]>,
}

impl Field {
    pub fn new(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            required: false,
            max_len: None,
            min_items: None,
            max_items: None,
            min: None,
            max: None,
            one_of: None,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, Kind::String)
    }

    pub fn date_time(name: &'static str) -> Self {
        Self::new(name, Kind::DateTime)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, Kind::Integer)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, Kind::Number)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, Kind::Boolean)
    }

    pub fn any(name: &'static str) -> Self {
        Self::new(name, Kind::Any)
    }

    /// String constrained to a fixed set of literals
    pub fn enumeration(name: &'static str, values: &'static [&'static str]) -> Self {
        Self::string(name).one_of(values)
    }

    pub fn object(name: &'static str, shape: Shape) -> Self {
        Self::new(name, Kind::Object(Arc::new(shape)))
    }

    pub fn array(name: &'static str, element: Kind) -> Self {
        Self::new(name, Kind::Array(Box::new(element)))
    }

    pub fn array_of(name: &'static str, shape: Shape) -> Self {
        Self::array(name, Kind::Object(Arc::new(shape)))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn non_negative(self) -> Self {
        self.min(0.0)
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.one_of = Some(values);
        self
    }
}

/// Cross-field rule evaluated on an object after its fields
#[derive(Debug, Clone)]
pub enum Rule {
    /// At least one of the named fields must be present
    AtLeastOneOf(&'static [&'static str]),
    /// No more than one of the named fields may be present
    AtMostOneOf(&'static [&'static str]),
    /// `field` may only be present when `other` equals `equals`
    OnlyWhen {
        field: &'static str,
        other: &'static str,
        equals: Value,
    },
}

impl Rule {
    fn check(&self, object: &Map<String, Value>) -> Option<String> {
        let present = |name: &str| object.get(name).map_or(false, |v| !v.is_null());
        match self {
            Rule::AtLeastOneOf(names) => {
                if names.iter().copied().any(present) {
                    None
                } else {
                    Some(format!("at least one of {} is required", names.join(", ")))
                }
            }
            Rule::AtMostOneOf(names) => {
                if names.iter().copied().filter(|&n| present(n)).count() <= 1 {
                    None
                } else {
                    Some(format!("at most one of {} may be set", names.join(", ")))
                }
            }
            Rule::OnlyWhen { field, other, equals } => {
                if !present(*field) || object.get(*other).map_or(false, |v| same_value(v, equals)) {
                    None
                } else {
                    Some(format!("{} is only allowed when {} is {}", field, other, equals))
                }
            }
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number
fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Declared structure of a JSON object
#[derive(Debug, Clone)]
pub struct Shape {
    pub name: &'static str,
    pub fields: Vec<Field>,
    pub rules: Vec<Rule>,
}

impl Shape {
    /// Object shape that also accepts an optional `customData` extension
    pub fn new(name: &'static str) -> Self {
        Self::bare(name).field(Field::object("customData", CustomData::shape()))
    }

    /// Object shape with exactly the declared fields
    pub fn bare(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// What was wrong with a value
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    Missing,
    WrongType { expected: &'static str },
    TooLong { max: usize, actual: usize },
    TooFewItems { min: usize, actual: usize },
    TooManyItems { max: usize, actual: usize },
    OutOfRange { min: Option<f64>, max: Option<f64>, actual: f64 },
    NotAllowed { value: String },
    InvalidDateTime { value: String },
    Rule(String),
}

/// A single constraint failure, located by a dotted path
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Wire error code for this violation
    pub fn error_code(&self) -> ErrorCode {
        match self.kind {
            ViolationKind::Missing | ViolationKind::Rule(_) => {
                ErrorCode::OccurrenceConstraintViolation
            }
            ViolationKind::WrongType { .. } => ErrorCode::TypeConstraintViolation,
            _ => ErrorCode::PropertyConstraintViolation,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "payload" } else { &self.path };
        match &self.kind {
            ViolationKind::Missing => write!(f, "{} is required", path),
            ViolationKind::WrongType { expected } => write!(f, "{} must be {}", path, expected),
            ViolationKind::TooLong { max, actual } => {
                write!(f, "{} is {} long, max {}", path, actual, max)
            }
            ViolationKind::TooFewItems { min, actual } => {
                write!(f, "{} has {} items, min {}", path, actual, min)
            }
            ViolationKind::TooManyItems { max, actual } => {
                write!(f, "{} has {} items, max {}", path, actual, max)
            }
            ViolationKind::OutOfRange { min, max, actual } => match (min, max) {
                (Some(min), Some(max)) => write!(f, "{} = {} not in [{}, {}]", path, actual, min, max),
                (Some(min), None) => write!(f, "{} = {} below {}", path, actual, min),
                (None, Some(max)) => write!(f, "{} = {} above {}", path, actual, max),
                (None, None) => write!(f, "{} = {} out of range", path, actual),
            },
            ViolationKind::NotAllowed { value } => write!(f, "{} has invalid value {:?}", path, value),
            ViolationKind::InvalidDateTime { value } => {
                write!(f, "{} is not an RFC 3339 timestamp: {:?}", path, value)
            }
            ViolationKind::Rule(rule) => write!(f, "{}: {}", path, rule),
        }
    }
}

/// Join violations into one human-readable line
pub fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate `value` against `shape`. An empty result means valid.
pub fn validate(value: &Value, shape: &Shape) -> Vec<Violation> {
    let mut out = Vec::new();
    check_object("", value, shape, &mut out);
    out
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn check_object(path: &str, value: &Value, shape: &Shape, out: &mut Vec<Violation>) {
    let Some(object) = value.as_object() else {
        out.push(Violation::new(path, ViolationKind::WrongType { expected: "object" }));
        return;
    };

    for field in &shape.fields {
        let field_path = join(path, field.name);
        match object.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    out.push(Violation::new(field_path, ViolationKind::Missing));
                }
            }
            Some(v) => check_field(&field_path, v, field, out),
        }
    }

    for rule in &shape.rules {
        if let Some(message) = rule.check(object) {
            out.push(Violation::new(path, ViolationKind::Rule(message)));
        }
    }
}

fn check_field(path: &str, value: &Value, field: &Field, out: &mut Vec<Violation>) {
    if let Kind::Array(element) = &field.kind {
        let Some(items) = value.as_array() else {
            out.push(Violation::new(path, ViolationKind::WrongType { expected: "array" }));
            return;
        };
        if let Some(min) = field.min_items {
            if items.len() < min {
                out.push(Violation::new(
                    path,
                    ViolationKind::TooFewItems { min, actual: items.len() },
                ));
            }
        }
        if let Some(max) = field.max_items {
            if items.len() > max {
                out.push(Violation::new(
                    path,
                    ViolationKind::TooManyItems { max, actual: items.len() },
                ));
            }
        }
        for (i, item) in items.iter().enumerate() {
            check_value(&format!("{}[{}]", path, i), item, element, field, out);
        }
        return;
    }

    if field.required && value.as_str() == Some("") {
        out.push(Violation::new(path, ViolationKind::Missing));
        return;
    }
    check_value(path, value, &field.kind, field, out);
}

fn check_value(path: &str, value: &Value, kind: &Kind, field: &Field, out: &mut Vec<Violation>) {
    let wrong_type = |out: &mut Vec<Violation>| {
        out.push(Violation::new(path, ViolationKind::WrongType { expected: kind.name() }));
    };

    match kind {
        Kind::Any => {}
        Kind::Object(shape) => check_object(path, value, shape, out),
        Kind::Array(_) => {
            // Nested arrays are not part of the protocol
            if !value.is_array() {
                wrong_type(out);
            }
        }
        Kind::Boolean => {
            if !value.is_boolean() {
                wrong_type(out);
            }
        }
        Kind::Integer | Kind::Number => {
            let Some(n) = value.as_f64() else {
                return wrong_type(out);
            };
            if matches!(kind, Kind::Integer) && !is_integer(value) {
                return wrong_type(out);
            }
            let below = field.min.map_or(false, |min| n < min);
            let above = field.max.map_or(false, |max| n > max);
            if below || above {
                out.push(Violation::new(
                    path,
                    ViolationKind::OutOfRange {
                        min: field.min,
                        max: field.max,
                        actual: n,
                    },
                ));
            }
        }
        Kind::String | Kind::DateTime => {
            let Some(s) = value.as_str() else {
                return wrong_type(out);
            };
            if let Some(max) = field.max_len {
                let len = s.chars().count();
                if len > max {
                    out.push(Violation::new(path, ViolationKind::TooLong { max, actual: len }));
                }
            }
            if let Some(allowed) = field.one_of {
                if !allowed.contains(&s) {
                    out.push(Violation::new(
                        path,
                        ViolationKind::NotAllowed { value: s.to_string() },
                    ));
                }
            }
            if matches!(kind, Kind::DateTime) && chrono::DateTime::parse_from_rfc3339(s).is_err() {
                out.push(Violation::new(
                    path,
                    ViolationKind::InvalidDateTime { value: s.to_string() },
                ));
            }
        }
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().map_or(false, |f| f.fract() == 0.0)
}
