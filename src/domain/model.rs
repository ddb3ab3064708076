use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag carried in every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    RawBatch,
    CleanedBatch,
}

impl EnvelopeKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::RawBatch => "RawBatch",
            Self::CleanedBatch => "CleanedBatch",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "RawBatch" => Some(Self::RawBatch),
            "CleanedBatch" => Some(Self::CleanedBatch),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A tabular payload in transit. `filename` is carried through every stage
/// untouched so a stored row can be traced back to its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub filename: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            payload,
        }
    }
}

/// One message pulled from a queue and not yet acknowledged.
///
/// Deliberately not `Clone`: acknowledging consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// Point-to-point through the default exchange.
    Queue(String),
    /// Fanout exchange, every bound queue receives a copy.
    Exchange(String),
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "queue '{}'", name),
            Self::Exchange(name) => write!(f, "exchange '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutExchange {
    pub name: String,
    pub bound_queues: Vec<String>,
}

/// Durable queues and the optional broadcast exchange every driver declares
/// before touching the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub queues: Vec<String>,
    pub fanout: Option<FanoutExchange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Child,
    Adult,
    Senior,
}

impl AgeGroup {
    pub fn for_age(age: i64) -> Self {
        if age < 18 {
            Self::Child
        } else if age < 65 {
            Self::Adult
        } else {
            Self::Senior
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Adult => "adult",
            Self::Senior => "senior",
        }
    }
}

/// A row as ingested, projected onto the canonical raw columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAppointment {
    pub patient_id: String,
    pub appointment_id: i64,
    pub gender: String,
    pub scheduled_day: String,
    pub appointment_day: String,
    pub age: i64,
    pub neighbourhood: String,
    pub scholarship: bool,
    pub hypertension: bool,
    pub diabetes: bool,
    pub alcoholism: bool,
    pub handicap: i64,
    pub sms_received: bool,
    pub no_show: bool,
}

/// A row after the cleaning pipeline. Field order is the column order of a
/// cleaned batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedAppointment {
    pub patient_id: String,
    pub appointment_id: i64,
    pub gender: String,
    pub scheduled_day: NaiveDateTime,
    pub appointment_day: NaiveDateTime,
    pub age: i64,
    pub neighbourhood: String,
    pub scholarship: bool,
    pub hypertension: bool,
    pub diabetes: bool,
    pub alcoholism: bool,
    pub handicap: i64,
    pub sms_received: bool,
    pub no_show: bool,
    pub wait_days: i64,
    pub scheduled_hour: u32,
    pub appointment_weekday: u32,
    pub age_group: AgeGroup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

/// Rows handed to the external store: one column list shared by every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl RecordBatch {
    pub fn from_records<R: StoreRecord>(records: &[R]) -> Self {
        Self {
            columns: R::COLUMNS.to_vec(),
            rows: records.iter().map(StoreRecord::values).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub trait StoreRecord {
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<FieldValue>;
}

pub const RAW_COLUMNS: &[&str] = &[
    "patient_id",
    "appointment_id",
    "gender",
    "scheduled_day",
    "appointment_day",
    "age",
    "neighbourhood",
    "scholarship",
    "hypertension",
    "diabetes",
    "alcoholism",
    "handicap",
    "sms_received",
    "no_show",
];

pub const CLEANED_COLUMNS: &[&str] = &[
    "patient_id",
    "appointment_id",
    "gender",
    "scheduled_day",
    "appointment_day",
    "age",
    "neighbourhood",
    "scholarship",
    "hypertension",
    "diabetes",
    "alcoholism",
    "handicap",
    "sms_received",
    "no_show",
    "wait_days",
    "scheduled_hour",
    "appointment_weekday",
    "age_group",
];

impl StoreRecord for RawAppointment {
    const COLUMNS: &'static [&'static str] = RAW_COLUMNS;

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.patient_id.clone()),
            FieldValue::Int(self.appointment_id),
            FieldValue::Text(self.gender.clone()),
            FieldValue::Text(self.scheduled_day.clone()),
            FieldValue::Text(self.appointment_day.clone()),
            FieldValue::Int(self.age),
            FieldValue::Text(self.neighbourhood.clone()),
            FieldValue::Bool(self.scholarship),
            FieldValue::Bool(self.hypertension),
            FieldValue::Bool(self.diabetes),
            FieldValue::Bool(self.alcoholism),
            FieldValue::Int(self.handicap),
            FieldValue::Bool(self.sms_received),
            FieldValue::Bool(self.no_show),
        ]
    }
}

impl StoreRecord for CleanedAppointment {
    const COLUMNS: &'static [&'static str] = CLEANED_COLUMNS;

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.patient_id.clone()),
            FieldValue::Int(self.appointment_id),
            FieldValue::Text(self.gender.clone()),
            FieldValue::Timestamp(self.scheduled_day),
            FieldValue::Timestamp(self.appointment_day),
            FieldValue::Int(self.age),
            FieldValue::Text(self.neighbourhood.clone()),
            FieldValue::Bool(self.scholarship),
            FieldValue::Bool(self.hypertension),
            FieldValue::Bool(self.diabetes),
            FieldValue::Bool(self.alcoholism),
            FieldValue::Int(self.handicap),
            FieldValue::Bool(self.sms_received),
            FieldValue::Bool(self.no_show),
            FieldValue::Int(self.wait_days),
            FieldValue::Int(i64::from(self.scheduled_hour)),
            FieldValue::Int(i64::from(self.appointment_weekday)),
            FieldValue::Text(self.age_group.as_str().to_string()),
        ]
    }
}
