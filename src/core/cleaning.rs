//! Deterministic cleaning and feature derivation for appointment batches.
//!
//! Steps run in a fixed order because later ones read what earlier ones
//! produce:
//!
//! 1. column normalization (shared alias table)
//! 2. timestamp parsing to naive UTC
//! 3. age clamping to `[0, 110]`
//! 4. neighbourhood trim + lower-case
//! 5. boolean coercion of the flag columns and `no_show`
//! 6. `wait_days`, dropping rows where it is negative
//! 7. `scheduled_hour`
//! 8. `appointment_weekday` (0 = Monday)
//! 9. `age_group`
//!
//! A schema violation anywhere aborts the whole batch.

use crate::core::schema::{self, FLAG_COLUMNS, NO_SHOW_COLUMN};
use crate::core::table::{cell, write_records, RawTable};
use crate::domain::model::{AgeGroup, CleanedAppointment};
use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use csv::StringRecord;

pub const MIN_AGE: i64 = 0;
pub const MAX_AGE: i64 = 110;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBatch {
    pub rows: Vec<CleanedAppointment>,
    /// Rows removed because `wait_days` was negative.
    pub dropped: usize,
}

impl CleanedBatch {
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        write_records(&self.rows)
    }
}

/// Column positions resolved once per batch.
struct Layout {
    patient_id: usize,
    appointment_id: usize,
    gender: usize,
    scheduled_day: usize,
    appointment_day: usize,
    age: usize,
    neighbourhood: usize,
    flags: [usize; 5],
    handicap: usize,
    no_show: usize,
}

impl Layout {
    fn resolve(table: &RawTable) -> Result<Self> {
        let mut flags = [0usize; 5];
        for (slot, column) in flags.iter_mut().zip(FLAG_COLUMNS) {
            *slot = table.require(column)?;
        }

        Ok(Self {
            patient_id: table.require("patient_id")?,
            appointment_id: table.require("appointment_id")?,
            gender: table.require("gender")?,
            scheduled_day: table.require("scheduled_day")?,
            appointment_day: table.require("appointment_day")?,
            age: table.require("age")?,
            neighbourhood: table.require("neighbourhood")?,
            flags,
            handicap: table.require("handicap")?,
            no_show: table.require(NO_SHOW_COLUMN)?,
        })
    }
}

/// Cleans a raw batch. Column normalization is applied here, so callers may
/// pass the table exactly as parsed.
pub fn clean(table: RawTable) -> Result<CleanedBatch> {
    let table = table.normalize_columns();
    let layout = Layout::resolve(&table)?;

    let mut rows = Vec::with_capacity(table.len());
    let mut dropped = 0;

    for record in table.rows() {
        match clean_row(&layout, record)? {
            Some(row) => rows.push(row),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, kept = rows.len(), "Dropped rows with negative wait_days");
    }

    Ok(CleanedBatch { rows, dropped })
}

/// Convenience for the processor: CSV in, cleaned batch out.
pub fn clean_csv(bytes: &[u8]) -> Result<CleanedBatch> {
    clean(RawTable::from_csv(bytes)?)
}

fn clean_row(layout: &Layout, record: &StringRecord) -> Result<Option<CleanedAppointment>> {
    let scheduled_day = parse_timestamp("scheduled_day", cell(record, layout.scheduled_day, "scheduled_day")?)?;
    let appointment_day =
        parse_timestamp("appointment_day", cell(record, layout.appointment_day, "appointment_day")?)?;

    let age = clip_age(schema::parse_int("age", cell(record, layout.age, "age")?)?);
    let neighbourhood = normalize_neighbourhood(cell(record, layout.neighbourhood, "neighbourhood")?);

    let mut flags = [false; 5];
    for ((value, &index), column) in flags.iter_mut().zip(&layout.flags).zip(FLAG_COLUMNS) {
        *value = schema::coerce_flag(column, cell(record, index, column)?)?;
    }
    let [scholarship, hypertension, diabetes, alcoholism, sms_received] = flags;
    let no_show = schema::coerce_no_show(cell(record, layout.no_show, NO_SHOW_COLUMN)?)?;

    let wait_days = wait_days(scheduled_day, appointment_day);
    if wait_days < 0 {
        return Ok(None);
    }

    Ok(Some(CleanedAppointment {
        patient_id: cell(record, layout.patient_id, "patient_id")?.trim().to_string(),
        appointment_id: schema::parse_int(
            "appointment_id",
            cell(record, layout.appointment_id, "appointment_id")?,
        )?,
        gender: cell(record, layout.gender, "gender")?.trim().to_string(),
        scheduled_day,
        appointment_day,
        age,
        neighbourhood,
        scholarship,
        hypertension,
        diabetes,
        alcoholism,
        handicap: schema::parse_int("handicap", cell(record, layout.handicap, "handicap")?)?,
        sms_received,
        no_show,
        wait_days,
        scheduled_hour: scheduled_day.hour(),
        appointment_weekday: appointment_day.weekday().num_days_from_monday(),
        age_group: AgeGroup::for_age(age),
    }))
}

/// Parses into a timezone-naive instant. Offsets are converted to UTC and
/// then dropped; values without an offset are taken as UTC already.
pub fn parse_timestamp(column: &str, value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }
    // RFC 3339 with a space separator, e.g. `2016-04-29 18:38:08+02:00`
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight);
    }

    Err(EtlError::schema(format!(
        "column '{}' holds unparseable timestamp '{}'",
        column, value
    )))
}

pub fn clip_age(age: i64) -> i64 {
    age.clamp(MIN_AGE, MAX_AGE)
}

pub fn normalize_neighbourhood(value: &str) -> String {
    value.trim().to_lowercase()
}

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole days, floored: an appointment earlier the same day is -1.
pub fn wait_days(scheduled: NaiveDateTime, appointment: NaiveDateTime) -> i64 {
    (appointment - scheduled)
        .num_seconds()
        .div_euclid(SECONDS_PER_DAY)
}
