use crate::core::schema::{self, FLAG_COLUMNS, NO_SHOW_COLUMN};
use crate::core::table::{cell, RawTable};
use crate::domain::model::{RawAppointment, RAW_COLUMNS};
use crate::utils::error::Result;
use csv::StringRecord;

/// Projects an as-ingested table onto the canonical raw store columns.
///
/// Column names go through the shared alias table; flags use the same
/// coercions as cleaning. Timestamps and neighbourhood stay as ingested.
pub fn project_raw(table: RawTable) -> Result<Vec<RawAppointment>> {
    let table = table.normalize_columns();

    let mut index = [0usize; 14];
    for (slot, column) in index.iter_mut().zip(RAW_COLUMNS) {
        *slot = table.require(column)?;
    }
    let [
        patient_id,
        appointment_id,
        gender,
        scheduled_day,
        appointment_day,
        age,
        neighbourhood,
        scholarship,
        hypertension,
        diabetes,
        alcoholism,
        handicap,
        sms_received,
        no_show,
    ] = index;

    let text = |record: &StringRecord, i: usize, column: &str| -> Result<String> {
        Ok(cell(record, i, column)?.to_string())
    };
    let int = |record: &StringRecord, i: usize, column: &str| -> Result<i64> {
        schema::parse_int(column, cell(record, i, column)?)
    };
    let flag = |record: &StringRecord, i: usize, column: &str| -> Result<bool> {
        schema::coerce_flag(column, cell(record, i, column)?)
    };

    table
        .rows()
        .iter()
        .map(|r| {
            Ok(RawAppointment {
                patient_id: text(r, patient_id, "patient_id")?,
                appointment_id: int(r, appointment_id, "appointment_id")?,
                gender: text(r, gender, "gender")?,
                scheduled_day: text(r, scheduled_day, "scheduled_day")?,
                appointment_day: text(r, appointment_day, "appointment_day")?,
                age: int(r, age, "age")?,
                neighbourhood: text(r, neighbourhood, "neighbourhood")?,
                scholarship: flag(r, scholarship, FLAG_COLUMNS[0])?,
                hypertension: flag(r, hypertension, FLAG_COLUMNS[1])?,
                diabetes: flag(r, diabetes, FLAG_COLUMNS[2])?,
                alcoholism: flag(r, alcoholism, FLAG_COLUMNS[3])?,
                handicap: int(r, handicap, "handicap")?,
                sms_received: flag(r, sms_received, FLAG_COLUMNS[4])?,
                no_show: schema::coerce_no_show(cell(r, no_show, NO_SHOW_COLUMN)?)?,
            })
        })
        .collect()
}
