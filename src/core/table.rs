use crate::core::schema;
use crate::utils::error::{EtlError, Result};
use csv::StringRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A decoded tabular payload: named header plus untyped rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<StringRecord>,
}

impl RawTable {
    /// Parses CSV bytes with a header row. A payload that is not valid CSV
    /// cannot be cleaned and is reported as a schema violation.
    pub fn from_csv(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let columns = reader
            .headers()
            .map_err(|e| EtlError::schema(format!("unreadable CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EtlError::schema(format!("unreadable CSV row: {}", e)))?;

        Ok(Self { columns, rows })
    }

    pub fn normalize_columns(mut self) -> Self {
        self.columns = schema::normalize_columns(&self.columns);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a required column, first match wins.
    pub fn require(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| EtlError::schema(format!("required column '{}' is missing", column)))
    }
}

/// Reads a cell by position. Rows shorter than the header are rejected by
/// the csv reader, so a miss here means the index came from another table.
pub(crate) fn cell<'r>(row: &'r StringRecord, index: usize, column: &str) -> Result<&'r str> {
    row.get(index)
        .ok_or_else(|| EtlError::schema(format!("row has no value for column '{}'", column)))
}

pub fn write_records<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer.into_inner().map_err(|e| EtlError::IoError(e.into_error()))
}

/// Deserializes typed rows; any mismatch with `T`'s columns is a schema violation.
pub fn read_records<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>> {
    csv::Reader::from_reader(bytes)
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| EtlError::schema(format!("payload does not match the expected columns: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_csv_and_normalize() {
        let table = RawTable::from_csv(b"PatientId,No-show\n1,No\n2,Yes\n")
            .unwrap()
            .normalize_columns();

        assert_eq!(table.columns(), &["patient_id", "no_show"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.require("no_show").unwrap(), 1);
        assert!(matches!(
            table.require("age"),
            Err(EtlError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let err = RawTable::from_csv(b"a,b\n1,2\n3\n").unwrap_err();
        assert!(err.is_poison());
    }

    #[test]
    fn test_read_records_rejects_foreign_columns() {
        #[derive(Debug, serde::Deserialize)]
        struct Row {
            age: i64,
        }

        let rows: Vec<Row> = read_records(b"age\n30\n").unwrap();
        assert_eq!(rows[0].age, 30);
        let err = read_records::<Row>(b"name\nana\n").unwrap_err();
        assert!(err.is_poison());
    }
}
