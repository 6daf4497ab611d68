//! Record store gateway.
//!
//! Finds rows whose `image_url` is NULL or empty and writes the published
//! URL back. Every call opens and closes its own connection; there is no
//! cross-call transaction and no caching of rows between passes.

use anyhow::{Context, Result, ensure};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::TableDescriptor;

/// A single column value as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<ValueRef<'_>> for FieldValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(n) => FieldValue::Integer(n),
            ValueRef::Real(f) => FieldValue::Real(f),
            ValueRef::Text(bytes) => {
                FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            // Blob columns never feed a prompt; treat them as absent.
            ValueRef::Blob(_) => FieldValue::Null,
        }
    }
}

/// One row eligible for image generation.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub id: i64,
    pub fields: BTreeMap<String, FieldValue>,
}

impl CandidateRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).filter(|value| !value.is_null())
    }
}

pub struct RecordStore {
    db_path: PathBuf,
}

impl RecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context(format!("failed to open database {:?}", self.db_path))
    }

    /// All rows of the table whose `image_url` is NULL or the empty
    /// string, ordered by id so that limit selection is deterministic.
    pub fn find_candidates(&self, descriptor: &TableDescriptor) -> Result<Vec<CandidateRecord>> {
        let connection = self.connect()?;

        let sql = format!(
            "SELECT * FROM {} WHERE image_url IS NULL OR image_url = '' ORDER BY id",
            descriptor.table
        );
        let mut statement = connection
            .prepare(&sql)
            .context(format!("failed to query table {}", descriptor.table))?;

        let column_names: Vec<String> = statement
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = statement.query([])?;
        let mut candidates = Vec::new();

        while let Some(row) = rows.next()? {
            let mut fields = BTreeMap::new();
            for (index, name) in column_names.iter().enumerate() {
                fields.insert(name.clone(), FieldValue::from(row.get_ref(index)?));
            }

            let id = match fields.get("id") {
                Some(FieldValue::Integer(id)) => *id,
                _ => {
                    anyhow::bail!(
                        "table {} has a row without an integer id column",
                        descriptor.table
                    )
                }
            };

            candidates.push(CandidateRecord { id, fields });
        }

        Ok(candidates)
    }

    /// Write the published URL back to a single row, committed immediately.
    pub fn update_image_url(
        &self,
        descriptor: &TableDescriptor,
        record_id: i64,
        url_path: &str,
    ) -> Result<()> {
        let connection = self.connect()?;

        let sql = format!("UPDATE {} SET image_url = ?1 WHERE id = ?2", descriptor.table);
        let updated = connection
            .execute(&sql, rusqlite::params![url_path, record_id])
            .context(format!(
                "failed to update image_url for {} id {}",
                descriptor.table, record_id
            ))?;

        ensure!(
            updated == 1,
            "update of {} id {} touched {} rows",
            descriptor.table,
            record_id,
            updated
        );
        Ok(())
    }
}
