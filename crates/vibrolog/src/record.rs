//! Core record types for vibrolog.
//!
//! A [`CaptureRecord`] holds one equipment's complete parameter set for one
//! unit and shift day. Records are create-only: after construction the only
//! field that ever changes is `synced`, and only from `false` to `true`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

/// Label stamped on records captured without a signed-in user.
pub const GUEST_NAME: &str = "Guest";

/// The user a record is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Identifier issued by the session provider.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
}

/// One equipment's readings for a unit and shift day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Ledger-assigned id; `None` until appended, and on remote-only rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<i64>,

    /// Catalog unit id.
    pub unit: String,

    /// Catalog equipment id.
    pub equipment: String,

    /// The shift day.
    pub date: NaiveDate,

    /// Reading per catalog parameter id.
    pub parameters: BTreeMap<String, f64>,

    /// Free-text note for the whole equipment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Capturing user's id, absent for anonymous capture.
    pub author_id: Option<String>,

    /// Capturing user's name, or [`GUEST_NAME`].
    pub author_name: String,

    /// When the record was committed locally.
    pub captured_at: DateTime<Utc>,

    /// Whether the remote store has acknowledged this record.
    pub synced: bool,

    /// BLAKE3 digest identifying this capture across retries.
    pub fingerprint: String,
}

impl CaptureRecord {
    /// Assemble a record, stamping author, capture time and fingerprint.
    #[must_use]
    pub fn new(
        unit: &str,
        equipment: &str,
        date: NaiveDate,
        parameters: BTreeMap<String, f64>,
        notes: Option<String>,
        author: Option<&Author>,
    ) -> Self {
        let captured_at = Utc::now();
        let notes = notes.filter(|n| !n.trim().is_empty());
        let fingerprint = Self::compute_fingerprint(unit, equipment, date, &parameters, captured_at);
        Self {
            local_id: None,
            unit: unit.to_string(),
            equipment: equipment.to_string(),
            date,
            parameters,
            notes,
            author_id: author.map(|a| a.id.clone()),
            author_name: author.map_or_else(|| GUEST_NAME.to_string(), |a| a.display_name.clone()),
            captured_at,
            synced: false,
            fingerprint,
        }
    }

    /// Compute the BLAKE3 fingerprint of a capture.
    #[must_use]
    pub fn compute_fingerprint(
        unit: &str,
        equipment: &str,
        date: NaiveDate,
        parameters: &BTreeMap<String, f64>,
        captured_at: DateTime<Utc>,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(unit.as_bytes());
        hasher.update(b"\0");
        hasher.update(equipment.as_bytes());
        hasher.update(b"\0");
        hasher.update(date.to_string().as_bytes());
        for (id, value) in parameters {
            hasher.update(b"\0");
            hasher.update(id.as_bytes());
            hasher.update(b"=");
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(b"\0");
        hasher.update(captured_at.to_rfc3339().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Whether the record carries a reading for every catalog parameter.
    #[must_use]
    pub fn is_complete(&self, catalog: &Catalog) -> bool {
        catalog
            .parameters
            .iter()
            .all(|p| self.parameters.contains_key(&p.id))
    }
}

/// Selection criteria shared by the ledger and the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Only this unit.
    pub unit: Option<String>,
    /// Only this equipment.
    pub equipment: Option<String>,
    /// Only this day.
    pub date: Option<NaiveDate>,
    /// Range start, inclusive. Ignored unless `date_to` is also set.
    pub date_from: Option<NaiveDate>,
    /// Range end, inclusive. Ignored unless `date_from` is also set.
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    /// Filter for one unit's day.
    #[must_use]
    pub fn day(unit: &str, date: NaiveDate) -> Self {
        Self {
            unit: Some(unit.to_string()),
            date: Some(date),
            ..Self::default()
        }
    }

    /// The inclusive range, if both ends are set.
    #[must_use]
    pub fn range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_from.zip(self.date_to)
    }

    /// Check a record against the filter.
    #[must_use]
    pub fn matches(&self, record: &CaptureRecord) -> bool {
        self.unit.as_ref().map_or(true, |u| *u == record.unit)
            && self
                .equipment
                .as_ref()
                .map_or(true, |e| *e == record.equipment)
            && self.date.map_or(true, |d| d == record.date)
            && self
                .range()
                .map_or(true, |(from, to)| record.date >= from && record.date <= to)
    }
}

/// What has already been captured for one unit on one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayCapture {
    by_equipment: HashMap<String, Newest>,
}

#[derive(Debug, Clone, PartialEq)]
struct Newest {
    captured_at: DateTime<Utc>,
    parameters: BTreeMap<String, f64>,
    notes: Option<String>,
}

impl DayCapture {
    /// Build from records, keeping the newest record per equipment.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CaptureRecord>) -> Self {
        let mut day = Self::default();
        for record in records {
            day.absorb(record);
        }
        day
    }

    /// Fold one more record in; an older record never replaces a newer one.
    pub fn absorb(&mut self, record: &CaptureRecord) {
        match self.by_equipment.get(&record.equipment) {
            Some(seen) if seen.captured_at > record.captured_at => {}
            _ => {
                self.by_equipment.insert(
                    record.equipment.clone(),
                    Newest {
                        captured_at: record.captured_at,
                        parameters: record.parameters.clone(),
                        notes: record.notes.clone(),
                    },
                );
            }
        }
    }

    /// Readings captured for an equipment, if any.
    #[must_use]
    pub fn parameters(&self, equipment: &str) -> Option<&BTreeMap<String, f64>> {
        self.by_equipment.get(equipment).map(|n| &n.parameters)
    }

    /// Note on the newest record for an equipment.
    #[must_use]
    pub fn notes(&self, equipment: &str) -> Option<&str> {
        self.by_equipment
            .get(equipment)
            .and_then(|n| n.notes.as_deref())
    }

    /// Whether an equipment has a reading for every catalog parameter.
    #[must_use]
    pub fn is_equipment_complete(&self, equipment: &str, catalog: &Catalog) -> bool {
        self.parameters(equipment).is_some_and(|params| {
            catalog
                .parameters
                .iter()
                .all(|p| params.contains_key(&p.id))
        })
    }

    /// Equipment ids with any captured data.
    #[must_use]
    pub fn equipment_ids(&self) -> BTreeSet<&str> {
        self.by_equipment.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A complete record for `equipment` using the built-in catalog.
    pub(crate) fn complete_record(unit: &str, equipment: &str, date: NaiveDate) -> CaptureRecord {
        let catalog = Catalog::default();
        let parameters = catalog
            .parameters
            .iter()
            .map(|p| (p.id.clone(), 1.25))
            .collect();
        CaptureRecord::new(unit, equipment, date, parameters, None, None)
    }

    pub(crate) fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap_or_default()
    }
}
