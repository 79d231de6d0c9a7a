//! Guided capture over the unit's equipment × parameter grid.
//!
//! The machine walks equipment in catalog order and, within each, parameters
//! in catalog order. Each accepted value moves the cursor one cell; the last
//! parameter of an equipment commits that equipment's record through the
//! [`SyncCoordinator`] and only then moves to the next equipment.
//!
//! ```text
//! AwaitingUnit ──select_unit──▶ AwaitingValue(unit, e, p) ──…──▶ Complete(unit)
//!        ▲                                                          │
//!        └──────────────────────── switch_mode ◀────────────────────┘
//! ```
//!
//! Edit mode is a side entry: [`GuidedEntryMachine::edit_select`] jumps to a
//! single previously captured cell and [`GuidedEntryMachine::edit_submit`]
//! commits a new, superseding record for that equipment. Nothing is ever
//! updated in place.
//!
//! The in-progress grid lives only in memory. After a restart,
//! [`GuidedEntryMachine::select_unit`] rebuilds the cursor from what was
//! already captured that day.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::catalog::{Catalog, Equipment, Parameter};
use crate::error::Error;
use crate::sync::{CommitOutcome, RecordDraft, SyncCoordinator};
use crate::validator::{self, Rejection};

/// Default limit on a note's length, in characters.
pub const DEFAULT_MAX_NOTE_LENGTH: usize = 500;

/// Errors from the entry machine.
#[derive(Debug, Error)]
pub enum EntryError {
    /// The value broke a validation rule; nothing changed.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The record could not be stored; the capture is not safe.
    #[error("capture not saved: {0}")]
    Ledger(#[from] Error),

    /// No cell is waiting for a value.
    #[error("no value is expected in the current state")]
    NoActiveCell,

    /// The unit is not in the catalog.
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    /// The equipment is not in the catalog.
    #[error("unknown equipment '{0}'")]
    UnknownEquipment(String),

    /// The parameter is not in the catalog.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Nothing was captured for that equipment on that day.
    #[error("no readings captured for {equipment} on {unit} that day")]
    NothingToEdit {
        /// Unit id.
        unit: String,
        /// Equipment id.
        equipment: String,
    },

    /// The note is longer than allowed.
    #[error("note is {length} characters, the limit is {max}")]
    NoteTooLong {
        /// Length of the rejected note.
        length: usize,
        /// The configured limit.
        max: usize,
    },
}

/// How values are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Sequential walk over the grid.
    #[default]
    Guided,
    /// Direct corrections to captured cells.
    Edit,
}

/// Where the machine is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// No unit chosen.
    AwaitingUnit,
    /// Waiting for the value of one cell.
    AwaitingValue {
        /// Selected unit.
        unit: String,
        /// Current equipment, in catalog order.
        equipment_idx: usize,
        /// Current parameter, in catalog order.
        param_idx: usize,
    },
    /// Every equipment of the unit has been captured for the day.
    Complete {
        /// Selected unit.
        unit: String,
    },
    /// Correcting one captured cell.
    Editing {
        /// Selected unit.
        unit: String,
        /// Selected equipment.
        equipment_idx: usize,
        /// Selected parameter.
        param_idx: usize,
    },
}

/// Cursor position over the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Equipment index; equals `equipment_count` when complete.
    pub equipment_idx: usize,
    /// Parameter index within the equipment.
    pub param_idx: usize,
    /// Equipment in the catalog.
    pub equipment_count: usize,
    /// Parameters in the catalog.
    pub param_count: usize,
}

impl Progress {
    /// Cells captured so far.
    #[must_use]
    pub fn done(&self) -> usize {
        self.equipment_idx * self.param_count + self.param_idx
    }

    /// Cells in the grid.
    #[must_use]
    pub fn total(&self) -> usize {
        self.equipment_count * self.param_count
    }

    /// Fraction of the grid captured, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.done() as f64 / total as f64,
        }
    }
}

/// What an accepted value led to.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// Stored; more parameters remain for this equipment.
    Stored {
        /// Parameter id.
        parameter: String,
        /// Accepted value.
        value: f64,
    },
    /// Last parameter stored and the equipment's record committed.
    Committed {
        /// Result of the commit.
        outcome: CommitOutcome,
        /// Whether this was the unit's last equipment.
        grid_complete: bool,
    },
}

/// The guided entry state machine.
#[derive(Debug)]
pub struct GuidedEntryMachine {
    catalog: Arc<Catalog>,
    coordinator: Arc<SyncCoordinator>,
    max_note_length: usize,
    mode: Mode,
    state: EntryState,
    date: NaiveDate,
    pending: BTreeMap<String, f64>,
    note: Option<String>,
    /// Readings of the equipment being edited, as last committed.
    edit_base: BTreeMap<String, f64>,
    progress: watch::Sender<Progress>,
}

impl GuidedEntryMachine {
    /// Create a machine in guided mode, awaiting a unit.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        coordinator: Arc<SyncCoordinator>,
        max_note_length: usize,
    ) -> Self {
        let (progress, _) = watch::channel(Progress {
            equipment_count: catalog.equipment.len(),
            param_count: catalog.parameters.len(),
            ..Progress::default()
        });
        Self {
            catalog,
            coordinator,
            max_note_length,
            mode: Mode::Guided,
            state: EntryState::AwaitingUnit,
            date: Local::now().date_naive(),
            pending: BTreeMap::new(),
            note: None,
            edit_base: BTreeMap::new(),
            progress,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &EntryState {
        &self.state
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The shift day being captured.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Follow progress changes.
    #[must_use]
    pub fn watch_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Values entered for the current equipment, not yet committed.
    #[must_use]
    pub fn pending(&self) -> &BTreeMap<String, f64> {
        &self.pending
    }

    /// The note that will go with the next commit.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Equipment at the cursor, if a cell is active.
    #[must_use]
    pub fn current_equipment(&self) -> Option<&Equipment> {
        self.cursor()
            .and_then(|(_, e, _)| self.catalog.equipment.get(e))
    }

    /// Parameter at the cursor, if a cell is active.
    #[must_use]
    pub fn current_parameter(&self) -> Option<&Parameter> {
        self.cursor()
            .and_then(|(_, _, p)| self.catalog.parameters.get(p))
    }

    /// Start today's capture for `unit`.
    ///
    /// # Errors
    ///
    /// See [`select_unit_on`](Self::select_unit_on).
    pub async fn select_unit(&mut self, unit: &str) -> Result<&EntryState, EntryError> {
        let today = Local::now().date_naive();
        self.select_unit_on(unit, today).await
    }

    /// Start capture for `unit` on `date`, resuming after what is already
    /// captured.
    ///
    /// The cursor lands on the first equipment, in catalog order, without a
    /// complete record for the day, at its first parameter. If none is
    /// missing the machine goes straight to [`EntryState::Complete`].
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::UnknownUnit`] for a unit outside the catalog, or
    /// [`EntryError::Ledger`] if the day's records cannot be read.
    pub async fn select_unit_on(
        &mut self,
        unit: &str,
        date: NaiveDate,
    ) -> Result<&EntryState, EntryError> {
        if self.catalog.unit(unit).is_none() {
            return Err(EntryError::UnknownUnit(unit.to_string()));
        }

        let captured = self.coordinator.captured_for_day(unit, date).await?;
        let resume_at = self
            .catalog
            .equipment
            .iter()
            .position(|e| !captured.is_equipment_complete(&e.id, &self.catalog));

        self.mode = Mode::Guided;
        self.date = date;
        self.pending.clear();
        self.note = None;
        self.state = match resume_at {
            Some(equipment_idx) => EntryState::AwaitingValue {
                unit: unit.to_string(),
                equipment_idx,
                param_idx: 0,
            },
            None => EntryState::Complete {
                unit: unit.to_string(),
            },
        };
        info!(unit, %date, state = ?self.state, "Unit selected");
        self.publish_progress();
        Ok(&self.state)
    }

    /// Submit the raw value for the current cell.
    ///
    /// A rejected value leaves the machine unchanged. An accepted value on the
    /// equipment's last parameter commits the record; the cursor moves on
    /// only once the ledger has it.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::Rejected`] for an invalid value,
    /// [`EntryError::NoActiveCell`] outside guided capture, or
    /// [`EntryError::Ledger`] if the commit could not be stored.
    pub async fn submit_value(&mut self, raw: &str) -> Result<Submitted, EntryError> {
        let EntryState::AwaitingValue {
            unit,
            equipment_idx,
            param_idx,
        } = self.state.clone()
        else {
            return Err(EntryError::NoActiveCell);
        };
        let Some(parameter) = self.catalog.parameters.get(param_idx) else {
            return Err(EntryError::NoActiveCell);
        };
        let value = validator::validate(raw, parameter).inspect_err(|rejection| {
            debug!(parameter = %parameter.id, "Rejected value: {rejection}");
        })?;
        let parameter_id = parameter.id.clone();

        let next_param = param_idx + 1;
        if next_param < self.catalog.parameters.len() {
            self.pending.insert(parameter_id.clone(), value);
            self.state = EntryState::AwaitingValue {
                unit,
                equipment_idx,
                param_idx: next_param,
            };
            self.publish_progress();
            return Ok(Submitted::Stored {
                parameter: parameter_id,
                value,
            });
        }

        let mut parameters = self.pending.clone();
        parameters.insert(parameter_id, value);
        let Some(equipment) = self.catalog.equipment.get(equipment_idx) else {
            return Err(EntryError::NoActiveCell);
        };
        let draft = RecordDraft {
            unit: unit.clone(),
            equipment: equipment.id.clone(),
            date: self.date,
            parameters,
            notes: self.note.clone(),
        };
        let outcome = self.coordinator.commit(draft).await?;

        self.pending.clear();
        self.note = None;
        let next_equipment = equipment_idx + 1;
        let grid_complete = next_equipment >= self.catalog.equipment.len();
        self.state = if grid_complete {
            info!(unit = %unit, "All equipment captured");
            EntryState::Complete { unit }
        } else {
            EntryState::AwaitingValue {
                unit,
                equipment_idx: next_equipment,
                param_idx: 0,
            }
        };
        self.publish_progress();
        Ok(Submitted::Committed {
            outcome,
            grid_complete,
        })
    }

    /// Set the note for the current equipment. Blank text clears it.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::NoActiveCell`] if no equipment is active, or
    /// [`EntryError::NoteTooLong`] past the configured limit.
    pub fn set_note(&mut self, text: &str) -> Result<(), EntryError> {
        if self.cursor().is_none() {
            return Err(EntryError::NoActiveCell);
        }
        let length = text.chars().count();
        if length > self.max_note_length {
            return Err(EntryError::NoteTooLong {
                length,
                max: self.max_note_length,
            });
        }
        let text = text.trim();
        self.note = (!text.is_empty()).then(|| text.to_string());
        Ok(())
    }

    /// Drop the current equipment's uncommitted values and note and go back
    /// to its first parameter.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::NoActiveCell`] outside guided capture.
    pub fn restart_equipment(&mut self) -> Result<(), EntryError> {
        let EntryState::AwaitingValue { param_idx, .. } = &mut self.state else {
            return Err(EntryError::NoActiveCell);
        };
        *param_idx = 0;
        self.pending.clear();
        self.note = None;
        self.publish_progress();
        Ok(())
    }

    /// Switch between guided and edit mode, discarding all progress.
    pub fn switch_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.state = EntryState::AwaitingUnit;
        self.pending.clear();
        self.note = None;
        self.edit_base.clear();
        self.publish_progress();
        debug!(?mode, "Switched entry mode");
    }

    /// Select a captured cell for correction and return its current value.
    ///
    /// Enters edit mode. The equipment's newest note is carried over;
    /// [`set_note`](Self::set_note) replaces it.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown*` error for ids outside the catalog,
    /// [`EntryError::NothingToEdit`] if the equipment has no record that
    /// day, or [`EntryError::Ledger`] if the records cannot be read.
    pub async fn edit_select(
        &mut self,
        unit: &str,
        equipment: &str,
        parameter: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, EntryError> {
        if self.catalog.unit(unit).is_none() {
            return Err(EntryError::UnknownUnit(unit.to_string()));
        }
        let equipment_idx = self
            .catalog
            .equipment_index(equipment)
            .ok_or_else(|| EntryError::UnknownEquipment(equipment.to_string()))?;
        let param_idx = self
            .catalog
            .parameter_index(parameter)
            .ok_or_else(|| EntryError::UnknownParameter(parameter.to_string()))?;

        let captured = self.coordinator.captured_for_day(unit, date).await?;
        let Some(base) = captured.parameters(equipment) else {
            return Err(EntryError::NothingToEdit {
                unit: unit.to_string(),
                equipment: equipment.to_string(),
            });
        };

        self.mode = Mode::Edit;
        self.date = date;
        self.edit_base = base.clone();
        self.pending.clear();
        self.note = captured.notes(equipment).map(str::to_string);
        self.state = EntryState::Editing {
            unit: unit.to_string(),
            equipment_idx,
            param_idx,
        };
        self.publish_progress();
        Ok(self.edit_base.get(parameter).copied())
    }

    /// Replace the selected cell's value by committing a new record for the
    /// equipment with every other reading carried over.
    ///
    /// The cell stays selected, so further corrections build on this one.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::NoActiveCell`] if no cell is selected,
    /// [`EntryError::Rejected`] for an invalid value, or
    /// [`EntryError::Ledger`] if the commit could not be stored.
    pub async fn edit_submit(&mut self, raw: &str) -> Result<CommitOutcome, EntryError> {
        let EntryState::Editing {
            unit,
            equipment_idx,
            param_idx,
        } = self.state.clone()
        else {
            return Err(EntryError::NoActiveCell);
        };
        let Some(parameter) = self.catalog.parameters.get(param_idx) else {
            return Err(EntryError::NoActiveCell);
        };
        let value = validator::validate(raw, parameter)?;

        let parameter_id = parameter.id.clone();
        let mut parameters = self.edit_base.clone();
        parameters.insert(parameter_id.clone(), value);
        let Some(equipment) = self.catalog.equipment.get(equipment_idx) else {
            return Err(EntryError::NoActiveCell);
        };
        let draft = RecordDraft {
            unit,
            equipment: equipment.id.clone(),
            date: self.date,
            parameters: parameters.clone(),
            notes: self.note.clone(),
        };
        let outcome = self.coordinator.commit(draft).await?;

        info!(
            equipment = %outcome.record.equipment,
            parameter = %parameter_id,
            "Correction committed"
        );
        self.edit_base = parameters;
        Ok(outcome)
    }

    fn cursor(&self) -> Option<(&str, usize, usize)> {
        match &self.state {
            EntryState::AwaitingValue {
                unit,
                equipment_idx,
                param_idx,
            }
            | EntryState::Editing {
                unit,
                equipment_idx,
                param_idx,
            } => Some((unit.as_str(), *equipment_idx, *param_idx)),
            EntryState::AwaitingUnit | EntryState::Complete { .. } => None,
        }
    }

    fn publish_progress(&self) {
        let equipment_count = self.catalog.equipment.len();
        let param_count = self.catalog.parameters.len();
        let (equipment_idx, param_idx) = match &self.state {
            EntryState::AwaitingUnit | EntryState::Editing { .. } => (0, 0),
            EntryState::AwaitingValue {
                equipment_idx,
                param_idx,
                ..
            } => (*equipment_idx, *param_idx),
            EntryState::Complete { .. } => (equipment_count, 0),
        };
        self.progress.send_replace(Progress {
            equipment_idx,
            param_idx,
            equipment_count,
            param_count,
        });
    }
}
