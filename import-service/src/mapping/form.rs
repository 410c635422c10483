//! Editable state of the column-mapping form.
//!
//! One slot per mappable field plus the bank account selection. Slots are
//! written by two parties, the user and the suggestion stream, and every slot
//! remembers which one wrote it last.

use crate::models::{Account, MappableField, NO_SELECTION};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Who last wrote a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Unset,
    Suggested,
    User,
}

/// How a suggestion treats a slot the user already edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Suggestions never replace a user's choice.
    #[default]
    PreserveUserEdits,
    /// Every accepted write replaces the slot, whoever wrote it before.
    LastWriterWins,
}

impl std::str::FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preserve_user_edits" => Ok(Self::PreserveUserEdits),
            "last_writer_wins" => Ok(Self::LastWriterWins),
            other => Err(format!("unknown overwrite policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldSlot {
    pub value: Option<String>,
    pub provenance: Provenance,
    /// Set once the slot has been written through a validating path.
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("'{value}' is not a valid choice for {field}")]
    InvalidValue { field: MappableField, value: String },

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// Mapping accepted by [`FormState::validate_required`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmedMapping {
    pub columns: BTreeMap<MappableField, String>,
    pub bank_account_id: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormState {
    slots: BTreeMap<MappableField, FieldSlot>,
    bank_account_id: Option<String>,
    currency: Option<String>,
    show_currency: bool,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            slots: MappableField::ALL
                .into_iter()
                .map(|field| (field, FieldSlot::default()))
                .collect(),
            bank_account_id: None,
            currency: None,
            show_currency: false,
        }
    }
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, field: MappableField) -> &FieldSlot {
        // Every field gets a slot in `default`, and slots are never removed.
        &self.slots[&field]
    }

    fn slot_mut(&mut self, field: MappableField) -> &mut FieldSlot {
        self.slots.entry(field).or_default()
    }

    pub fn value(&self, field: MappableField) -> Option<&str> {
        self.slot(field).value.as_deref()
    }

    pub fn bank_account_id(&self) -> Option<&str> {
        self.bank_account_id.as_deref()
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    /// Whether the manual currency selector is visible.
    pub fn show_currency(&self) -> bool {
        self.show_currency
    }

    /// Manual edit of a mapping slot.
    ///
    /// `value` must be one of `columns`. Optional fields also accept the
    /// "None" sentinel or an empty string, which clears the slot.
    pub fn set_by_user(
        &mut self,
        field: MappableField,
        value: &str,
        columns: &[String],
    ) -> Result<(), FormError> {
        let cleared = value.is_empty() || value == NO_SELECTION;
        let new_value = if cleared && !field.is_required() {
            None
        } else if columns.iter().any(|c| c == value) {
            Some(value.to_string())
        } else {
            return Err(FormError::InvalidValue {
                field,
                value: value.to_string(),
            });
        };

        let slot = self.slot_mut(field);
        slot.value = new_value;
        slot.provenance = Provenance::User;
        slot.validated = true;
        Ok(())
    }

    /// Write path used by the suggestion stream. The caller has already
    /// checked that `column` is one of the file's columns.
    ///
    /// Returns whether the slot was written.
    pub fn apply_suggestion(
        &mut self,
        field: MappableField,
        column: &str,
        policy: OverwritePolicy,
    ) -> bool {
        let slot = self.slot_mut(field);
        if policy == OverwritePolicy::PreserveUserEdits && slot.provenance == Provenance::User {
            return false;
        }

        slot.value = Some(column.to_string());
        slot.provenance = Provenance::Suggested;
        slot.validated = true;
        true
    }

    /// Reset every slot whose column is not in `columns`, after the file
    /// changed underneath the form.
    pub fn retain_columns(&mut self, columns: &[String]) {
        for slot in self.slots.values_mut() {
            let stale = slot
                .value
                .as_ref()
                .is_some_and(|v| !columns.iter().any(|c| c == v));
            if stale {
                *slot = FieldSlot::default();
            }
        }
    }

    /// Select the bank account the rows are imported into.
    ///
    /// An account with its own currency fills in the currency and hides the
    /// selector; one without reveals the selector and keeps the current
    /// currency.
    pub fn select_account(&mut self, account: &Account) {
        self.bank_account_id = Some(account.id.clone());

        match account.currency.as_deref().and_then(normalize_currency) {
            Some(currency) => {
                self.currency = Some(currency);
                self.show_currency = false;
            }
            None => self.show_currency = true,
        }
    }

    /// Manual currency choice from the selector.
    pub fn set_currency(&mut self, currency: &str) {
        self.currency = normalize_currency(currency);
    }

    /// Values offered by the selector for `field`.
    pub fn column_options(&self, field: MappableField, columns: &[String]) -> Vec<String> {
        let mut options = columns.to_vec();
        if self.value(field).is_some() && !field.is_required() {
            options.push(NO_SELECTION.to_string());
        }
        options
    }

    /// Check performed when the user proceeds past the mapping step.
    pub fn validate_required(&self) -> Result<ConfirmedMapping, FormError> {
        let mut missing: Vec<&'static str> = MappableField::ALL
            .into_iter()
            .filter(|f| f.is_required() && self.value(*f).is_none())
            .map(MappableField::key)
            .collect();
        if self.bank_account_id.is_none() {
            missing.push("bank_account_id");
        }
        if self.currency.is_none() {
            missing.push("currency");
        }

        match (&self.bank_account_id, &self.currency) {
            (Some(account), Some(currency)) if missing.is_empty() => Ok(ConfirmedMapping {
                columns: self
                    .slots
                    .iter()
                    .filter_map(|(field, slot)| slot.value.clone().map(|v| (*field, v)))
                    .collect(),
                bank_account_id: account.clone(),
                currency: currency.clone(),
            }),
            _ => Err(FormError::MissingFields(missing)),
        }
    }
}

/// Currency codes are kept trimmed and upper-case whichever way they arrive.
fn normalize_currency(currency: &str) -> Option<String> {
    let currency = currency.trim();
    (!currency.is_empty()).then(|| currency.to_uppercase())
}
