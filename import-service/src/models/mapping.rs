//! Column-mapping types shared by the suggestion providers and the mapping form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Value offered for optional fields to clear a previous selection.
pub const NO_SELECTION: &str = "None";

/// Target fields an imported file's columns are mapped onto.
///
/// The declaration order is the display order of the mapping form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappableField {
    Date,
    Description,
    Amount,
    Balance,
    Currency,
    Account,
}

/// Label and requirement flag of a mappable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub label: &'static str,
    pub required: bool,
}

impl MappableField {
    pub const ALL: [MappableField; 6] = [
        MappableField::Date,
        MappableField::Description,
        MappableField::Amount,
        MappableField::Balance,
        MappableField::Currency,
        MappableField::Account,
    ];

    pub fn spec(self) -> FieldSpec {
        match self {
            Self::Date => FieldSpec {
                label: "Date",
                required: true,
            },
            Self::Description => FieldSpec {
                label: "Description",
                required: true,
            },
            Self::Amount => FieldSpec {
                label: "Amount",
                required: true,
            },
            Self::Balance => FieldSpec {
                label: "Balance",
                required: false,
            },
            Self::Currency => FieldSpec {
                label: "Currency",
                required: false,
            },
            Self::Account => FieldSpec {
                label: "Account",
                required: false,
            },
        }
    }

    /// Wire key used in suggestion objects and request bodies.
    pub fn key(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Description => "description",
            Self::Amount => "amount",
            Self::Balance => "balance",
            Self::Currency => "currency",
            Self::Account => "account",
        }
    }

    pub fn is_required(self) -> bool {
        self.spec().required
    }
}

impl fmt::Display for MappableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown mappable field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for MappableField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MappableField::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// Header row and leading sample rows of an uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSample {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl FileSample {
    pub fn new(columns: Vec<String>, rows: Vec<BTreeMap<String, String>>) -> Self {
        Self { columns, rows }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Sample value of `column` in the first row.
    pub fn first_value(&self, column: &str) -> Option<&str> {
        self.rows.first()?.get(column).map(String::as_str)
    }
}

/// One incremental delivery of the suggestion stream.
///
/// Keys are untrusted: anything may arrive, and values are raw JSON so that
/// non-string guesses can be rejected instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialMapping(Map<String, Value>);

impl PartialMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PartialMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Bank account offered by the account selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub currency: Option<String>,
}
