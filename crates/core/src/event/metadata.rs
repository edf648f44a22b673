//! Event metadata: known template fields plus an opaque pass-through map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::RiskLevel;
use crate::validation::{ValidationError, ValidationErrors};

/// Names of the metadata fields templates may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    /// ACH return code.
    ReturnCode,
    /// Customer's monthly processing volume.
    MonthlyVolume,
    /// Processor risk level.
    RiskLevel,
    /// Event id of the transaction being returned or refunded.
    OriginalEventId,
    /// Free-text description.
    Description,
}

impl FieldName {
    /// All known fields.
    pub const ALL: [Self; 5] = [
        Self::ReturnCode,
        Self::MonthlyVolume,
        Self::RiskLevel,
        Self::OriginalEventId,
        Self::Description,
    ];

    /// Metadata key of the field.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ReturnCode => "return_code",
            Self::MonthlyVolume => "monthly_volume",
            Self::RiskLevel => "risk_level",
            Self::OriginalEventId => "original_event_id",
            Self::Description => "description",
        }
    }

    /// Looks up a field by metadata key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum KnownField {
    /// ACH return code, e.g. `R01`.
    ReturnCode(String),
    /// Monthly volume in minor units.
    MonthlyVolume(i64),
    /// Risk level.
    RiskLevel(RiskLevel),
    /// Original event id.
    OriginalEventId(String),
    /// Description.
    Description(String),
}

impl KnownField {
    /// Field name of this value.
    #[must_use]
    pub const fn name(&self) -> FieldName {
        match self {
            Self::ReturnCode(_) => FieldName::ReturnCode,
            Self::MonthlyVolume(_) => FieldName::MonthlyVolume,
            Self::RiskLevel(_) => FieldName::RiskLevel,
            Self::OriginalEventId(_) => FieldName::OriginalEventId,
            Self::Description(_) => FieldName::Description,
        }
    }
}

/// Metadata attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Known fields, at most one per name.
    #[serde(default)]
    pub fields: Vec<KnownField>,
    /// Everything else, passed through untouched.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl EventMetadata {
    /// Lifts known keys out of a raw processor map.
    ///
    /// Unknown keys go to `extra`. Known keys with the wrong shape are
    /// reported together.
    ///
    /// # Errors
    ///
    /// Returns every malformed known field.
    pub fn from_raw(raw: Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut metadata = Self::default();
        let mut errors = ValidationErrors::new();

        for (key, value) in raw {
            let Some(name) = FieldName::from_key(&key) else {
                metadata.extra.insert(key, value);
                continue;
            };
            match lift(name, &value) {
                Some(field) => metadata.push(field),
                None => errors.push(ValidationError::malformed(key, expected_shape(name))),
            }
        }

        errors.into_result(metadata)
    }

    /// Sets a known field, replacing an earlier value of the same name.
    pub fn push(&mut self, field: KnownField) {
        let name = field.name();
        self.fields.retain(|f| f.name() != name);
        self.fields.push(field);
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn has(&self, name: FieldName) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }

    /// ACH return code.
    #[must_use]
    pub fn return_code(&self) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            KnownField::ReturnCode(code) => Some(code.as_str()),
            _ => None,
        })
    }

    /// Monthly volume.
    #[must_use]
    pub fn monthly_volume(&self) -> Option<i64> {
        self.fields.iter().find_map(|f| match f {
            KnownField::MonthlyVolume(v) => Some(*v),
            _ => None,
        })
    }

    /// Risk level.
    #[must_use]
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.fields.iter().find_map(|f| match f {
            KnownField::RiskLevel(r) => Some(*r),
            _ => None,
        })
    }

    /// Original event id.
    #[must_use]
    pub fn original_event_id(&self) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            KnownField::OriginalEventId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            KnownField::Description(d) => Some(d.as_str()),
            _ => None,
        })
    }
}

fn lift(name: FieldName, value: &Value) -> Option<KnownField> {
    match name {
        FieldName::ReturnCode => value
            .as_str()
            .map(|s| KnownField::ReturnCode(s.trim().to_uppercase())),
        FieldName::MonthlyVolume => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(KnownField::MonthlyVolume),
        FieldName::RiskLevel => value
            .as_str()
            .and_then(RiskLevel::parse)
            .map(KnownField::RiskLevel),
        FieldName::OriginalEventId => value
            .as_str()
            .map(|s| KnownField::OriginalEventId(s.to_string())),
        FieldName::Description => value
            .as_str()
            .map(|s| KnownField::Description(s.to_string())),
    }
}

const fn expected_shape(name: FieldName) -> &'static str {
    match name {
        FieldName::ReturnCode | FieldName::OriginalEventId | FieldName::Description => "a string",
        FieldName::MonthlyVolume => "an integer amount in minor units",
        FieldName::RiskLevel => "one of low, normal, elevated, high",
    }
}
