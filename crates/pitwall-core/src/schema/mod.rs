//! Typed form schema model.
//!
//! Form descriptors live on disk as YAML; each descriptor maps to exactly
//! one subteam role and enumerates the fields of that role's form. The
//! descriptor shape is validated at load time so the rest of the server can
//! assume a well-formed schema: a `select` field always has options, field
//! names are unique within a form, and the role is a member of the closed
//! set.

mod registry;

pub use registry::{FormRegistry, SchemaError};

use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// Maximum accepted length for a single submitted field value.
pub const MAX_FIELD_VALUE_LENGTH: usize = 10_000;

/// Maximum number of fields accepted in one submission.
pub const MAX_FORM_VALUES_PER_SUBMIT: usize = 200;

/// The kind of input a form field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Textarea,
    Select,
}

/// A single field of a form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Allowed values; present iff `kind` is `Select` (enforced at load).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Optional grouping for the UI; distinct non-null tabs become the
    /// form's tab list in field order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    /// Show the previous run's value next to this field.
    #[serde(default)]
    pub lookback: bool,
    /// Seconds after which a stored value no longer counts as fresh for
    /// LDX injection. `None` means no staleness window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window: Option<u64>,
    /// Render the stored value as a UNIX timestamp in the UI.
    #[serde(default)]
    pub unix_timestamp: bool,
    /// Field id used in LDX `<entry>` elements; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<String>,
}

impl FormField {
    /// The id this field is injected under in LDX files.
    #[must_use]
    pub fn inject_id(&self) -> &str {
        self.inject.as_deref().unwrap_or(&self.name)
    }
}

/// A role's form: an ordered list of fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub form_name: String,
    pub role: Role,
    pub fields: Vec<FormField>,
}

impl FormSchema {
    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Ordered distinct non-null `tab` values in field order.
    #[must_use]
    pub fn tabs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for field in &self.fields {
            if let Some(tab) = field.tab.as_deref() {
                if !out.contains(&tab) {
                    out.push(tab);
                }
            }
        }
        out
    }
}

/// A submitted value that failed validation against its field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("'{label}' is required")]
    Required { label: String },
    #[error("'{label}' must be a valid number")]
    NotANumber { label: String },
    #[error("'{label}' must be one of: {allowed}")]
    NotAnOption { label: String, allowed: String },
    #[error("'{label}' exceeds maximum length of {max} characters")]
    TooLong { label: String, max: usize },
}

/// Coerces a submitted value to its field type.
///
/// Trims surrounding whitespace; an empty or missing value normalizes to
/// `None`. Number fields must parse as a float, select fields must name one
/// of their options. The returned string is what gets stored and compared
/// against the current value.
///
/// # Errors
///
/// Returns a [`FieldError`] naming the field label when the value cannot be
/// coerced.
pub fn normalize_value(
    field: &FormField,
    raw: Option<&str>,
) -> Result<Option<String>, FieldError> {
    let trimmed = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(value) = trimmed else {
        if field.required {
            return Err(FieldError::Required {
                label: field.label.clone(),
            });
        }
        return Ok(None);
    };

    if value.len() > MAX_FIELD_VALUE_LENGTH {
        return Err(FieldError::TooLong {
            label: field.label.clone(),
            max: MAX_FIELD_VALUE_LENGTH,
        });
    }

    match field.kind {
        FieldKind::Text | FieldKind::Textarea => {}
        FieldKind::Number => {
            if value.parse::<f64>().is_err() {
                return Err(FieldError::NotANumber {
                    label: field.label.clone(),
                });
            }
        }
        FieldKind::Select => {
            let options = field.options.as_deref().unwrap_or_default();
            if !options.iter().any(|o| o == value) {
                return Err(FieldError::NotAnOption {
                    label: field.label.clone(),
                    allowed: options.join(", "),
                });
            }
        }
    }

    Ok(Some(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(kind: FieldKind) -> FormField {
        FormField {
            name: "sampling_rate".into(),
            label: "Sampling Rate".into(),
            kind,
            required: false,
            options: None,
            placeholder: None,
            unit: None,
            tab: None,
            lookback: false,
            validity_window: None,
            unix_timestamp: false,
            inject: None,
        }
    }

    #[test]
    fn test_normalize_trims_and_nulls_empty() {
        let f = field(FieldKind::Text);
        assert_eq!(
            normalize_value(&f, Some("  100 ")).unwrap(),
            Some("100".to_string())
        );
        assert_eq!(normalize_value(&f, Some("   ")).unwrap(), None);
        assert_eq!(normalize_value(&f, None).unwrap(), None);
    }

    #[test]
    fn test_required_empty_rejected() {
        let mut f = field(FieldKind::Text);
        f.required = true;
        assert!(matches!(
            normalize_value(&f, None),
            Err(FieldError::Required { .. })
        ));
    }

    #[test]
    fn test_number_coercion() {
        let f = field(FieldKind::Number);
        assert_eq!(
            normalize_value(&f, Some("12.5")).unwrap(),
            Some("12.5".to_string())
        );
        assert!(matches!(
            normalize_value(&f, Some("fast")),
            Err(FieldError::NotANumber { .. })
        ));
    }

    #[test]
    fn test_select_must_match_option() {
        let mut f = field(FieldKind::Select);
        f.options = Some(vec!["soft".into(), "medium".into(), "hard".into()]);
        assert_eq!(
            normalize_value(&f, Some("medium")).unwrap(),
            Some("medium".to_string())
        );
        assert!(matches!(
            normalize_value(&f, Some("slick")),
            Err(FieldError::NotAnOption { .. })
        ));
    }

    #[test]
    fn test_textually_different_values_stay_different() {
        // "100" and "100.0" are both valid numbers but normalize to
        // themselves; equality is textual downstream.
        let f = field(FieldKind::Number);
        assert_ne!(
            normalize_value(&f, Some("100")).unwrap(),
            normalize_value(&f, Some("100.0")).unwrap()
        );
    }

    #[test]
    fn test_tabs_are_distinct_in_field_order() {
        let mut a = field(FieldKind::Text);
        a.tab = Some("Setup".into());
        let mut b = field(FieldKind::Text);
        b.name = "b".into();
        b.tab = Some("Runtime".into());
        let mut c = field(FieldKind::Text);
        c.name = "c".into();
        c.tab = Some("Setup".into());
        let schema = FormSchema {
            form_name: "daq".into(),
            role: Role::Daq,
            fields: vec![a, b, c],
        };
        assert_eq!(schema.tabs(), vec!["Setup", "Runtime"]);
    }

    #[test]
    fn test_inject_id_falls_back_to_name() {
        let mut f = field(FieldKind::Text);
        assert_eq!(f.inject_id(), "sampling_rate");
        f.inject = Some("Sampling Rate".into());
        assert_eq!(f.inject_id(), "Sampling Rate");
    }
}
