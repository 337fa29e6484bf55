//! Form descriptor loading.
//!
//! Descriptors are YAML files in a single directory, one per role. The
//! registry is loaded at boot and on explicit reload; a malformed
//! descriptor, a duplicate role, or a `select` field without options is a
//! startup error rather than a runtime surprise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::roles::Role;

use super::{FieldKind, FormSchema};

/// Error raised while loading the form descriptor directory.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid form descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate descriptor for role {role} in {path}")]
    DuplicateRole { role: Role, path: PathBuf },
    #[error("duplicate field '{field}' in form '{form}'")]
    DuplicateField { form: String, field: String },
    #[error("select field '{field}' in form '{form}' has no options")]
    SelectWithoutOptions { form: String, field: String },
}

/// The set of loaded form schemas, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct FormRegistry {
    forms: BTreeMap<Role, FormSchema>,
}

impl FormRegistry {
    /// Loads every `*.yaml` / `*.yml` descriptor in `dir`.
    ///
    /// A missing directory yields an empty registry (forms are optional in
    /// a fresh deployment); everything else that is wrong with a descriptor
    /// is an error.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for unreadable or malformed descriptors,
    /// duplicate roles, duplicate field names, or select fields without
    /// options.
    pub fn load(dir: &Path) -> Result<Self, SchemaError> {
        let mut forms: BTreeMap<Role, FormSchema> = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(Self { forms });
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| SchemaError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: path.clone(),
                source,
            })?;
            let schema: FormSchema =
                serde_yaml::from_str(&text).map_err(|source| SchemaError::Parse {
                    path: path.clone(),
                    source,
                })?;
            validate_schema(&schema)?;
            if forms.contains_key(&schema.role) {
                return Err(SchemaError::DuplicateRole {
                    role: schema.role,
                    path,
                });
            }
            forms.insert(schema.role, schema);
        }

        Ok(Self { forms })
    }

    /// The schema owned by `role`, if a descriptor exists for it.
    #[must_use]
    pub fn get(&self, role: Role) -> Option<&FormSchema> {
        self.forms.get(&role)
    }

    /// Every loaded schema in role order.
    pub fn all(&self) -> impl Iterator<Item = &FormSchema> {
        self.forms.values()
    }

    /// Schemas visible to a caller: everything for admins, otherwise only
    /// the caller's own roles.
    #[must_use]
    pub fn visible_to(&self, is_admin: bool, roles: &[Role]) -> Vec<&FormSchema> {
        self.forms
            .values()
            .filter(|f| is_admin || roles.contains(&f.role))
            .collect()
    }

    /// Number of loaded forms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    /// Whether no descriptors were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

fn validate_schema(schema: &FormSchema) -> Result<(), SchemaError> {
    let mut seen: Vec<&str> = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        if seen.contains(&field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                form: schema.form_name.clone(),
                field: field.name.clone(),
            });
        }
        seen.push(&field.name);

        let has_options = field
            .options
            .as_ref()
            .is_some_and(|opts| !opts.is_empty());
        if field.kind == FieldKind::Select && !has_options {
            return Err(SchemaError::SelectWithoutOptions {
                form: schema.form_name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    const DAQ_FORM: &str = r"
form_name: daq_setup
role: DAQ
fields:
  - name: sampling_rate
    label: Sampling Rate
    type: number
    required: true
    unit: Hz
  - name: logger_notes
    label: Logger Notes
    type: textarea
";

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "daq.yaml", DAQ_FORM);
        let registry = FormRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        let form = registry.get(Role::Daq).unwrap();
        assert_eq!(form.form_name, "daq_setup");
        assert_eq!(form.fields[0].unit.as_deref(), Some("Hz"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let registry = FormRegistry::load(Path::new("/nonexistent/forms")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_role_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "a.yaml", DAQ_FORM);
        write_descriptor(dir.path(), "b.yaml", DAQ_FORM);
        assert!(matches!(
            FormRegistry::load(dir.path()),
            Err(SchemaError::DuplicateRole { role: Role::Daq, .. })
        ));
    }

    #[test]
    fn test_select_without_options_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "aero.yaml",
            r"
form_name: aero_setup
role: aero
fields:
  - name: wing_profile
    label: Wing Profile
    type: select
",
        );
        assert!(matches!(
            FormRegistry::load(dir.path()),
            Err(SchemaError::SelectWithoutOptions { .. })
        ));
    }

    #[test]
    fn test_visibility_filtering() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "daq.yaml", DAQ_FORM);
        write_descriptor(
            dir.path(),
            "aero.yaml",
            r"
form_name: aero_setup
role: aero
fields:
  - name: wing_angle
    label: Wing Angle
    type: number
",
        );
        let registry = FormRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.visible_to(true, &[]).len(), 2);
        assert_eq!(registry.visible_to(false, &[Role::Daq]).len(), 1);
        assert_eq!(registry.visible_to(false, &[Role::Driver]).len(), 0);
    }
}
