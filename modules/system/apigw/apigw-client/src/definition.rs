//! Lookups in rendered gateway definition documents.
//!
//! Definitions (stage, resources, permissions, ...) are YAML documents that
//! have already been rendered by a template engine. They are read as a value
//! tree and addressed with dotted namespaces such as `stage.vars.api_sub_path`.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse definition: {0}")]
    Parse(String),

    #[error("namespace {0} not found")]
    NotFound(String),

    #[error("namespace {namespace} has an unexpected shape: {source}")]
    Shape {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A rendered definition document.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    root: Value,
}

impl Definition {
    /// Parse a rendered YAML document.
    ///
    /// # Errors
    /// Returns `DefinitionError::Parse` if `yaml` is not valid YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let root: Value =
            serde_saphyr::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        Ok(Self { root })
    }

    /// # Errors
    /// Returns `DefinitionError::Io` or `DefinitionError::Parse`.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Value at the dotted `namespace`; an empty namespace is the root.
    ///
    /// Segments index maps by key and sequences by position.
    ///
    /// # Errors
    /// Returns `DefinitionError::NotFound` if any segment is missing.
    pub fn get(&self, namespace: &str) -> Result<&Value, DefinitionError> {
        if namespace.is_empty() {
            return Ok(&self.root);
        }
        namespace
            .split('.')
            .try_fold(&self.root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .ok_or_else(|| DefinitionError::NotFound(namespace.to_owned()))
    }

    /// Value at `namespace`, decoded as `T`.
    ///
    /// # Errors
    /// Returns `DefinitionError::NotFound` or `DefinitionError::Shape`.
    pub fn get_as<T: DeserializeOwned>(&self, namespace: &str) -> Result<T, DefinitionError> {
        let value = self.get(namespace)?;
        T::deserialize(value).map_err(|source| DefinitionError::Shape {
            namespace: namespace.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Write;

    const DEFINITION: &str = r"
spec_version: 2
release:
  version: 1.0.1
  comment: first release
stage:
  name: prod
  vars:
    api_sub_path: /api/v1
grant_permissions:
  - bk_app_code: demo-app
    grant_dimension: api
";

    #[derive(Debug, Deserialize, PartialEq)]
    struct Grant {
        bk_app_code: String,
        grant_dimension: String,
    }

    #[test]
    fn test_dotted_lookup() {
        let definition = Definition::from_yaml(DEFINITION).unwrap();

        assert_eq!(definition.get("stage.name").unwrap(), &json!("prod"));
        assert_eq!(
            definition.get("stage.vars.api_sub_path").unwrap(),
            &json!("/api/v1")
        );
        assert_eq!(
            definition.get("grant_permissions.0.bk_app_code").unwrap(),
            &json!("demo-app")
        );
        assert_eq!(definition.get("").unwrap(), definition.root());
    }

    #[test]
    fn test_missing_namespace() {
        let definition = Definition::from_yaml(DEFINITION).unwrap();

        for namespace in ["stage.missing", "nothing", "stage.name.deeper", "grant_permissions.5"] {
            let err = definition.get(namespace).unwrap_err();
            assert!(
                matches!(&err, DefinitionError::NotFound(ns) if ns == namespace),
                "unexpected error for {namespace}: {err}"
            );
        }
    }

    #[test]
    fn test_typed_lookup() {
        let definition = Definition::from_yaml(DEFINITION).unwrap();

        let grants: Vec<Grant> = definition.get_as("grant_permissions").unwrap();
        assert_eq!(
            grants,
            vec![Grant {
                bk_app_code: "demo-app".to_owned(),
                grant_dimension: "api".to_owned(),
            }]
        );
        assert_eq!(definition.get_as::<u32>("spec_version").unwrap(), 2);
        assert!(matches!(
            definition.get_as::<u32>("stage.name"),
            Err(DefinitionError::Shape { .. })
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            Definition::from_yaml("key: [unclosed"),
            Err(DefinitionError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFINITION.as_bytes()).unwrap();

        let definition = Definition::from_yaml_file(file.path()).unwrap();
        assert_eq!(definition.get("release.comment").unwrap(), &json!("first release"));

        assert!(matches!(
            Definition::from_yaml_file("/nonexistent/definition.yaml"),
            Err(DefinitionError::Io(_))
        ));
    }
}
