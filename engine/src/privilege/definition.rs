//! Serialized privilege definitions.
//!
//! The admin surface edits privileges as JSON documents. Loading validates
//! every referenced capability path and include name against the current
//! scope, dropping unknown references with a warning rather than rejecting
//! the definition wholesale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Privilege;
use crate::error::AccessError;

/// Scope a definition is validated against.
pub trait DefinitionScope {
    fn capability_exists(&self, path: &str) -> bool;
    fn privilege_exists(&self, name: &str) -> bool;
}

/// The persisted/editable form of a privilege.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub everyone: bool,
    #[serde(default)]
    pub grants: BTreeMap<String, bool>,
    #[serde(default)]
    pub includes: Vec<String>,
}

impl PrivilegeDefinition {
    /// Parse raw definition text.
    ///
    /// Unparseable text is an error; unknown references inside a parseable
    /// definition are handled later, during validation.
    pub fn parse(raw: &str) -> Result<Self, AccessError> {
        serde_json::from_str(raw).map_err(|e| AccessError::InvalidDefinition(e.to_string()))
    }

    /// Serialize to definition text.
    pub fn to_text(&self) -> String {
        // A struct with string keys never fails to serialize.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Privilege {
    /// The definition form of this privilege.
    pub fn to_definition(&self) -> PrivilegeDefinition {
        PrivilegeDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            everyone: self.is_everyone(),
            grants: self
                .grants()
                .iter()
                .map(|(path, allow)| (path.clone(), *allow))
                .collect(),
            includes: self.includes().to_vec(),
        }
    }

    /// Build a privilege from a definition, validated against `scope`.
    ///
    /// Grants on unknown capability paths and includes of unknown privilege
    /// names are dropped with a warning.
    pub fn from_definition(def: &PrivilegeDefinition, scope: &dyn DefinitionScope) -> Self {
        let mut privilege = Self::new(&def.name, &def.description);
        privilege.set_everyone(def.everyone);

        for (path, allow) in &def.grants {
            if scope.capability_exists(path) {
                privilege.grant(path, *allow);
            } else {
                warn!(privilege = %def.name, capability = %path, "dropping grant on unknown capability");
            }
        }

        for name in &def.includes {
            if name != &def.name && scope.privilege_exists(name) {
                privilege.include(name);
            } else {
                warn!(privilege = %def.name, includes = %name, "dropping unknown include reference");
            }
        }

        privilege
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OpenScope;

    impl DefinitionScope for OpenScope {
        fn capability_exists(&self, _path: &str) -> bool {
            true
        }
        fn privilege_exists(&self, _name: &str) -> bool {
            true
        }
    }

    struct ClosedScope;

    impl DefinitionScope for ClosedScope {
        fn capability_exists(&self, _path: &str) -> bool {
            false
        }
        fn privilege_exists(&self, _name: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let mut privilege = Privilege::new("dj", "Music controls");
        privilege.set_everyone(true);
        privilege.grant("music.play", true);
        privilege.deny("music.volume.up");
        privilege.include("everyone");

        let restored = Privilege::from_definition(&privilege.to_definition(), &OpenScope);

        assert_eq!(restored, privilege);
    }

    #[test]
    fn test_unknown_references_are_dropped() {
        let mut privilege = Privilege::new("dj", "");
        privilege.grant("music.play", true);
        privilege.include("vanished");

        let restored = Privilege::from_definition(&privilege.to_definition(), &ClosedScope);

        assert!(restored.grants().is_empty());
        assert!(restored.includes().is_empty());
        assert_eq!(restored.name(), "dj");
    }

    #[test]
    fn test_self_include_is_dropped() {
        let def = PrivilegeDefinition {
            name: "dj".to_owned(),
            description: String::new(),
            everyone: false,
            grants: BTreeMap::new(),
            includes: vec!["dj".to_owned()],
        };

        let privilege = Privilege::from_definition(&def, &OpenScope);
        assert!(privilege.includes().is_empty());
    }

    #[test]
    fn test_parse_defaults_optional_fields() {
        let def = PrivilegeDefinition::parse(r#"{"name": "dj"}"#).unwrap();

        assert_eq!(def.name, "dj");
        assert!(def.description.is_empty());
        assert!(!def.everyone);
        assert!(def.grants.is_empty());
        assert!(def.includes.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            PrivilegeDefinition::parse("not json"),
            Err(AccessError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_text_round_trip() {
        let def = PrivilegeDefinition {
            name: "dj".to_owned(),
            description: "Music controls".to_owned(),
            everyone: false,
            grants: [("music.play".to_owned(), true)].into_iter().collect(),
            includes: vec!["everyone".to_owned()],
        };

        let reparsed = PrivilegeDefinition::parse(&def.to_text()).unwrap();
        assert_eq!(reparsed, def);
    }
}
