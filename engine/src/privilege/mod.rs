//! Privileges: named, composable bundles of capability grants.
//!
//! A privilege maps capability paths to allow/deny decisions and may include
//! other privileges by name; inclusion is transitive, with the including
//! privilege's own grants winning on conflict. Privileges are
//! registration-time metadata used to seed defaults and produce editable
//! definitions; the live per-request decision goes through the override
//! chain instead.

mod definition;
mod guild;

pub use definition::{DefinitionScope, PrivilegeDefinition};
pub use guild::GuildPrivilege;

use std::collections::{HashMap, HashSet};

use tracing::warn;

/// Resolves privilege names during transitive traversals.
///
/// Implementations return a snapshot; traversals never hold locks across
/// lookups.
pub trait PrivilegeLookup {
    fn privilege(&self, name: &str) -> Option<Privilege>;
}

/// Name-indexed lookup over a plain map, used for snapshots.
impl PrivilegeLookup for HashMap<String, Privilege> {
    fn privilege(&self, name: &str) -> Option<Privilege> {
        self.get(name).cloned()
    }
}

/// A named bundle of capability grants plus included privileges.
#[derive(Debug, Clone, PartialEq)]
pub struct Privilege {
    name: String,
    description: String,
    everyone: bool,
    grants: HashMap<String, bool>,
    includes: Vec<String>,
}

impl Privilege {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            everyone: false,
            grants: HashMap::new(),
            includes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, text: &str) {
        self.description = text.to_owned();
    }

    /// Whether this privilege applies to every actor automatically.
    pub const fn is_everyone(&self) -> bool {
        self.everyone
    }

    pub fn set_everyone(&mut self, everyone: bool) {
        self.everyone = everyone;
    }

    /// This privilege's own grants, not counting included privileges.
    pub const fn grants(&self) -> &HashMap<String, bool> {
        &self.grants
    }

    /// Included privilege names, in registration order.
    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    /// Record an allow/deny decision for a capability path.
    ///
    /// Idempotent: repeated calls keep exactly one entry.
    pub fn grant(&mut self, capability: &str, allow: bool) {
        self.grants.insert(capability.to_owned(), allow);
    }

    /// Record an explicit deny for a capability path.
    pub fn deny(&mut self, capability: &str) {
        self.grant(capability, false);
    }

    /// Remove this privilege's own entry for a capability path.
    ///
    /// Returns `true` if an entry existed.
    pub fn revoke(&mut self, capability: &str) -> bool {
        self.grants.remove(capability).is_some()
    }

    /// Add an included privilege by name.
    ///
    /// Returns `true` if the reference was newly added; self-inclusion is
    /// refused.
    pub fn include(&mut self, name: &str) -> bool {
        if name == self.name {
            warn!(privilege = %self.name, "refusing self-inclusion");
            return false;
        }
        if self.includes.iter().any(|n| n == name) {
            return false;
        }
        self.includes.push(name.to_owned());
        true
    }

    /// Remove an included privilege by name.
    ///
    /// Returns `true` if a reference existed.
    pub fn exclude(&mut self, name: &str) -> bool {
        let before = self.includes.len();
        self.includes.retain(|n| n != name);
        self.includes.len() != before
    }

    /// Flatten inclusion transitively into one grant map.
    ///
    /// Included privileges are merged first in registration order, own
    /// grants last, so the including privilege wins on conflict. A visited
    /// set guards against inclusion cycles; unknown names are dropped with a
    /// warning.
    pub fn effective_grants(&self, lookup: &dyn PrivilegeLookup) -> HashMap<String, bool> {
        let mut visited = HashSet::new();
        visited.insert(self.name.clone());
        let mut flattened = HashMap::new();
        self.collect_grants(lookup, &mut visited, &mut flattened);
        flattened
    }

    fn collect_grants(
        &self,
        lookup: &dyn PrivilegeLookup,
        visited: &mut HashSet<String>,
        flattened: &mut HashMap<String, bool>,
    ) {
        for name in &self.includes {
            if !visited.insert(name.clone()) {
                continue;
            }
            match lookup.privilege(name) {
                Some(included) => included.collect_grants(lookup, visited, flattened),
                None => {
                    warn!(privilege = %self.name, includes = %name, "dropping unknown include while flattening grants");
                }
            }
        }

        flattened.extend(self.grants.iter().map(|(path, allow)| (path.clone(), *allow)));
    }

    /// Transitive membership test across the inclusion graph.
    pub fn includes_transitively(&self, name: &str, lookup: &dyn PrivilegeLookup) -> bool {
        let mut visited = HashSet::new();
        visited.insert(self.name.clone());
        let mut pending: Vec<String> = self.includes.clone();

        while let Some(next) = pending.pop() {
            if next == name {
                return true;
            }
            if !visited.insert(next.clone()) {
                continue;
            }
            if let Some(privilege) = lookup.privilege(&next) {
                pending.extend(privilege.includes.iter().cloned());
            }
        }

        false
    }
}
