//! Capability nodes and groups.
//!
//! A capability is a named, checkable permission living in a dotted
//! hierarchical namespace (`music`, `music.play`). A node with children is a
//! capability group; a group-level override applies to every descendant that
//! has no record of its own.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::config::DefaultsSource;
use crate::error::AccessError;

/// Where a capability's fallback decision comes from.
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    /// A fixed decision baked in at registration time.
    Fixed(bool),

    /// A configuration-backed decision keyed by the node's full path and
    /// read at resolution time, with a fallback for when the key is unset.
    Configured { fallback: bool },
}

/// A single node in the capability tree.
///
/// Nodes are created at registration time by the owning feature and removed
/// only on explicit unregistration. The full dotted path is derived from the
/// ancestor chain and recomputed whenever the parent or name changes.
#[derive(Debug)]
pub struct CapabilityNode {
    name: RwLock<String>,
    description: RwLock<Option<String>>,
    default: DefaultValue,
    group: bool,
    parent: RwLock<Weak<CapabilityNode>>,
    children: RwLock<Vec<Arc<CapabilityNode>>>,
    full_path: RwLock<String>,
}

impl CapabilityNode {
    /// Create a leaf capability with the given default.
    pub fn leaf(name: &str, default: DefaultValue) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(name.to_owned()),
            description: RwLock::new(None),
            default,
            group: false,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            full_path: RwLock::new(name.to_owned()),
        })
    }

    /// Create a capability group.
    ///
    /// Groups without an explicit default conservatively resolve to allowed.
    pub fn group(name: &str) -> Arc<Self> {
        Self::group_with_default(name, DefaultValue::Fixed(true))
    }

    /// Create a capability group with an explicit default.
    pub fn group_with_default(name: &str, default: DefaultValue) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(name.to_owned()),
            description: RwLock::new(None),
            default,
            group: true,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            full_path: RwLock::new(name.to_owned()),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().clone()
    }

    pub fn set_description(&self, text: &str) {
        *self.description.write() = Some(text.to_owned());
    }

    pub const fn is_group(&self) -> bool {
        self.group
    }

    pub const fn default_value(&self) -> DefaultValue {
        self.default
    }

    /// Full dotted path of this node, derived from its ancestor chain.
    pub fn full_path(&self) -> String {
        self.full_path.read().clone()
    }

    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.read().upgrade()
    }

    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.read().clone()
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<Arc<Self>> {
        self.children
            .read()
            .iter()
            .find(|c| c.name.read().as_str() == name)
            .cloned()
    }

    /// Attach this node under `parent`, recomputing the subtree's paths.
    ///
    /// Rejects a sibling name collision; a node already attached elsewhere is
    /// detached first.
    pub fn set_parent(self: &Arc<Self>, parent: &Arc<Self>) -> Result<(), AccessError> {
        let name = self.name();
        if parent.child(&name).is_some() {
            return Err(AccessError::DuplicateCapability(format!(
                "{}.{name}",
                parent.full_path()
            )));
        }

        if self.parent().is_some() {
            self.detach();
        }

        parent.children.write().push(Arc::clone(self));
        *self.parent.write() = Arc::downgrade(parent);
        self.update_full_path();
        Ok(())
    }

    /// Remove this node from its parent, making it a root again.
    pub fn detach(self: &Arc<Self>) {
        if let Some(parent) = self.parent() {
            parent.children.write().retain(|c| !Arc::ptr_eq(c, self));
        }
        *self.parent.write() = Weak::new();
        self.update_full_path();
    }

    /// Rename this node, rejecting a sibling collision.
    pub fn rename(self: &Arc<Self>, name: &str) -> Result<(), AccessError> {
        if let Some(parent) = self.parent() {
            if let Some(existing) = parent.child(name) {
                if !Arc::ptr_eq(&existing, self) {
                    return Err(AccessError::DuplicateCapability(format!(
                        "{}.{name}",
                        parent.full_path()
                    )));
                }
            }
        }

        *self.name.write() = name.to_owned();
        self.update_full_path();
        Ok(())
    }

    /// Recompute the full path from the ancestor chain, propagating through
    /// every descendant.
    pub fn update_full_path(&self) {
        let path = match self.parent() {
            Some(parent) => format!("{}.{}", parent.full_path(), self.name.read()),
            None => self.name.read().clone(),
        };
        *self.full_path.write() = path;

        for child in self.children.read().iter() {
            child.update_full_path();
        }
    }

    /// The decision used when the whole override chain yields nothing.
    pub(crate) fn default_decision(&self, defaults: &dyn DefaultsSource) -> bool {
        match self.default {
            DefaultValue::Fixed(value) => value,
            DefaultValue::Configured { fallback } => defaults
                .default_for(&self.full_path())
                .unwrap_or(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticDefaults;

    #[test]
    fn test_root_full_path_is_name() {
        let node = CapabilityNode::leaf("ping", DefaultValue::Fixed(true));
        assert_eq!(node.full_path(), "ping");
    }

    #[test]
    fn test_child_full_path_includes_ancestors() {
        let music = CapabilityNode::group("music");
        let play = CapabilityNode::leaf("play", DefaultValue::Fixed(true));
        let volume = CapabilityNode::group("volume");
        let up = CapabilityNode::leaf("up", DefaultValue::Fixed(false));

        play.set_parent(&music).unwrap();
        volume.set_parent(&music).unwrap();
        up.set_parent(&volume).unwrap();

        assert_eq!(play.full_path(), "music.play");
        assert_eq!(up.full_path(), "music.volume.up");
    }

    #[test]
    fn test_rename_propagates_to_descendants() {
        let music = CapabilityNode::group("music");
        let volume = CapabilityNode::group("volume");
        let up = CapabilityNode::leaf("up", DefaultValue::Fixed(false));

        volume.set_parent(&music).unwrap();
        up.set_parent(&volume).unwrap();

        music.rename("audio").unwrap();

        assert_eq!(music.full_path(), "audio");
        assert_eq!(volume.full_path(), "audio.volume");
        assert_eq!(up.full_path(), "audio.volume.up");
    }

    #[test]
    fn test_sibling_name_collision_rejected() {
        let music = CapabilityNode::group("music");
        let play = CapabilityNode::leaf("play", DefaultValue::Fixed(true));
        let other = CapabilityNode::leaf("play", DefaultValue::Fixed(false));

        play.set_parent(&music).unwrap();
        let err = other.set_parent(&music).unwrap_err();

        assert!(matches!(err, AccessError::DuplicateCapability(_)));
        assert_eq!(music.children().len(), 1);
    }

    #[test]
    fn test_rename_collision_rejected() {
        let music = CapabilityNode::group("music");
        let play = CapabilityNode::leaf("play", DefaultValue::Fixed(true));
        let stop = CapabilityNode::leaf("stop", DefaultValue::Fixed(true));

        play.set_parent(&music).unwrap();
        stop.set_parent(&music).unwrap();

        assert!(stop.rename("play").is_err());
        // Renaming to its own name is fine.
        assert!(stop.rename("stop").is_ok());
    }

    #[test]
    fn test_reparent_detaches_from_old_parent() {
        let music = CapabilityNode::group("music");
        let admin = CapabilityNode::group("admin");
        let node = CapabilityNode::leaf("reload", DefaultValue::Fixed(false));

        node.set_parent(&music).unwrap();
        node.set_parent(&admin).unwrap();

        assert!(music.child("reload").is_none());
        assert_eq!(node.full_path(), "admin.reload");
    }

    #[test]
    fn test_detach_resets_path() {
        let music = CapabilityNode::group("music");
        let play = CapabilityNode::leaf("play", DefaultValue::Fixed(true));

        play.set_parent(&music).unwrap();
        play.detach();

        assert_eq!(play.full_path(), "play");
        assert!(play.parent().is_none());
    }

    #[test]
    fn test_group_defaults_to_allowed() {
        let defaults = StaticDefaults::new();
        let group = CapabilityNode::group("music");
        assert!(group.default_decision(&defaults));
    }

    #[test]
    fn test_configured_default_read_at_call_time() {
        let defaults = StaticDefaults::new();
        let node = CapabilityNode::leaf("play", DefaultValue::Configured { fallback: true });

        assert!(node.default_decision(&defaults));

        defaults.set("play", false);
        assert!(!node.default_decision(&defaults));
    }

    #[test]
    fn test_configured_default_follows_path_updates() {
        let defaults = StaticDefaults::new();
        defaults.set("music.play", false);

        let music = CapabilityNode::group("music");
        let play = CapabilityNode::leaf("play", DefaultValue::Configured { fallback: true });

        // Unattached, the key "play" is unset and the fallback applies.
        assert!(play.default_decision(&defaults));

        play.set_parent(&music).unwrap();
        assert!(!play.default_decision(&defaults));
    }
}
