//! Warden Engine
//!
//! Permission and privilege resolution for guild chat bots: a hierarchical
//! capability namespace, persisted per-member and per-role overrides with
//! defined precedence, composable named privileges with transitive
//! inclusion, and a cached resolution chain.

pub mod actor;
pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod privilege;
pub mod registry;
pub mod resolver;
pub mod store;

pub use actor::{Actor, Member, Role, RoleRef};
pub use capability::{CapabilityNode, DefaultValue};
pub use config::{DefaultsSource, StaticDefaults};
pub use error::{AccessError, StoreError};
pub use privilege::{GuildPrivilege, Privilege, PrivilegeDefinition};
pub use registry::Registry;
pub use resolver::ResolveCtx;
pub use store::{MemoryStore, OverrideStore, PgStore, PrivilegeStore};
