//! The registry: owner of the capability tree and privilege sets.
//!
//! One registry per process, constructed explicitly and passed by reference
//! to every component that needs lookup. It mediates capability lookup by
//! dotted path, seeds the built-in privileges, lazily loads guild-scoped
//! privilege definitions from storage, and fronts the override store with
//! the resolution cache's invalidation hooks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actor::{Member, Role};
use crate::cache::ResolutionCache;
use crate::capability::CapabilityNode;
use crate::config::DefaultsSource;
use crate::error::AccessError;
use crate::privilege::{
    DefinitionScope, GuildPrivilege, Privilege, PrivilegeDefinition,
};
use crate::resolver::ResolveCtx;
use crate::store::{MemberOverride, OverrideStore, PrivilegeStore, RoleOverride};

/// Built-in privilege granted to every member.
pub const EVERYONE: &str = "everyone";
/// Built-in privilege for guild administration.
pub const ADMIN: &str = "admin";
/// Built-in privilege for bot host operations; includes [`ADMIN`].
pub const HOST: &str = "host";

type GuildPrivilegeMap = HashMap<String, Arc<AsyncRwLock<GuildPrivilege>>>;

/// Process-wide capability and privilege registry.
pub struct Registry {
    roots: RwLock<Vec<Arc<CapabilityNode>>>,
    builtins: RwLock<HashMap<String, Privilege>>,
    guilds: DashMap<Uuid, GuildPrivilegeMap>,
    overrides: Arc<dyn OverrideStore>,
    privileges: Arc<dyn PrivilegeStore>,
    defaults: Arc<dyn DefaultsSource>,
    cache: ResolutionCache,
}

impl Registry {
    /// Construct a registry and seed the built-in privileges.
    pub fn new(
        overrides: Arc<dyn OverrideStore>,
        privileges: Arc<dyn PrivilegeStore>,
        defaults: Arc<dyn DefaultsSource>,
    ) -> Self {
        let mut builtins = HashMap::new();

        let mut everyone = Privilege::new(EVERYONE, "Every member of a guild");
        everyone.set_everyone(true);
        builtins.insert(everyone.name().to_owned(), everyone);

        let admin = Privilege::new(ADMIN, "Guild administration");
        builtins.insert(admin.name().to_owned(), admin);

        // Host inherits everything admin has without duplicating grants.
        let mut host = Privilege::new(HOST, "Bot host operations");
        host.include(ADMIN);
        builtins.insert(host.name().to_owned(), host);

        Self {
            roots: RwLock::new(Vec::new()),
            builtins: RwLock::new(builtins),
            guilds: DashMap::new(),
            overrides,
            privileges,
            defaults,
            cache: ResolutionCache::new(),
        }
    }

    fn resolve_ctx(&self) -> ResolveCtx<'_> {
        ResolveCtx {
            store: self.overrides.as_ref(),
            defaults: self.defaults.as_ref(),
            cache: &self.cache,
        }
    }

    // ========================================================================
    // Capability tree
    // ========================================================================

    /// Register a root capability.
    ///
    /// Child nodes become reachable through their parent and need no
    /// registration of their own; registering one is a no-op.
    pub fn register_capability(&self, node: &Arc<CapabilityNode>) -> Result<(), AccessError> {
        if node.parent().is_some() {
            debug!(capability = %node.full_path(), "node already reachable through its parent");
            return Ok(());
        }

        let mut roots = self.roots.write();
        if roots.iter().any(|root| root.name() == node.name()) {
            return Err(AccessError::DuplicateCapability(node.name()));
        }
        roots.push(Arc::clone(node));
        Ok(())
    }

    /// Remove a capability on module unload.
    ///
    /// A root disappears from the registry; a child is detached from its
    /// parent along with its whole subtree.
    pub fn unregister_capability(&self, node: &Arc<CapabilityNode>) {
        if node.parent().is_some() {
            node.detach();
        } else {
            self.roots.write().retain(|root| !Arc::ptr_eq(root, node));
        }
    }

    /// Look up a capability by dotted path, walking segment by segment.
    ///
    /// Absent on any missing segment; a typo'd path is not an error.
    pub fn get_capability(&self, path: &str) -> Option<Arc<CapabilityNode>> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;

        let mut node = {
            let roots = self.roots.read();
            roots.iter().find(|root| root.name() == first).cloned()?
        };

        for segment in segments {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Current default decision per registered capability path.
    ///
    /// The configuration subsystem renders this aggregate to its file
    /// format.
    pub fn configured_defaults(&self) -> BTreeMap<String, bool> {
        let mut defaults = BTreeMap::new();
        let mut pending: Vec<Arc<CapabilityNode>> = self.roots.read().clone();

        while let Some(node) = pending.pop() {
            defaults.insert(node.full_path(), node.default_decision(self.defaults.as_ref()));
            pending.extend(node.children());
        }
        defaults
    }

    // ========================================================================
    // Built-in privileges
    // ========================================================================

    /// Snapshot of a built-in privilege.
    pub fn get_builtin_privilege(&self, name: &str) -> Option<Privilege> {
        self.builtins.read().get(name).cloned()
    }

    /// Names of privileges applied to every actor automatically.
    pub fn everyone_privileges(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .builtins
            .read()
            .values()
            .filter(|p| p.is_everyone())
            .map(|p| p.name().to_owned())
            .collect();
        names.sort();
        names
    }

    /// Seed a capability into the named privileges at registration time.
    ///
    /// Used by the command layer when a command declares it is usable by
    /// privilege names; unknown names are logged and skipped.
    pub fn attach_to_privileges(&self, node: &Arc<CapabilityNode>, names: &[&str]) {
        let path = node.full_path();
        let mut builtins = self.builtins.write();

        for name in names {
            match builtins.get_mut(*name) {
                Some(privilege) => privilege.grant(&path, true),
                None => {
                    warn!(privilege = *name, capability = %path, "cannot attach capability to unknown privilege");
                }
            }
        }
    }

    /// Record an allow/deny decision on a built-in privilege.
    ///
    /// Returns `false` if the privilege does not exist.
    pub fn grant_builtin(&self, name: &str, capability: &str, allow: bool) -> bool {
        let mut builtins = self.builtins.write();
        match builtins.get_mut(name) {
            Some(privilege) => {
                privilege.grant(capability, allow);
                true
            }
            None => false,
        }
    }

    /// Flattened grants of a built-in privilege.
    pub fn builtin_effective_grants(&self, name: &str) -> Option<HashMap<String, bool>> {
        let snapshot: HashMap<String, Privilege> = self.builtins.read().clone();
        let target = snapshot.get(name)?.clone();
        Some(target.effective_grants(&snapshot))
    }

    /// Reconcile a built-in privilege against an on-disk definition file.
    ///
    /// The definition replaces the named privilege's grants, includes, and
    /// description wholesale (built-ins are not row-persisted); a name not
    /// seeded at startup is created for the process lifetime.
    pub fn apply_builtin_definition(&self, raw: &str) -> Result<(), AccessError> {
        let def = PrivilegeDefinition::parse(raw)?;
        let scope = BuiltinScope {
            registry: self,
            defining: &def.name,
        };
        let mut privilege = Privilege::from_definition(&def, &scope);

        let edges = self.builtin_edges();
        strip_cycles(&mut privilege, &edges);

        self.builtins
            .write()
            .insert(def.name.clone(), privilege);
        Ok(())
    }

    fn builtin_edges(&self) -> HashMap<String, Vec<String>> {
        self.builtins
            .read()
            .iter()
            .map(|(name, p)| (name.clone(), p.includes().to_vec()))
            .collect()
    }

    // ========================================================================
    // Guild-scoped privileges
    // ========================================================================

    /// Load a guild's privilege definitions on first access.
    ///
    /// Grants on unknown capabilities, includes of unknown privileges, and
    /// cycle-closing includes are dropped from memory with a warning; the
    /// stored rows are left for an admin edit to clean up.
    async fn ensure_guild_loaded(&self, guild_id: Uuid) -> Result<(), AccessError> {
        if self.guilds.contains_key(&guild_id) {
            return Ok(());
        }

        let rows = self.privileges.list_privileges(guild_id).await?;
        let guild_names: HashSet<String> = rows.iter().map(|row| row.name.clone()).collect();

        let mut assembled = Vec::with_capacity(rows.len());
        for row in rows {
            let grants: Vec<_> = self
                .privileges
                .list_grants(row.id)
                .await?
                .into_iter()
                .filter(|grant| {
                    let known = self.get_capability(&grant.capability).is_some();
                    if !known {
                        warn!(guild_id = %guild_id, privilege = %row.name, capability = %grant.capability, "dropping grant on unknown capability");
                    }
                    known
                })
                .collect();

            let includes: Vec<_> = self
                .privileges
                .list_includes(row.id)
                .await?
                .into_iter()
                .filter(|include| {
                    let known = include.includes != row.name
                        && (guild_names.contains(&include.includes)
                            || self.builtins.read().contains_key(&include.includes));
                    if !known {
                        warn!(guild_id = %guild_id, privilege = %row.name, includes = %include.includes, "dropping unknown include reference");
                    }
                    known
                })
                .collect();

            assembled.push((row, grants, includes));
        }

        // Break inclusion cycles deterministically: definitions arrive
        // name-ordered, and an include is kept only if it cannot already
        // reach the including privilege.
        let mut edges = self.builtin_edges();
        for (row, _grants, includes) in &mut assembled {
            let name = row.name.clone();
            includes.retain(|include| {
                if reaches(&edges, &include.includes, &name) {
                    warn!(guild_id = %guild_id, privilege = %name, includes = %include.includes, "dropping cyclic include reference");
                    return false;
                }
                edges
                    .entry(name.clone())
                    .or_default()
                    .push(include.includes.clone());
                true
            });
        }

        let mut map = GuildPrivilegeMap::new();
        for (row, grants, includes) in &assembled {
            map.insert(
                row.name.clone(),
                Arc::new(AsyncRwLock::new(GuildPrivilege::from_parts(
                    row, grants, includes,
                ))),
            );
        }

        // First loader wins if two requests raced here.
        self.guilds.entry(guild_id).or_insert(map);
        Ok(())
    }

    /// A guild's privilege by name, loading the guild on first access.
    ///
    /// Unknown names are absent; nothing is created implicitly.
    pub async fn get_guild_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<Option<Arc<AsyncRwLock<GuildPrivilege>>>, AccessError> {
        self.ensure_guild_loaded(guild_id).await?;
        Ok(self
            .guilds
            .get(&guild_id)
            .and_then(|map| map.get(name).cloned()))
    }

    /// Names of a guild's privileges, sorted.
    pub async fn list_guild_privileges(&self, guild_id: Uuid) -> Result<Vec<String>, AccessError> {
        self.ensure_guild_loaded(guild_id).await?;
        let mut names: Vec<String> = self
            .guilds
            .get(&guild_id)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    /// Create a guild privilege from a definition.
    pub async fn create_guild_privilege(
        &self,
        guild_id: Uuid,
        def: &PrivilegeDefinition,
    ) -> Result<Arc<AsyncRwLock<GuildPrivilege>>, AccessError> {
        self.ensure_guild_loaded(guild_id).await?;

        let exists = self
            .guilds
            .get(&guild_id)
            .is_some_and(|map| map.contains_key(&def.name));
        if exists {
            return Err(AccessError::DuplicatePrivilege(def.name.clone()));
        }

        let sanitized = self.sanitize_for_guild(guild_id, def).await;
        self.insert_guild_privilege(guild_id, sanitized).await
    }

    /// Create or update a guild privilege from raw definition text.
    ///
    /// An existing privilege is reconciled with a three-way diff against its
    /// stored rows; a new name is created.
    pub async fn apply_guild_definition(
        &self,
        guild_id: Uuid,
        raw: &str,
    ) -> Result<Arc<AsyncRwLock<GuildPrivilege>>, AccessError> {
        let def = PrivilegeDefinition::parse(raw)?;
        self.ensure_guild_loaded(guild_id).await?;

        let sanitized = self.sanitize_for_guild(guild_id, &def).await;

        let existing = self
            .guilds
            .get(&guild_id)
            .and_then(|map| map.get(&def.name).cloned());

        match existing {
            Some(privilege) => {
                privilege
                    .write()
                    .await
                    .reconcile(self.privileges.as_ref(), &sanitized)
                    .await?;
                Ok(privilege)
            }
            None => self.insert_guild_privilege(guild_id, sanitized).await,
        }
    }

    /// Delete a guild privilege and its rows. Returns `true` if one existed.
    pub async fn delete_guild_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<bool, AccessError> {
        self.ensure_guild_loaded(guild_id).await?;

        let existing = self
            .guilds
            .get(&guild_id)
            .and_then(|map| map.get(name).cloned());
        let Some(privilege) = existing else {
            return Ok(false);
        };

        let id = privilege.read().await.id();
        self.privileges.delete_privilege(id).await?;

        if let Some(mut map) = self.guilds.get_mut(&guild_id) {
            map.remove(name);
        }
        Ok(true)
    }

    /// Flattened grants of a guild privilege.
    ///
    /// Includes resolve against the guild's privileges first, then the
    /// built-ins; a built-in name falls back to the built-in flatten.
    pub async fn guild_effective_grants(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<Option<HashMap<String, bool>>, AccessError> {
        self.ensure_guild_loaded(guild_id).await?;

        let mut scope: HashMap<String, Privilege> = self.builtins.read().clone();
        for (privilege_name, snapshot) in self.guild_snapshot(guild_id).await {
            scope.insert(privilege_name, snapshot);
        }

        Ok(scope
            .get(name)
            .cloned()
            .map(|target| target.effective_grants(&scope)))
    }

    /// Drop a guild's loaded privileges and cached decisions.
    ///
    /// Teardown hook for guild eviction; the next access reloads from
    /// storage.
    pub fn clear_guild(&self, guild_id: Uuid) {
        self.guilds.remove(&guild_id);
        self.cache.invalidate_guild(guild_id);
    }

    async fn guild_snapshot(&self, guild_id: Uuid) -> HashMap<String, Privilege> {
        let arcs: Vec<(String, Arc<AsyncRwLock<GuildPrivilege>>)> = self
            .guilds
            .get(&guild_id)
            .map(|map| {
                map.iter()
                    .map(|(name, arc)| (name.clone(), Arc::clone(arc)))
                    .collect()
            })
            .unwrap_or_default();

        let mut snapshot = HashMap::with_capacity(arcs.len());
        for (name, arc) in arcs {
            snapshot.insert(name, arc.read().await.snapshot());
        }
        snapshot
    }

    async fn sanitize_for_guild(&self, guild_id: Uuid, def: &PrivilegeDefinition) -> Privilege {
        let scope = GuildScope {
            registry: self,
            guild_id,
            defining: &def.name,
        };
        let mut sanitized = Privilege::from_definition(def, &scope);

        let mut edges = self.builtin_edges();
        for (name, snapshot) in self.guild_snapshot(guild_id).await {
            edges.insert(name, snapshot.includes().to_vec());
        }
        // The definition replaces this privilege's own edges entirely.
        edges.remove(&def.name);
        strip_cycles(&mut sanitized, &edges);

        sanitized
    }

    async fn insert_guild_privilege(
        &self,
        guild_id: Uuid,
        sanitized: Privilege,
    ) -> Result<Arc<AsyncRwLock<GuildPrivilege>>, AccessError> {
        let row = self
            .privileges
            .insert_privilege(
                guild_id,
                sanitized.name(),
                sanitized.description(),
                sanitized.is_everyone(),
            )
            .await?;

        let mut privilege = GuildPrivilege::from_row(&row);
        for (capability, allow) in sanitized.grants() {
            privilege
                .grant(self.privileges.as_ref(), capability, *allow)
                .await?;
        }
        for name in sanitized.includes() {
            privilege.include(self.privileges.as_ref(), name).await?;
        }

        let arc = Arc::new(AsyncRwLock::new(privilege));
        self.guilds
            .entry(guild_id)
            .or_default()
            .insert(sanitized.name().to_owned(), Arc::clone(&arc));
        Ok(arc)
    }

    // ========================================================================
    // Resolution and override administration
    // ========================================================================

    /// Gate used by the command dispatcher before running a command.
    ///
    /// An unknown capability path denies; a store failure propagates so the
    /// dispatcher denies and logs rather than silently allowing.
    pub async fn resolve_member(&self, path: &str, member: &Member) -> Result<bool, AccessError> {
        match self.get_capability(path) {
            Some(node) => node.resolve_for_member(member, self.resolve_ctx()).await,
            None => {
                debug!(capability = path, "denying unknown capability");
                Ok(false)
            }
        }
    }

    /// Resolution for a bare role, same contract as [`Self::resolve_member`].
    pub async fn resolve_role(&self, path: &str, role: &Role) -> Result<bool, AccessError> {
        match self.get_capability(path) {
            Some(node) => node.resolve_for_role(role, self.resolve_ctx()).await,
            None => {
                debug!(capability = path, "denying unknown capability");
                Ok(false)
            }
        }
    }

    /// Grant or deny a capability for a member.
    pub async fn set_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), AccessError> {
        self.overrides
            .set_member_override(guild_id, user_id, capability, allow)
            .await?;
        self.cache.invalidate_member(guild_id, user_id);
        Ok(())
    }

    /// Remove a member's explicit record. Returns `true` if one existed.
    pub async fn clear_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<bool, AccessError> {
        let removed = self
            .overrides
            .clear_member_override(guild_id, user_id, capability)
            .await?;
        self.cache.invalidate_member(guild_id, user_id);
        Ok(removed)
    }

    /// Grant or deny a capability for a role.
    ///
    /// Invalidates the whole guild's cached decisions: any member may hold
    /// the role.
    pub async fn set_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), AccessError> {
        self.overrides
            .set_role_override(guild_id, role_id, capability, allow)
            .await?;
        self.cache.invalidate_guild(guild_id);
        Ok(())
    }

    /// Remove a role's explicit record. Returns `true` if one existed.
    pub async fn clear_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<bool, AccessError> {
        let removed = self
            .overrides
            .clear_role_override(guild_id, role_id, capability)
            .await?;
        self.cache.invalidate_guild(guild_id);
        Ok(removed)
    }

    /// A member's explicit records, for the admin listing surface.
    pub async fn list_member_overrides(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MemberOverride>, AccessError> {
        Ok(self.overrides.list_member_overrides(guild_id, user_id).await?)
    }

    /// A role's explicit records, for the admin listing surface.
    pub async fn list_role_overrides(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<RoleOverride>, AccessError> {
        Ok(self.overrides.list_role_overrides(guild_id, role_id).await?)
    }
}

/// Whether `target` is reachable from `from` across the include edges.
fn reaches(edges: &HashMap<String, Vec<String>>, from: &str, target: &str) -> bool {
    let mut visited = HashSet::new();
    let mut pending = vec![from.to_owned()];

    while let Some(next) = pending.pop() {
        if next == target {
            return true;
        }
        if !visited.insert(next.clone()) {
            continue;
        }
        if let Some(includes) = edges.get(&next) {
            pending.extend(includes.iter().cloned());
        }
    }
    false
}

/// Drop includes that would close a cycle through the existing edges.
fn strip_cycles(privilege: &mut Privilege, edges: &HashMap<String, Vec<String>>) {
    let name = privilege.name().to_owned();
    let offending: Vec<String> = privilege
        .includes()
        .iter()
        .filter(|include| reaches(edges, include, &name))
        .cloned()
        .collect();

    for include in offending {
        warn!(privilege = %name, includes = %include, "dropping cyclic include reference");
        privilege.exclude(&include);
    }
}

/// Validation scope for built-in definitions: capabilities plus built-ins.
struct BuiltinScope<'a> {
    registry: &'a Registry,
    defining: &'a str,
}

impl DefinitionScope for BuiltinScope<'_> {
    fn capability_exists(&self, path: &str) -> bool {
        self.registry.get_capability(path).is_some()
    }

    fn privilege_exists(&self, name: &str) -> bool {
        name != self.defining && self.registry.builtins.read().contains_key(name)
    }
}

/// Validation scope for one guild: capabilities, the guild's privileges,
/// and the built-ins.
struct GuildScope<'a> {
    registry: &'a Registry,
    guild_id: Uuid,
    defining: &'a str,
}

impl DefinitionScope for GuildScope<'_> {
    fn capability_exists(&self, path: &str) -> bool {
        self.registry.get_capability(path).is_some()
    }

    fn privilege_exists(&self, name: &str) -> bool {
        if name == self.defining {
            return false;
        }
        if self.registry.builtins.read().contains_key(name) {
            return true;
        }
        self.registry
            .guilds
            .get(&self.guild_id)
            .is_some_and(|map| map.contains_key(name))
    }
}
