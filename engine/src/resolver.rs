//! Resolution: the effective allow/deny decision for a capability and actor.
//!
//! Precedence, highest first:
//! 1. Member-specific override record on the capability
//! 2. Role override records among the member's roles, ordered by hierarchy
//!    position ascending; the first record wins, so the highest-ranked role
//!    with an explicit record decides (lower position = higher rank)
//! 3. The parent chain, same actor, without default fallback
//! 4. The capability's configured default
//!
//! The chain short-circuits: later layers are never consulted once an
//! earlier one yields a decision. Store misses are normal control flow;
//! store failures abort the resolution so the caller denies and logs.

use std::sync::Arc;

use crate::actor::{Actor, Member, Role, RoleRef};
use crate::cache::ResolutionCache;
use crate::capability::CapabilityNode;
use crate::config::DefaultsSource;
use crate::error::AccessError;
use crate::store::OverrideStore;

/// Borrowed view of everything one resolution needs.
#[derive(Clone, Copy)]
pub struct ResolveCtx<'a> {
    pub store: &'a dyn OverrideStore,
    pub defaults: &'a dyn DefaultsSource,
    pub cache: &'a ResolutionCache,
}

impl CapabilityNode {
    /// Full resolution for a member. Always yields a decision.
    pub async fn resolve_for_member(
        &self,
        member: &Member,
        ctx: ResolveCtx<'_>,
    ) -> Result<bool, AccessError> {
        self.resolve(Actor::Member(member), ctx).await
    }

    /// Member resolution without the default fallback.
    pub async fn resolve_for_member_no_default(
        &self,
        member: &Member,
        ctx: ResolveCtx<'_>,
    ) -> Result<Option<bool>, AccessError> {
        self.resolve_no_default(Actor::Member(member), ctx).await
    }

    /// Full resolution for a bare role. Always yields a decision.
    pub async fn resolve_for_role(
        &self,
        role: &Role,
        ctx: ResolveCtx<'_>,
    ) -> Result<bool, AccessError> {
        self.resolve(Actor::Role(role), ctx).await
    }

    /// Role resolution without the default fallback.
    pub async fn resolve_for_role_no_default(
        &self,
        role: &Role,
        ctx: ResolveCtx<'_>,
    ) -> Result<Option<bool>, AccessError> {
        self.resolve_no_default(Actor::Role(role), ctx).await
    }

    async fn resolve(&self, actor: Actor<'_>, ctx: ResolveCtx<'_>) -> Result<bool, AccessError> {
        let path = self.full_path();
        let guild_id = actor.guild_id();

        if let Some(cached) = ctx.cache.get(guild_id, actor.cache_id(), &path) {
            return Ok(cached);
        }

        // Capture the guild generation before touching the store so an
        // invalidation racing this resolution wins.
        let generation = ctx.cache.generation(guild_id);

        let decision = match self.resolve_no_default(actor, ctx).await? {
            Some(decision) => decision,
            None => self.default_decision(ctx.defaults),
        };

        ctx.cache
            .insert(guild_id, actor.cache_id(), &path, decision, generation);
        Ok(decision)
    }

    /// Walk this node and its ancestors, returning the first explicit
    /// decision found for the actor.
    async fn resolve_no_default(
        &self,
        actor: Actor<'_>,
        ctx: ResolveCtx<'_>,
    ) -> Result<Option<bool>, AccessError> {
        let mut ancestor: Option<Arc<CapabilityNode>> = None;

        loop {
            let path = ancestor
                .as_ref()
                .map_or_else(|| self.full_path(), |node| node.full_path());

            if let Some(decision) = lookup_overrides(actor, &path, ctx).await? {
                return Ok(Some(decision));
            }

            let next = ancestor
                .as_ref()
                .map_or_else(|| self.parent(), |node| node.parent());
            match next {
                Some(parent) => ancestor = Some(parent),
                None => return Ok(None),
            }
        }
    }
}

/// Override lookup for one node of the chain: member record first, then the
/// member's role records in hierarchy order.
async fn lookup_overrides(
    actor: Actor<'_>,
    path: &str,
    ctx: ResolveCtx<'_>,
) -> Result<Option<bool>, AccessError> {
    match actor {
        Actor::Member(member) => {
            if let Some(decision) = ctx
                .store
                .member_override(member.guild_id, member.user_id, path)
                .await?
            {
                return Ok(Some(decision));
            }

            if member.roles.is_empty() {
                return Ok(None);
            }

            let records = ctx
                .store
                .role_overrides(member.guild_id, path, &member.role_ids())
                .await?;
            if records.is_empty() {
                return Ok(None);
            }

            let mut with_records: Vec<&RoleRef> = member
                .roles
                .iter()
                .filter(|role| records.contains_key(&role.id))
                .collect();
            with_records.sort_by_key(|role| role.position);

            Ok(with_records
                .first()
                .and_then(|role| records.get(&role.id).copied()))
        }
        Actor::Role(role) => Ok(ctx
            .store
            .role_override(role.guild_id, role.id, path)
            .await?),
    }
}
