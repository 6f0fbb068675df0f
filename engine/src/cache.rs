//! Per-actor resolution cache.
//!
//! Memoizes full resolution outcomes keyed by (guild, actor, capability
//! path) using `DashMap` for lock-free concurrent access. Per-guild
//! generation counters prevent in-flight resolutions built from stale data
//! from overwriting a fresh invalidation (TOCTOU protection) without causing
//! cross-guild cache misses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::actor::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    guild_id: Uuid,
    actor: ActorId,
    capability: String,
}

/// Cached decision paired with the guild generation it was resolved at.
struct CachedDecision {
    allow: bool,
    generation: u64,
}

/// Thread-safe cache of resolution outcomes.
#[derive(Default)]
pub struct ResolutionCache {
    decisions: DashMap<CacheKey, CachedDecision>,
    /// Per-guild generation counters. Incremented on guild-wide
    /// invalidation so stale entries and in-flight inserts are discarded.
    generations: DashMap<Uuid, Arc<AtomicU64>>,
}

impl ResolutionCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn guild_generation(&self, guild_id: Uuid) -> Arc<AtomicU64> {
        self.generations
            .entry(guild_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Current generation for a guild, captured before a resolution begins.
    pub(crate) fn generation(&self, guild_id: Uuid) -> u64 {
        self.guild_generation(guild_id).load(Ordering::Acquire)
    }

    /// Cached decision for an actor and capability, if still fresh.
    pub fn get(&self, guild_id: Uuid, actor: ActorId, capability: &str) -> Option<bool> {
        let key = CacheKey {
            guild_id,
            actor,
            capability: capability.to_owned(),
        };

        let current = self.generation(guild_id);
        if let Some(entry) = self.decisions.get(&key) {
            if entry.generation == current {
                return Some(entry.allow);
            }
        }

        // Stale entry from before an invalidation; drop it lazily.
        self.decisions.remove(&key);
        None
    }

    /// Insert a decision resolved at `generation`.
    ///
    /// Skipped if the guild was invalidated since the resolution started.
    pub(crate) fn insert(
        &self,
        guild_id: Uuid,
        actor: ActorId,
        capability: &str,
        allow: bool,
        generation: u64,
    ) {
        if self.generation(guild_id) != generation {
            return;
        }

        self.decisions.insert(
            CacheKey {
                guild_id,
                actor,
                capability: capability.to_owned(),
            },
            CachedDecision { allow, generation },
        );
    }

    /// Drop every cached decision for one member.
    ///
    /// Fired by member-scoped override edits.
    pub fn invalidate_member(&self, guild_id: Uuid, user_id: Uuid) {
        self.decisions
            .retain(|key, _| !(key.guild_id == guild_id && key.actor == ActorId::Member(user_id)));
    }

    /// Drop every cached decision for a guild.
    ///
    /// Fired by role-scoped override edits: the set of members holding the
    /// role is not tracked, so the whole guild's entries are invalidated.
    pub fn invalidate_guild(&self, guild_id: Uuid) {
        self.guild_generation(guild_id)
            .fetch_add(1, Ordering::Release);
        self.decisions.retain(|key, _| key.guild_id != guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: Uuid) -> ActorId {
        ActorId::Member(id)
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ResolutionCache::new();
        let guild = Uuid::new_v4();
        let user = Uuid::new_v4();
        let generation = cache.generation(guild);

        cache.insert(guild, member(user), "music.play", true, generation);

        assert_eq!(cache.get(guild, member(user), "music.play"), Some(true));
        assert_eq!(cache.get(guild, member(user), "music.stop"), None);
    }

    #[test]
    fn test_member_invalidation_is_scoped() {
        let cache = ResolutionCache::new();
        let guild = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let generation = cache.generation(guild);

        cache.insert(guild, member(alice), "music.play", true, generation);
        cache.insert(guild, member(bob), "music.play", false, generation);

        cache.invalidate_member(guild, alice);

        assert_eq!(cache.get(guild, member(alice), "music.play"), None);
        assert_eq!(cache.get(guild, member(bob), "music.play"), Some(false));
    }

    #[test]
    fn test_guild_invalidation_drops_all_actors() {
        let cache = ResolutionCache::new();
        let guild = Uuid::new_v4();
        let other_guild = Uuid::new_v4();
        let user = Uuid::new_v4();
        let role = Uuid::new_v4();

        let generation = cache.generation(guild);
        cache.insert(guild, member(user), "music.play", true, generation);
        cache.insert(guild, ActorId::Role(role), "music.play", true, generation);

        let other_generation = cache.generation(other_guild);
        cache.insert(other_guild, member(user), "music.play", true, other_generation);

        cache.invalidate_guild(guild);

        assert_eq!(cache.get(guild, member(user), "music.play"), None);
        assert_eq!(cache.get(guild, ActorId::Role(role), "music.play"), None);
        assert_eq!(
            cache.get(other_guild, member(user), "music.play"),
            Some(true)
        );
    }

    #[test]
    fn test_stale_insert_discarded() {
        let cache = ResolutionCache::new();
        let guild = Uuid::new_v4();
        let user = Uuid::new_v4();

        // A resolution captures the generation, then an invalidation lands
        // before it finishes.
        let generation = cache.generation(guild);
        cache.invalidate_guild(guild);
        cache.insert(guild, member(user), "music.play", true, generation);

        assert_eq!(cache.get(guild, member(user), "music.play"), None);
    }
}
