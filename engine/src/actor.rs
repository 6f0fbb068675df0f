//! Actors: the subjects of a resolution query.
//!
//! The chat platform supplies actor identity (stable guild + user id pair),
//! the role ids a member holds, and each role's position in the guild's
//! hierarchy. Positions follow the platform convention: a lower number is a
//! higher rank.

use uuid::Uuid;

/// A role held by a member, with its hierarchy position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleRef {
    pub id: Uuid,
    pub position: i32,
}

impl RoleRef {
    pub const fn new(id: Uuid, position: i32) -> Self {
        Self { id, position }
    }
}

/// A guild member together with the roles the platform reports for them.
#[derive(Debug, Clone)]
pub struct Member {
    pub guild_id: Uuid,
    pub user_id: Uuid,
    pub roles: Vec<RoleRef>,
}

impl Member {
    pub const fn new(guild_id: Uuid, user_id: Uuid, roles: Vec<RoleRef>) -> Self {
        Self {
            guild_id,
            user_id,
            roles,
        }
    }

    /// Ids of all roles this member holds.
    pub fn role_ids(&self) -> Vec<Uuid> {
        self.roles.iter().map(|r| r.id).collect()
    }
}

/// A bare guild role, resolved without member context.
#[derive(Debug, Clone, Copy)]
pub struct Role {
    pub guild_id: Uuid,
    pub id: Uuid,
    pub position: i32,
}

impl Role {
    pub const fn new(guild_id: Uuid, id: Uuid, position: i32) -> Self {
        Self {
            guild_id,
            id,
            position,
        }
    }
}

/// The subject of a resolution query.
///
/// Member and role resolution share one chain-walking algorithm and differ
/// only in which override records are consulted at each node.
#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    Member(&'a Member),
    Role(&'a Role),
}

impl Actor<'_> {
    pub const fn guild_id(&self) -> Uuid {
        match self {
            Self::Member(m) => m.guild_id,
            Self::Role(r) => r.guild_id,
        }
    }

    /// Cache identity of this actor within its guild.
    pub(crate) const fn cache_id(&self) -> ActorId {
        match self {
            Self::Member(m) => ActorId::Member(m.user_id),
            Self::Role(r) => ActorId::Role(r.id),
        }
    }
}

/// Cache key component identifying an actor within a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorId {
    Member(Uuid),
    Role(Uuid),
}
