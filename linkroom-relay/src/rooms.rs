//! Group room registry.
//!
//! Group rooms have an assigned identifier, a creator, and a persisted member
//! list that members can grow. The creator is always a member and can never
//! be removed. Direct rooms never appear here; their membership is implied by
//! their key.
//!
//! Every change is journaled to the [`DurableSink`] as a [`GroupChange`]
//! before it is applied, and [`GroupRegistry::restore`] rebuilds the
//! registry from that journal.

use std::collections::HashMap;
use std::sync::Arc;

use linkroom_proto::message::{Timestamp, UserId};
use linkroom_proto::room::{RoomKey, RoomKeyError};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sink::{DurableSink, MemorySink, SinkError};

/// Maximum number of groups the registry will hold.
pub const MAX_GROUPS: usize = 1000;

/// Maximum length of a group name in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// A group room and its membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoom {
    /// Assigned group identifier.
    pub id: String,
    /// Room key messages to this group are addressed to.
    pub room_id: RoomKey,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Who created the group. Always a member.
    pub creator: UserId,
    /// Members in the order they were added, creator first.
    pub members: Vec<UserId>,
    /// When the group was created.
    pub created_at: Timestamp,
}

impl GroupRoom {
    /// Whether `user` is a member.
    #[must_use]
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

/// One journaled mutation of the group registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupChange {
    /// A group was created with its creator as sole member.
    Created(GroupRoom),
    /// Members were appended to a group.
    MembersAdded {
        /// Group identifier.
        group_id: String,
        /// Newly added members, in order.
        members: Vec<UserId>,
    },
    /// A member left or was removed.
    MemberRemoved {
        /// Group identifier.
        group_id: String,
        /// The removed member.
        member: UserId,
    },
}

impl GroupChange {
    /// Applies the change to a group table. Changes naming an unknown group
    /// are ignored.
    pub(crate) fn apply(self, groups: &mut HashMap<String, GroupRoom>) {
        match self {
            Self::Created(group) => {
                groups.insert(group.id.clone(), group);
            }
            Self::MembersAdded { group_id, members } => {
                if let Some(group) = groups.get_mut(&group_id) {
                    for member in members {
                        if !group.has_member(&member) {
                            group.members.push(member);
                        }
                    }
                }
            }
            Self::MemberRemoved { group_id, member } => {
                if let Some(group) = groups.get_mut(&group_id) {
                    group.members.retain(|m| *m != member);
                }
            }
        }
    }
}

/// Errors from group membership operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    /// No group has this identifier.
    #[error("group {0} not found")]
    NotFound(String),
    /// The requester is not a member of the group.
    #[error("{user} is not a member of group {group}")]
    NotMember {
        /// Group identifier.
        group: String,
        /// Requesting user.
        user: UserId,
    },
    /// The creator cannot be removed from their group.
    #[error("the group creator cannot be removed")]
    CreatorRemoval,
    /// Group names must contain something other than whitespace.
    #[error("group name is required")]
    EmptyName,
    /// Group names are limited to [`MAX_NAME_CHARS`].
    #[error("group name too long: {0} characters (max {MAX_NAME_CHARS})")]
    NameTooLong(usize),
    /// An add request listed no members.
    #[error("no member ids given")]
    NoMembers,
    /// A listed member id is blank.
    #[error("member ids must not be blank")]
    BlankMember,
    /// The registry has reached its maximum capacity.
    #[error("group registry is full (max {MAX_GROUPS} groups)")]
    CapacityReached,
    /// The assigned identifier could not form a room key.
    #[error(transparent)]
    RoomKey(#[from] RoomKeyError),
    /// The change could not be journaled; nothing was applied.
    #[error("failed to persist group change: {0}")]
    Persistence(String),
}

impl From<SinkError> for MembershipError {
    fn from(e: SinkError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Registry of group rooms, journaled to a [`DurableSink`].
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, GroupRoom>>,
    sink: Arc<dyn DurableSink>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    /// Creates an empty registry journaled to a private in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(MemorySink::new()))
    }

    /// Creates an empty registry journaling to `sink`. Groups already in the
    /// sink are not loaded; see [`GroupRegistry::restore`].
    pub fn with_sink(sink: Arc<dyn DurableSink>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Rebuilds the registry from the groups journaled in `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sink cannot list its groups.
    pub async fn restore(sink: Arc<dyn DurableSink>) -> Result<Self, SinkError> {
        let groups: HashMap<String, GroupRoom> = sink
            .load_groups()
            .await?
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        tracing::info!(groups = groups.len(), "group registry restored");
        Ok(Self {
            groups: RwLock::new(groups),
            sink,
        })
    }

    /// Creates a group with `creator` as its first member.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::EmptyName`], [`MembershipError::NameTooLong`],
    /// [`MembershipError::CapacityReached`] or [`MembershipError::Persistence`].
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        creator: &UserId,
    ) -> Result<GroupRoom, MembershipError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MembershipError::EmptyName);
        }
        let chars = name.chars().count();
        if chars > MAX_NAME_CHARS {
            return Err(MembershipError::NameTooLong(chars));
        }

        let id = Uuid::now_v7().to_string();
        let group = GroupRoom {
            room_id: RoomKey::group(&id)?,
            id: id.clone(),
            name: name.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            creator: creator.clone(),
            members: vec![creator.clone()],
            created_at: Timestamp::now(),
        };

        let mut groups = self.groups.write().await;
        if groups.len() >= MAX_GROUPS {
            return Err(MembershipError::CapacityReached);
        }
        self.sink
            .record_group(&GroupChange::Created(group.clone()))
            .await?;
        groups.insert(id, group.clone());
        drop(groups);

        tracing::info!(group_id = %group.id, creator = %creator, "group created");
        Ok(group)
    }

    /// Returns the group with identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::NotFound`] for an unknown id.
    pub async fn get(&self, id: &str) -> Result<GroupRoom, MembershipError> {
        let groups = self.groups.read().await;
        groups
            .get(id)
            .cloned()
            .ok_or_else(|| MembershipError::NotFound(id.to_string()))
    }

    /// Whether a group with identifier `id` exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.groups.read().await.contains_key(id)
    }

    /// Current member list of the group.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::NotFound`] for an unknown id.
    pub async fn members(&self, id: &str) -> Result<Vec<UserId>, MembershipError> {
        self.get(id).await.map(|group| group.members)
    }

    /// Whether `user` belongs to the group.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::NotFound`] for an unknown id.
    pub async fn is_member(&self, id: &str, user: &UserId) -> Result<bool, MembershipError> {
        let groups = self.groups.read().await;
        groups
            .get(id)
            .map(|group| group.has_member(user))
            .ok_or_else(|| MembershipError::NotFound(id.to_string()))
    }

    /// Groups `user` belongs to, oldest first.
    pub async fn groups_of(&self, user: &UserId) -> Vec<GroupRoom> {
        let groups = self.groups.read().await;
        let mut mine: Vec<GroupRoom> = groups
            .values()
            .filter(|group| group.has_member(user))
            .cloned()
            .collect();
        drop(groups);
        mine.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        mine
    }

    /// Adds `member_ids` to the group on behalf of `requester`.
    ///
    /// Ids already in the group, or repeated in the request, are skipped.
    /// Returns the ids actually added, in request order.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::NoMembers`] or [`MembershipError::BlankMember`]
    /// for a bad request, [`MembershipError::NotFound`], or
    /// [`MembershipError::NotMember`] if the requester is not a member, or
    /// [`MembershipError::Persistence`].
    pub async fn add_members(
        &self,
        id: &str,
        requester: &UserId,
        member_ids: &[UserId],
    ) -> Result<Vec<UserId>, MembershipError> {
        if member_ids.is_empty() {
            return Err(MembershipError::NoMembers);
        }
        if member_ids.iter().any(UserId::is_blank) {
            return Err(MembershipError::BlankMember);
        }

        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(id)
            .ok_or_else(|| MembershipError::NotFound(id.to_string()))?;
        if !group.has_member(requester) {
            return Err(MembershipError::NotMember {
                group: id.to_string(),
                user: requester.clone(),
            });
        }

        let mut added: Vec<UserId> = Vec::new();
        for member in member_ids {
            if !group.has_member(member) && !added.contains(member) {
                added.push(member.clone());
            }
        }
        if !added.is_empty() {
            self.sink
                .record_group(&GroupChange::MembersAdded {
                    group_id: id.to_string(),
                    members: added.clone(),
                })
                .await?;
            group.members.extend(added.iter().cloned());
        }
        drop(groups);

        tracing::info!(group_id = %id, requester = %requester, added = added.len(), "members added");
        Ok(added)
    }

    /// Removes `member` from the group on behalf of `requester`.
    ///
    /// Returns `false` if `member` was not in the group.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::CreatorRemoval`] if `member` is the creator,
    /// [`MembershipError::NotFound`], [`MembershipError::NotMember`] if
    /// the requester is not a member, or [`MembershipError::Persistence`].
    pub async fn remove_member(
        &self,
        id: &str,
        requester: &UserId,
        member: &UserId,
    ) -> Result<bool, MembershipError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(id)
            .ok_or_else(|| MembershipError::NotFound(id.to_string()))?;
        if group.creator == *member {
            return Err(MembershipError::CreatorRemoval);
        }
        if !group.has_member(requester) {
            return Err(MembershipError::NotMember {
                group: id.to_string(),
                user: requester.clone(),
            });
        }

        let removed = group.has_member(member);
        if removed {
            self.sink
                .record_group(&GroupChange::MemberRemoved {
                    group_id: id.to_string(),
                    member: member.clone(),
                })
                .await?;
            group.members.retain(|m| m != member);
        }
        drop(groups);

        if removed {
            tracing::info!(group_id = %id, requester = %requester, member = %member, "member removed");
        }
        Ok(removed)
    }
}
