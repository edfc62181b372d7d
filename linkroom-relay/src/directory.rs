//! User directory lookups used to decorate envelopes for display.

use std::collections::HashMap;

use async_trait::async_trait;
use linkroom_proto::event::UserProfile;
use linkroom_proto::message::UserId;

/// Errors from a [`UserDirectory`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The directory has no such user.
    #[error("user {0} not found")]
    NotFound(UserId),
    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves user ids to public profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up a user's profile.
    async fn resolve_user(&self, user_id: &UserId) -> Result<UserProfile, DirectoryError>;
}

/// Resolves `user_id`, falling back to the placeholder profile on any
/// failure. Never fails.
pub async fn profile_or_placeholder(directory: &dyn UserDirectory, user_id: &UserId) -> UserProfile {
    match directory.resolve_user(user_id).await {
        Ok(profile) => profile,
        Err(DirectoryError::NotFound(_)) => UserProfile::placeholder(user_id.clone()),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "directory lookup failed, using placeholder");
            UserProfile::placeholder(user_id.clone())
        }
    }
}

/// Directory with a fixed set of users, seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: HashMap<UserId, UserProfile>,
}

impl StaticDirectory {
    /// Creates a directory holding `profiles`. Later duplicates win.
    pub fn new(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: profiles
                .into_iter()
                .map(|profile| (profile.id.clone(), profile))
                .collect(),
        }
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn resolve_user(&self, user_id: &UserId) -> Result<UserProfile, DirectoryError> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.clone()))
    }
}
