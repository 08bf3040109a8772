use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::employee::EmployeeProfile;
use crate::password::PasswordHash;
use crate::user::{ProfileUpdate, User};

pub type DynUserStore = Arc<dyn UserStore>;

/// Error returned by [`UserStore`] operations.
#[derive(Debug)]
pub enum StoreError {
    /// No user matches the given identifier.
    NotFound,
    /// Another user already owns this email address.
    DuplicateEmail,
    /// A field failed validation.
    ///
    /// This is a client-side error: the caller supplied bad input.
    Invalid {
        field: &'static str,
        message: &'static str,
    },
    /// The storage backend failed.
    Backend(anyhow::Error),
}

impl StoreError {
    pub(crate) fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::Invalid { field, message }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "user not found"),
            Self::DuplicateEmail => write!(f, "a user with this email already exists"),
            Self::Invalid { field, message } => write!(f, "invalid {field}: {message}"),
            Self::Backend(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence boundary for the user directory.
///
/// Implementations must enforce case-insensitive email uniqueness; everything
/// else behavioral is delegated to the domain methods on [`User`].
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Performs initial setup required before actually using the store
    ///
    /// This function should be called first, before using any of the other functions.
    async fn setup(&self) -> anyhow::Result<()>;

    /// Persists a freshly built user.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup by email address.
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Applies a profile patch and returns the updated user.
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User, StoreError>;

    async fn set_password(&self, id: Uuid, hash: PasswordHash, now: OffsetDateTime) -> Result<(), StoreError>;

    async fn mark_email_verified(&self, id: Uuid, now: OffsetDateTime) -> Result<User, StoreError>;

    /// Resets the failure counter and stamps `last_login`.
    async fn record_login_success(&self, id: Uuid, now: OffsetDateTime) -> Result<(), StoreError>;

    /// Counts a failed attempt, locking the account at the threshold.
    /// Returns the user as updated so the caller can observe the lock state.
    async fn record_login_failure(&self, id: Uuid, now: OffsetDateTime) -> Result<User, StoreError>;

    async fn unlock_account(&self, id: Uuid) -> Result<(), StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;

    async fn upsert_employee_profile(&self, profile: &EmployeeProfile) -> Result<(), StoreError>;

    async fn employee_profile(&self, user_id: Uuid) -> Result<Option<EmployeeProfile>, StoreError>;
}
