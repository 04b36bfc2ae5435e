//! The profile service: the imperative shell around [`ProfileReducer`].
//!
//! Every write reads the current row, reduces one action, and writes the
//! result back only if nobody else wrote in between (`updated_at` check).
//! Effects run after the write succeeds. Both the HTTP API and the
//! replication reconciler go through here.

use crate::aggregates::{ProfileAction, ProfileEnvironment, ProfileReducer, ProfileRejection, ProfileState};
use crate::events::Incoming;
use crate::identity::{AccountSource, IdentityError};
use crate::repository::{ProfileRepository, violated_field};
use crate::types::{Page, Profile, ProfileCompletion, ProfileFilter, ProfilePatch, UserRecord};
use dentalbook_auth::Role;
use dentalbook_core::reducer::Reducer;
use dentalbook_postgres::RepositoryError;
use dentalbook_runtime::EffectExecutor;
use std::sync::Arc;
use thiserror::Error;

/// Attempts before giving up on a row that keeps changing under us
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Errors from profile commands and queries.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A profile rule refused the command
    #[error(transparent)]
    Rejected(#[from] ProfileRejection),

    /// A unique field is already held by another user
    #[error("{field} is already registered")]
    Duplicate {
        /// Wire name of the field
        field: &'static str,
    },

    /// The caller's own replica is deactivated
    #[error("User {0} is inactive")]
    Inactive(i64),

    /// The identity service could not answer
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Storage failed
    #[error(transparent)]
    Storage(RepositoryError),

    /// The row kept changing while the command tried to write it
    #[error("User {0} changed concurrently, retry the request")]
    Contention(i64),
}

impl From<RepositoryError> for ProfileError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::UniqueViolation(message) => Self::Duplicate {
                field: violated_field(&message),
            },
            other => Self::Storage(other),
        }
    }
}

/// Result alias for profile operations
pub type Result<T> = std::result::Result<T, ProfileError>;

/// How a replicated event was settled against the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Replicated {
    /// The replica changed
    Applied,
    /// Nothing to change
    Unchanged,
    /// `USER_CREATED` for a user already replicated
    Duplicate,
    /// Update, delete or login for a user with no replica
    DroppedMissing,
    /// The event can never apply (bad field, taken email)
    Rejected(String),
}

impl Replicated {
    /// Label for `replication_events_total{outcome}`
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Duplicate => "duplicate",
            Self::DroppedMissing => "dropped_missing",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Profile commands, queries and replication.
#[derive(Clone)]
pub struct Profiles {
    repository: Arc<dyn ProfileRepository>,
    accounts: Arc<dyn AccountSource>,
    env: ProfileEnvironment,
    reducer: ProfileReducer,
    executor: EffectExecutor<ProfileAction>,
}

impl std::fmt::Debug for Profiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiles").finish_non_exhaustive()
    }
}

impl Profiles {
    /// Wire the service. Publish failures come back through the reducer,
    /// which logs them.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ProfileRepository>,
        accounts: Arc<dyn AccountSource>,
        env: ProfileEnvironment,
    ) -> Self {
        let feedback_env = env.clone();
        let executor = EffectExecutor::new(move |action| {
            feed_back(action, &feedback_env);
        });
        Self {
            repository,
            accounts,
            env,
            reducer: ProfileReducer::new(),
            executor,
        }
    }

    /// Storage is reachable
    pub async fn storage_ready(&self) -> bool {
        self.repository.ping().await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// One profile.
    ///
    /// # Errors
    ///
    /// [`ProfileRejection::NotFound`] or a storage error.
    pub async fn find(&self, id: i64) -> Result<Profile> {
        self.repository
            .find(id)
            .await?
            .ok_or(ProfileError::Rejected(ProfileRejection::NotFound))
    }

    /// One profile by email.
    ///
    /// # Errors
    ///
    /// [`ProfileRejection::NotFound`] or a storage error.
    pub async fn find_by_email(&self, email: &str) -> Result<Profile> {
        self.repository
            .find_by_email(email)
            .await?
            .ok_or(ProfileError::Rejected(ProfileRejection::NotFound))
    }

    /// The caller's own replica, which must exist and be active.
    ///
    /// # Errors
    ///
    /// [`ProfileRejection::NotFound`], [`ProfileError::Inactive`] or a storage error.
    pub async fn require_active(&self, id: i64) -> Result<Profile> {
        let profile = self.find(id).await?;
        if profile.active {
            Ok(profile)
        } else {
            Err(ProfileError::Inactive(id))
        }
    }

    /// Filtered listing.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list(&self, filter: &ProfileFilter) -> Result<Page<Profile>> {
        Ok(self.repository.list(filter).await?)
    }

    /// Users holding `role`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn by_role(&self, role: Role, active: bool) -> Result<Vec<Profile>> {
        Ok(self.repository.by_role(role, active).await?)
    }

    /// Active practitioners.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn available_practitioners(&self) -> Result<Vec<Profile>> {
        self.by_role(Role::Practitioner, true).await
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Edit profile-owned fields; publishes `USER_UPDATED`.
    ///
    /// # Errors
    ///
    /// A rejection, a duplicate national id, contention or a storage error.
    pub async fn update(&self, id: i64, patch: ProfilePatch) -> Result<Profile> {
        self.write(id, "update", || ProfileAction::Update(patch.clone()))
            .await
            .map(|(profile, _)| profile)
    }

    /// Complete a client's profile; publishes `PROFILE_UPDATED`.
    ///
    /// # Errors
    ///
    /// A rejection, a duplicate national id, contention or a storage error.
    pub async fn complete(&self, id: i64, completion: ProfileCompletion) -> Result<Profile> {
        self.write(id, "complete", || ProfileAction::Complete(completion.clone()))
            .await
            .map(|(profile, _)| profile)
    }

    /// Flip the active flag; publishes `USER_UPDATED`.
    ///
    /// # Errors
    ///
    /// A rejection, contention or a storage error.
    pub async fn toggle_active(&self, id: i64) -> Result<Profile> {
        self.write(id, "toggle_active", || ProfileAction::ToggleActive)
            .await
            .map(|(profile, _)| profile)
    }

    /// Soft delete; publishes `USER_DELETED`.
    ///
    /// # Errors
    ///
    /// A rejection, contention or a storage error.
    pub async fn delete(&self, id: i64) -> Result<Profile> {
        self.write(id, "delete", || ProfileAction::Delete)
            .await
            .map(|(profile, _)| profile)
    }

    /// Create the replica of `record` unless it exists. Returns the stored
    /// profile and whether it was created now.
    ///
    /// # Errors
    ///
    /// [`ProfileError::Duplicate`] if the email or id already belongs to a
    /// different user, an invalid record, or a storage error.
    pub async fn materialize(&self, record: UserRecord) -> Result<(Profile, bool)> {
        let existing = self.holder_of(&record).await?;

        let mut state = ProfileState::of(existing.clone());
        let effects = self
            .reducer
            .reduce(&mut state, ProfileAction::Materialize(record.clone()), &self.env);
        self.executor.run(effects).await;
        match (state.rejection.take(), existing) {
            (Some(ProfileRejection::AlreadyReplicated { .. }), Some(existing)) => {
                return Self::same_user(existing, &record).map(|profile| (profile, false));
            },
            (Some(rejection), _) => return Err(rejection.into()),
            (None, _) => {},
        }
        let profile = state
            .profile
            .ok_or(ProfileError::Rejected(ProfileRejection::NotFound))?;

        match self.repository.insert(&profile).await {
            Ok(()) => {
                metrics::counter!("profiles_created_total").increment(1);
                tracing::info!(user_id = profile.id, role = %profile.role, "Profile replica created");
                Ok((profile, true))
            },
            Err(RepositoryError::UniqueViolation(message)) => {
                // Lost a race with another writer of the same record
                match self.holder_of(&record).await? {
                    Some(winner) => Self::same_user(winner, &record).map(|profile| (profile, false)),
                    None => Err(ProfileError::Duplicate {
                        field: violated_field(&message),
                    }),
                }
            },
            Err(error) => Err(error.into()),
        }
    }

    /// Make sure user `id` is replicated, pulling it from identity if not.
    ///
    /// # Errors
    ///
    /// [`ProfileRejection::NotFound`] if identity does not know the user,
    /// an unavailable identity service, or a storage error.
    pub async fn sync(&self, id: i64) -> Result<(Profile, bool)> {
        if let Some(profile) = self.repository.find(id).await? {
            return Ok((profile, false));
        }
        let Some(record) = self.accounts.find_account(id).await? else {
            return Err(ProfileRejection::NotFound.into());
        };
        tracing::info!(user_id = id, "Pulling user from identity on demand");
        metrics::counter!("profile_syncs_total").increment(1);
        self.materialize(record).await
    }

    // ========================================================================
    // Replication
    // ========================================================================

    /// Apply one replicated event.
    ///
    /// # Errors
    ///
    /// Only failures worth retrying: storage, contention, or identity being
    /// unavailable. Everything else is reported as a [`Replicated`] outcome.
    pub async fn replicate(&self, incoming: Incoming) -> Result<Replicated> {
        let result = match incoming {
            Incoming::Created(record) => self.materialize(record).await.map(|(_, created)| {
                if created {
                    Replicated::Applied
                } else {
                    Replicated::Duplicate
                }
            }),
            Incoming::Updated(changes) => self
                .write(changes.id, "replicate_update", || ProfileAction::MergeReplicated(changes.clone()))
                .await
                .map(Self::changed),
            Incoming::Deleted(deleted) => self
                .write(deleted.user_id, "replicate_delete", || ProfileAction::DeactivateReplicated)
                .await
                .map(Self::changed),
            Incoming::Login { user_id, at } => self
                .write(user_id, "record_login", || ProfileAction::RecordLogin { at })
                .await
                .map(Self::changed),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(ProfileError::Rejected(ProfileRejection::NotFound)) => Ok(Replicated::DroppedMissing),
            Err(error @ (ProfileError::Rejected(_) | ProfileError::Duplicate { .. })) => {
                Ok(Replicated::Rejected(error.to_string()))
            },
            Err(error) => Err(error),
        }
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    fn changed((_, changed): (Profile, bool)) -> Replicated {
        if changed {
            Replicated::Applied
        } else {
            Replicated::Unchanged
        }
    }

    fn same_user(existing: Profile, record: &UserRecord) -> Result<Profile> {
        if existing.id == record.id && existing.email == record.email {
            return Ok(existing);
        }
        tracing::warn!(
            user_id = record.id,
            existing_id = existing.id,
            "Record collides with a different replica"
        );
        Err(ProfileError::Duplicate {
            field: if existing.id == record.id { "id" } else { "email" },
        })
    }

    /// The row already holding `record`'s email, else its id. Email is the
    /// natural key, so an email match decides which user collides.
    async fn holder_of(&self, record: &UserRecord) -> Result<Option<Profile>> {
        match self.repository.find_by_email(&record.email).await? {
            Some(profile) => Ok(Some(profile)),
            None => Ok(self.repository.find(record.id).await?),
        }
    }

    /// Reduce `action` against the current row and write the result.
    /// Returns the row afterwards and whether it changed.
    async fn write(
        &self,
        id: i64,
        name: &'static str,
        action: impl Fn() -> ProfileAction + Send + Sync,
    ) -> Result<(Profile, bool)> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.repository.find(id).await?;
            let mut state = ProfileState::of(current.clone());
            let effects = self.reducer.reduce(&mut state, action(), &self.env);
            if let Some(rejection) = state.rejection.take() {
                tracing::debug!(user_id = id, action = name, reason = rejection.code(), "Profile command rejected");
                return Err(rejection.into());
            }
            let (Some(before), Some(after)) = (current, state.profile) else {
                return Err(ProfileRejection::NotFound.into());
            };

            let changed = after != before;
            if changed && !self.repository.update(&after, before.updated_at).await? {
                tracing::debug!(user_id = id, action = name, attempt, "Profile changed before write, retrying");
                continue;
            }

            self.executor.run(effects).await;
            if changed {
                metrics::counter!("profile_writes_total", "action" => name).increment(1);
            }
            return Ok((after, changed));
        }
        Err(ProfileError::Contention(id))
    }
}

/// Settle an action the executor fed back. Returns the rejection, if the
/// reducer refused it, after logging it.
fn feed_back(action: ProfileAction, env: &ProfileEnvironment) -> Option<ProfileRejection> {
    let mut state = ProfileState::default();
    let effects = ProfileReducer::new().reduce(&mut state, action, env);
    if !effects.is_empty() {
        tracing::warn!(count = effects.len(), "Dropping effects of a fed-back profile action");
    }
    if let Some(rejection) = &state.rejection {
        tracing::warn!(reason = rejection.code(), "Fed-back profile action was rejected");
    }
    state.rejection
}
