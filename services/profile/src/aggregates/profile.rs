//! Profile aggregate.
//!
//! One reducer serves both writers of a profile: the replication
//! reconciler applying identity's events, and the HTTP API. Replicated
//! changes are applied silently since identity has already announced them.
//! Local edits publish their own event on `user.events`.

use crate::events::{ProfileEvent, USER_TOPIC, UserDeleted};
use crate::types::{Profile, ProfileCompletion, ProfilePatch, ReplicatedChanges, UserRecord};
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_core::event::Event;
use dentalbook_core::event_bus::EventBus;
use dentalbook_core::{SmallVec, effect::Effect, environment::Clock, publish_event, reducer::Reducer, smallvec};
use std::sync::Arc;
use thiserror::Error;

const NATIONAL_ID_LENGTH: std::ops::RangeInclusive<usize> = 8..=20;
const PHONE_LENGTH: std::ops::RangeInclusive<usize> = 8..=15;

/// The profile being acted on, and why the last action was refused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileState {
    /// `None` when no replica exists. For [`ProfileAction::Materialize`]
    /// this is the row already holding the record's id or email, if any.
    pub profile: Option<Profile>,
    /// Set when the last action was refused
    pub rejection: Option<ProfileRejection>,
}

impl ProfileState {
    /// State around an existing (or missing) profile
    #[must_use]
    pub const fn of(profile: Option<Profile>) -> Self {
        Self {
            profile,
            rejection: None,
        }
    }
}

/// Why a profile action was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProfileRejection {
    /// No local replica
    #[error("User not found")]
    NotFound,

    /// The record is already replicated
    #[error("User {existing} already exists")]
    AlreadyReplicated {
        /// Id of the row holding the email
        existing: i64,
    },

    /// A field failed validation
    #[error("{message}")]
    Invalid {
        /// Offending field (camelCase, as on the wire)
        field: &'static str,
        /// Human-readable reason
        message: String,
    },

    /// Only clients complete their profile this way
    #[error("Only clients can complete their profile")]
    NotAClient,
}

impl ProfileRejection {
    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyReplicated { .. } => "ALREADY_EXISTS",
            Self::Invalid { .. } => "VALIDATION_ERROR",
            Self::NotAClient => "NOT_A_CLIENT",
        }
    }

    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// What can happen to a profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProfileAction {
    /// Create the replica of an identity record unless one exists
    Materialize(UserRecord),
    /// Apply a replicated `USER_UPDATED`
    MergeReplicated(ReplicatedChanges),
    /// Apply a replicated `USER_DELETED`
    DeactivateReplicated,
    /// Apply a replicated `USER_LOGIN`
    RecordLogin {
        /// Login time
        at: DateTime<Utc>,
    },
    /// Edit profile-owned fields
    Update(ProfilePatch),
    /// A client supplies the mandatory profile fields
    Complete(ProfileCompletion),
    /// Flip the active flag
    ToggleActive,
    /// Soft delete
    Delete,
    /// The bus refused a published event
    PublishFailed {
        /// Event that was lost
        event_type: String,
        /// Bus error
        reason: String,
    },
}

/// Dependencies of the profile reducer
#[derive(Clone)]
pub struct ProfileEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Bus for domain events
    pub event_bus: Arc<dyn EventBus>,
}

impl ProfileEnvironment {
    /// Creates a new `ProfileEnvironment`
    #[must_use]
    pub const fn new(clock: Arc<dyn Clock>, event_bus: Arc<dyn EventBus>) -> Self {
        Self { clock, event_bus }
    }
}

type Effects = SmallVec<[Effect<ProfileAction>; 4]>;

/// Reducer for the profile aggregate
#[derive(Clone, Debug, Default)]
pub struct ProfileReducer;

impl ProfileReducer {
    /// Creates a new `ProfileReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn publish(event: &ProfileEvent, env: &ProfileEnvironment) -> Effect<ProfileAction> {
        match event.to_serialized(env.clock.now()) {
            Ok(serialized) => {
                let event_type = serialized.event_type.clone();
                publish_event! {
                    bus: env.event_bus,
                    topic: USER_TOPIC,
                    event: serialized,
                    on_success: || None,
                    on_error: |error| Some(ProfileAction::PublishFailed {
                        event_type,
                        reason: error.to_string(),
                    })
                }
            },
            Err(error) => {
                tracing::error!(event_type = event.event_type(), error = %error, "Failed to encode event");
                Effect::None
            },
        }
    }

    fn required(field: &'static str, value: &str) -> Result<(), ProfileRejection> {
        if value.trim().is_empty() {
            Err(ProfileRejection::invalid(field, format!("{field} must not be empty")))
        } else {
            Ok(())
        }
    }

    fn length(
        field: &'static str,
        value: &str,
        range: &std::ops::RangeInclusive<usize>,
    ) -> Result<(), ProfileRejection> {
        if range.contains(&value.chars().count()) {
            Ok(())
        } else {
            Err(ProfileRejection::invalid(
                field,
                format!("{field} must be between {} and {} characters", range.start(), range.end()),
            ))
        }
    }

    fn validate_record(record: &UserRecord) -> Result<(), ProfileRejection> {
        if !record.email.contains('@') {
            return Err(ProfileRejection::invalid("email", "email is not valid"));
        }
        Self::required("name", &record.name)?;
        Self::required("surname", &record.surname)
    }

    fn validate_patch(patch: &ProfilePatch) -> Result<(), ProfileRejection> {
        if let Some(name) = &patch.name {
            Self::required("name", name)?;
        }
        if let Some(surname) = &patch.surname {
            Self::required("surname", surname)?;
        }
        if let Some(national_id) = &patch.national_id {
            Self::length("nationalId", national_id, &NATIONAL_ID_LENGTH)?;
        }
        if let Some(phone) = &patch.phone {
            Self::length("phone", phone, &PHONE_LENGTH)?;
        }
        if patch.years_experience.is_some_and(|years| years < 0) {
            return Err(ProfileRejection::invalid("yearsExperience", "yearsExperience must not be negative"));
        }
        Ok(())
    }

    fn merge(profile: &mut Profile, changes: ReplicatedChanges) {
        let ReplicatedChanges {
            id: _,
            email,
            name,
            surname,
            role,
            active,
            profile_complete,
            national_id,
            birth_date,
            phone,
            address,
            license_number,
            specialty,
            years_experience,
            shift,
            hire_date,
        } = changes;

        if let Some(email) = email {
            profile.email = email;
        }
        if let Some(name) = name {
            profile.name = name;
        }
        if let Some(surname) = surname {
            profile.surname = surname;
        }
        if let Some(role) = role {
            profile.role = role;
        }
        if let Some(active) = active {
            profile.active = active;
        }
        if let Some(complete) = profile_complete {
            profile.profile_complete = complete;
        }
        set(&mut profile.national_id, national_id);
        set(&mut profile.birth_date, birth_date);
        set(&mut profile.phone, phone);
        set(&mut profile.address, address);
        set(&mut profile.license_number, license_number);
        set(&mut profile.specialty, specialty);
        set(&mut profile.years_experience, years_experience);
        set(&mut profile.shift, shift);
        set(&mut profile.hire_date, hire_date);
    }

    fn patch(profile: &mut Profile, patch: ProfilePatch) {
        let ProfilePatch {
            name,
            surname,
            national_id,
            birth_date,
            phone,
            address,
            license_number,
            specialty,
            years_experience,
            shift,
            hire_date,
        } = patch;

        if let Some(name) = name {
            profile.name = name;
        }
        if let Some(surname) = surname {
            profile.surname = surname;
        }
        set(&mut profile.national_id, national_id);
        set(&mut profile.birth_date, birth_date);
        set(&mut profile.phone, phone);
        set(&mut profile.address, address);
        set(&mut profile.license_number, license_number);
        set(&mut profile.specialty, specialty);
        set(&mut profile.years_experience, years_experience);
        set(&mut profile.shift, shift);
        set(&mut profile.hire_date, hire_date);
    }

    fn apply(
        state: &mut ProfileState,
        action: ProfileAction,
        env: &ProfileEnvironment,
    ) -> Result<Effects, ProfileRejection> {
        let now = env.clock.now();

        match action {
            ProfileAction::Materialize(record) => {
                if let Some(existing) = &state.profile {
                    return Err(ProfileRejection::AlreadyReplicated { existing: existing.id });
                }
                Self::validate_record(&record)?;
                state.profile = Some(Profile::from_record(record, now));
                return Ok(SmallVec::new());
            },
            ProfileAction::PublishFailed { event_type, reason } => {
                tracing::warn!(event_type = %event_type, reason = %reason, "Profile event was not published");
                return Ok(SmallVec::new());
            },
            _ => {},
        }

        let Some(profile) = state.profile.as_mut() else {
            return Err(ProfileRejection::NotFound);
        };

        match action {
            ProfileAction::MergeReplicated(changes) => {
                let before = profile.clone();
                Self::merge(profile, changes);
                if *profile != before {
                    profile.updated_at = now;
                }
                Ok(SmallVec::new())
            },
            ProfileAction::DeactivateReplicated => {
                if profile.active {
                    profile.active = false;
                    profile.updated_at = now;
                }
                Ok(SmallVec::new())
            },
            ProfileAction::RecordLogin { at } => {
                if profile.last_login.is_none_or(|last| last < at) {
                    profile.last_login = Some(at);
                }
                Ok(SmallVec::new())
            },
            ProfileAction::Update(patch) => {
                Self::validate_patch(&patch)?;
                Self::patch(profile, patch);
                profile.updated_at = now;
                Ok(smallvec![Self::publish(&ProfileEvent::Updated(Box::new(profile.clone())), env)])
            },
            ProfileAction::Complete(completion) => {
                if profile.role != Role::Client {
                    return Err(ProfileRejection::NotAClient);
                }
                Self::length("nationalId", &completion.national_id, &NATIONAL_ID_LENGTH)?;
                Self::length("phone", &completion.phone, &PHONE_LENGTH)?;
                Self::required("address", &completion.address)?;

                profile.national_id = Some(completion.national_id);
                profile.birth_date = Some(completion.birth_date);
                profile.phone = Some(completion.phone);
                profile.address = Some(completion.address);
                profile.profile_complete = true;
                profile.updated_at = now;
                Ok(smallvec![Self::publish(
                    &ProfileEvent::ProfileCompleted(Box::new(profile.clone())),
                    env
                )])
            },
            ProfileAction::ToggleActive => {
                profile.active = !profile.active;
                profile.updated_at = now;
                Ok(smallvec![Self::publish(&ProfileEvent::Updated(Box::new(profile.clone())), env)])
            },
            ProfileAction::Delete => {
                profile.active = false;
                profile.updated_at = now;
                Ok(smallvec![Self::publish(
                    &ProfileEvent::Deleted(UserDeleted { user_id: profile.id }),
                    env
                )])
            },
            ProfileAction::Materialize(_) | ProfileAction::PublishFailed { .. } => Ok(SmallVec::new()),
        }
    }
}

/// `Some` overwrites, `None` leaves the field alone
fn set<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}

impl Reducer for ProfileReducer {
    type State = ProfileState;
    type Action = ProfileAction;
    type Environment = ProfileEnvironment;

    fn reduce(&self, state: &mut Self::State, action: Self::Action, env: &Self::Environment) -> Effects {
        state.rejection = None;
        match Self::apply(state, action, env) {
            Ok(effects) => effects,
            Err(rejection) => {
                state.rejection = Some(rejection);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::tests::{at, profile, record};
    use chrono::NaiveDate;
    use dentalbook_testing::assertions::{assert_no_effects, assert_publishes};
    use dentalbook_testing::mocks::InMemoryEventBus;
    use dentalbook_testing::{ReducerTest, clock_at};

    fn env() -> ProfileEnvironment {
        ProfileEnvironment::new(
            Arc::new(clock_at("2025-06-02T12:00:00Z")),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn completion() -> ProfileCompletion {
        ProfileCompletion {
            national_id: "12345678A".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 4, 1).unwrap(),
            phone: "600123123".to_string(),
            address: "Calle Mayor 1".to_string(),
        }
    }

    #[test]
    fn materialize_creates_with_the_identity_id() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::default())
            .when_action(ProfileAction::Materialize(record(42, Role::Client)))
            .then_state(|state| {
                let profile = state.profile.as_ref().unwrap();
                assert_eq!(profile.id, 42);
                assert!(profile.active);
                assert!(!profile.profile_complete);
                assert_eq!(profile.created_at, at("2025-06-02T12:00:00Z"));
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn materialize_is_idempotent_on_email() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(42, Role::Client))))
            .when_action(ProfileAction::Materialize(record(42, Role::Client)))
            .then_state(|state| {
                assert_eq!(state.rejection, Some(ProfileRejection::AlreadyReplicated { existing: 42 }));
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn malformed_records_are_invalid() {
        let mut bad = record(1, Role::Client);
        bad.email = "nope".to_string();
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::default())
            .when_action(ProfileAction::Materialize(bad))
            .then_state(|state| {
                assert!(state.profile.is_none());
                assert!(matches!(state.rejection, Some(ProfileRejection::Invalid { field: "email", .. })));
            })
            .run();
    }

    #[test]
    fn merge_applies_given_fields_only() {
        let changes = ReplicatedChanges {
            id: 5,
            name: Some("Eva".to_string()),
            active: Some(false),
            ..ReplicatedChanges::default()
        };
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Client))))
            .when_action(ProfileAction::MergeReplicated(changes))
            .then_state(|state| {
                let profile = state.profile.as_ref().unwrap();
                assert_eq!(profile.name, "Eva");
                assert_eq!(profile.surname, "Ruiz");
                assert!(!profile.active);
                assert_eq!(profile.updated_at, at("2025-06-02T12:00:00Z"));
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn merge_without_replica_is_not_found() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::default())
            .when_action(ProfileAction::MergeReplicated(ReplicatedChanges {
                id: 5,
                ..ReplicatedChanges::default()
            }))
            .then_state(|state| assert_eq!(state.rejection, Some(ProfileRejection::NotFound)))
            .run();
    }

    #[test]
    fn lagging_reactivation_still_applies() {
        // Identity stamped the reactivation at 10:00; the replica only
        // sees the whole sequence at 12:00.
        let reducer = ProfileReducer::new();
        let env = env();
        let mut state = ProfileState::default();

        let _ = reducer.reduce(&mut state, ProfileAction::Materialize(record(5, Role::Client)), &env);
        let _ = reducer.reduce(&mut state, ProfileAction::DeactivateReplicated, &env);
        assert!(!state.profile.as_ref().unwrap().active);

        let changes: ReplicatedChanges =
            serde_json::from_value(serde_json::json!({"id": 5, "active": true, "updatedAt": "2025-06-02T10:00:00Z"}))
                .unwrap();
        let effects = reducer.reduce(&mut state, ProfileAction::MergeReplicated(changes), &env);

        assert_eq!(state.rejection, None);
        assert!(state.profile.as_ref().unwrap().active);
        assert!(effects.is_empty());
    }

    #[test]
    fn login_keeps_the_latest_time() {
        let mut seen = profile(5, Role::Client);
        seen.last_login = Some(at("2025-06-02T08:00:00Z"));
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(seen)))
            .when_action(ProfileAction::RecordLogin {
                at: at("2025-06-01T08:00:00Z"),
            })
            .then_state(|state| {
                assert_eq!(state.profile.as_ref().unwrap().last_login, Some(at("2025-06-02T08:00:00Z")));
            })
            .run();
    }

    #[test]
    fn update_validates_and_publishes_user_updated() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Practitioner))))
            .when_action(ProfileAction::Update(ProfilePatch {
                specialty: Some("Orthodontics".to_string()),
                years_experience: Some(12),
                ..ProfilePatch::default()
            }))
            .then_state(|state| {
                assert_eq!(state.profile.as_ref().unwrap().specialty.as_deref(), Some("Orthodontics"));
            })
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_UPDATED"))
            .run();

        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Client))))
            .when_action(ProfileAction::Update(ProfilePatch {
                phone: Some("123".to_string()),
                ..ProfilePatch::default()
            }))
            .then_state(|state| {
                assert!(matches!(state.rejection, Some(ProfileRejection::Invalid { field: "phone", .. })));
                assert_eq!(state.profile.as_ref().unwrap().phone, None);
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn completing_a_profile() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Client))))
            .when_action(ProfileAction::Complete(completion()))
            .then_state(|state| {
                let profile = state.profile.as_ref().unwrap();
                assert!(profile.profile_complete);
                assert_eq!(profile.national_id.as_deref(), Some("12345678A"));
            })
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "PROFILE_UPDATED"))
            .run();

        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(7, Role::Practitioner))))
            .when_action(ProfileAction::Complete(completion()))
            .then_state(|state| assert_eq!(state.rejection, Some(ProfileRejection::NotAClient)))
            .then_effects(|effects| assert_no_effects(effects))
            .run();

        let mut short = completion();
        short.national_id = "123".to_string();
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Client))))
            .when_action(ProfileAction::Complete(short))
            .then_state(|state| {
                assert!(matches!(state.rejection, Some(ProfileRejection::Invalid { field: "nationalId", .. })));
            })
            .run();
    }

    #[test]
    fn toggle_and_delete() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::FrontDesk))))
            .when_action(ProfileAction::ToggleActive)
            .then_state(|state| assert!(!state.profile.as_ref().unwrap().active))
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_UPDATED"))
            .run();

        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::FrontDesk))))
            .when_action(ProfileAction::Delete)
            .then_state(|state| assert!(!state.profile.as_ref().unwrap().active))
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_DELETED"))
            .run();
    }

    #[test]
    fn replicated_delete_is_silent() {
        ReducerTest::new(ProfileReducer::new())
            .with_env(env())
            .given_state(ProfileState::of(Some(profile(5, Role::Client))))
            .when_action(ProfileAction::DeactivateReplicated)
            .then_state(|state| assert!(!state.profile.as_ref().unwrap().active))
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }
}
