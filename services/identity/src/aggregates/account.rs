//! Account aggregate.
//!
//! Passwords are checked and hashed before an account reaches the reducer,
//! so [`AccountAction::Open`] carries a finished row with its id already
//! reserved. Every accepted action announces itself on the bus.

use crate::events::{AccountEvent, StatusChanged, UserCreated, UserDeleted, UserLogin};
use crate::types::{Account, LoginContext};
use dentalbook_core::event::Event;
use dentalbook_core::event_bus::EventBus;
use dentalbook_core::{SmallVec, effect::Effect, environment::Clock, publish_event, reducer::Reducer, smallvec};
use std::sync::Arc;
use thiserror::Error;

const PASSWORD_LENGTH: std::ops::RangeInclusive<usize> = 6..=100;

/// The account being acted on, and why the last action was refused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    /// `None` when no account exists. For [`AccountAction::Open`] this is
    /// the account already holding the email, if any.
    pub account: Option<Account>,
    /// Set when the last action was refused
    pub rejection: Option<AccountRejection>,
}

impl AccountState {
    /// State around an existing (or missing) account
    #[must_use]
    pub const fn of(account: Option<Account>) -> Self {
        Self {
            account,
            rejection: None,
        }
    }
}

/// Why an account action was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AccountRejection {
    /// No such account
    #[error("User not found")]
    NotFound,

    /// The email belongs to another account
    #[error("Email {0} is already registered")]
    EmailTaken(String),

    /// The account has been deactivated
    #[error("Account is deactivated, contact the clinic")]
    Inactive,

    /// A field failed validation
    #[error("{message}")]
    Invalid {
        /// Offending field (camelCase, as on the wire)
        field: &'static str,
        /// Human-readable reason
        message: String,
    },
}

impl AccountRejection {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Check a new password, and its confirmation when one was asked for.
///
/// # Errors
///
/// [`AccountRejection::Invalid`] naming `password` or `confirmPassword`.
pub fn validate_password(password: &str, confirmation: Option<&str>) -> Result<(), AccountRejection> {
    if !PASSWORD_LENGTH.contains(&password.chars().count()) {
        return Err(AccountRejection::invalid(
            "password",
            format!(
                "password must be between {} and {} characters",
                PASSWORD_LENGTH.start(),
                PASSWORD_LENGTH.end()
            ),
        ));
    }
    if confirmation.is_some_and(|confirmation| confirmation != password) {
        return Err(AccountRejection::invalid("confirmPassword", "Passwords do not match"));
    }
    Ok(())
}

/// What can happen to an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountAction {
    /// Store a new account and announce it
    Open(Account),
    /// A successful password check
    LogIn(LoginContext),
    /// Activate or deactivate
    SetActive {
        /// Target flag
        active: bool,
    },
    /// The bus refused a published event
    PublishFailed {
        /// Event that was lost
        event_type: String,
        /// Bus error
        reason: String,
    },
}

/// Dependencies of the account reducer
#[derive(Clone)]
pub struct AccountEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Bus for domain events
    pub event_bus: Arc<dyn EventBus>,
}

impl AccountEnvironment {
    /// Creates a new `AccountEnvironment`
    #[must_use]
    pub const fn new(clock: Arc<dyn Clock>, event_bus: Arc<dyn EventBus>) -> Self {
        Self { clock, event_bus }
    }
}

type Effects = SmallVec<[Effect<AccountAction>; 4]>;

/// Reducer for the account aggregate
#[derive(Clone, Debug, Default)]
pub struct AccountReducer;

impl AccountReducer {
    /// Creates a new `AccountReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn publish(event: &AccountEvent, env: &AccountEnvironment) -> Effect<AccountAction> {
        match event.to_serialized(env.clock.now()) {
            Ok(serialized) => {
                let event_type = serialized.event_type.clone();
                publish_event! {
                    bus: env.event_bus,
                    topic: event.topic(),
                    event: serialized,
                    on_success: || None,
                    on_error: |error| Some(AccountAction::PublishFailed {
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

    fn validate(account: &Account) -> Result<(), AccountRejection> {
        let valid_email = account
            .email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
        if !valid_email {
            return Err(AccountRejection::invalid("email", "email is not valid"));
        }
        if account.name.trim().is_empty() {
            return Err(AccountRejection::invalid("name", "name must not be empty"));
        }
        if account.surname.trim().is_empty() {
            return Err(AccountRejection::invalid("surname", "surname must not be empty"));
        }
        Ok(())
    }

    fn apply(
        state: &mut AccountState,
        action: AccountAction,
        env: &AccountEnvironment,
    ) -> Result<Effects, AccountRejection> {
        let now = env.clock.now();

        match action {
            AccountAction::Open(account) => {
                if let Some(existing) = &state.account {
                    return Err(AccountRejection::EmailTaken(existing.email.clone()));
                }
                Self::validate(&account)?;
                let effect = Self::publish(&AccountEvent::Created(UserCreated::from(&account)), env);
                state.account = Some(account);
                Ok(smallvec![effect])
            },
            AccountAction::LogIn(context) => {
                let account = state.account.as_mut().ok_or(AccountRejection::NotFound)?;
                if !account.active {
                    return Err(AccountRejection::Inactive);
                }
                account.last_login = Some(now);
                Ok(smallvec![Self::publish(
                    &AccountEvent::LoggedIn(UserLogin {
                        user_id: account.id,
                        email: account.email.clone(),
                        ip: context.ip,
                        user_agent: context.user_agent,
                        timestamp: now,
                    }),
                    env
                )])
            },
            AccountAction::SetActive { active } => {
                let account = state.account.as_mut().ok_or(AccountRejection::NotFound)?;
                if account.active == active {
                    return Ok(SmallVec::new());
                }
                account.active = active;
                account.updated_at = now;
                let event = if active {
                    AccountEvent::StatusChanged(StatusChanged {
                        id: account.id,
                        active,
                        updated_at: now,
                    })
                } else {
                    AccountEvent::Deleted(UserDeleted { user_id: account.id })
                };
                Ok(smallvec![Self::publish(&event, env)])
            },
            AccountAction::PublishFailed { event_type, reason } => {
                tracing::warn!(event_type = %event_type, reason = %reason, "Account event was not published");
                Ok(SmallVec::new())
            },
        }
    }
}

impl Reducer for AccountReducer {
    type State = AccountState;
    type Action = AccountAction;
    type Environment = AccountEnvironment;

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
    use crate::events::{AUTH_TOPIC, USER_TOPIC};
    use crate::types::tests::{account, at};
    use dentalbook_auth::Role;
    use dentalbook_testing::assertions::{assert_no_effects, assert_publishes};
    use dentalbook_testing::mocks::InMemoryEventBus;
    use dentalbook_testing::{ReducerTest, clock_at};

    fn env() -> AccountEnvironment {
        AccountEnvironment::new(
            Arc::new(clock_at("2025-06-02T12:00:00Z")),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn context() -> LoginContext {
        LoginContext {
            ip: "203.0.113.1".to_string(),
            user_agent: "curl/8".to_string(),
        }
    }

    #[test]
    fn passwords_need_six_characters_and_a_matching_confirmation() {
        assert!(validate_password("secret", Some("secret")).is_ok());
        assert!(validate_password("secret", None).is_ok());
        assert!(matches!(
            validate_password("abc", Some("abc")),
            Err(AccountRejection::Invalid { field: "password", .. })
        ));
        assert!(matches!(
            validate_password("secret", Some("secreT")),
            Err(AccountRejection::Invalid { field: "confirmPassword", .. })
        ));
    }

    #[test]
    fn open_announces_the_account() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::default())
            .when_action(AccountAction::Open(account(5, Role::Client)))
            .then_state(|state| {
                assert_eq!(state.rejection, None);
                assert_eq!(state.account.as_ref().unwrap().id, 5);
            })
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_CREATED"))
            .run();
    }

    #[test]
    fn open_refuses_a_taken_email() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(account(5, Role::Client))))
            .when_action(AccountAction::Open(account(6, Role::Client)))
            .then_state(|state| {
                assert_eq!(
                    state.rejection,
                    Some(AccountRejection::EmailTaken("user5@example.com".to_string()))
                );
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn open_validates_email_and_names() {
        let mut bad = account(5, Role::Client);
        bad.email = "ana@localhost".to_string();
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::default())
            .when_action(AccountAction::Open(bad))
            .then_state(|state| {
                assert!(matches!(state.rejection, Some(AccountRejection::Invalid { field: "email", .. })));
                assert!(state.account.is_none());
            })
            .run();

        let mut nameless = account(5, Role::Client);
        nameless.name = "  ".to_string();
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::default())
            .when_action(AccountAction::Open(nameless))
            .then_state(|state| {
                assert!(matches!(state.rejection, Some(AccountRejection::Invalid { field: "name", .. })));
            })
            .run();
    }

    #[test]
    fn login_stamps_and_announces() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(account(5, Role::Client))))
            .when_action(AccountAction::LogIn(context()))
            .then_state(|state| {
                let account = state.account.as_ref().unwrap();
                assert_eq!(account.last_login, Some(at("2025-06-02T12:00:00Z")));
                assert_eq!(account.updated_at, at("2025-06-01T09:00:00Z"));
            })
            .then_effects(|effects| assert_publishes(effects, AUTH_TOPIC, "USER_LOGIN"))
            .run();
    }

    #[test]
    fn inactive_accounts_cannot_log_in() {
        let mut inactive = account(5, Role::Client);
        inactive.active = false;
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(inactive)))
            .when_action(AccountAction::LogIn(context()))
            .then_state(|state| {
                assert_eq!(state.rejection, Some(AccountRejection::Inactive));
                assert_eq!(state.account.as_ref().unwrap().last_login, None);
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn deactivation_is_a_delete_and_reactivation_an_update() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(account(5, Role::Client))))
            .when_action(AccountAction::SetActive { active: false })
            .then_state(|state| assert!(!state.account.as_ref().unwrap().active))
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_DELETED"))
            .run();

        let mut inactive = account(5, Role::Client);
        inactive.active = false;
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(inactive)))
            .when_action(AccountAction::SetActive { active: true })
            .then_state(|state| assert!(state.account.as_ref().unwrap().active))
            .then_effects(|effects| assert_publishes(effects, USER_TOPIC, "USER_UPDATED"))
            .run();
    }

    #[test]
    fn setting_the_current_flag_is_silent() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::of(Some(account(5, Role::Client))))
            .when_action(AccountAction::SetActive { active: true })
            .then_state(|state| assert_eq!(state.rejection, None))
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn missing_accounts_are_not_found() {
        ReducerTest::new(AccountReducer::new())
            .with_env(env())
            .given_state(AccountState::default())
            .when_action(AccountAction::SetActive { active: false })
            .then_state(|state| assert_eq!(state.rejection, Some(AccountRejection::NotFound)))
            .run();
    }
}
