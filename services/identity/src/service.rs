//! The identity service: the imperative shell around [`AccountReducer`].
//!
//! Password hashing and token signing happen here, outside the reducer.
//! Effects run only after the row is written.

use crate::aggregates::{
    AccountAction, AccountEnvironment, AccountReducer, AccountRejection, AccountState, validate_password,
};
use crate::repository::AccountRepository;
use crate::types::{Account, Credentials, LoginContext, NewUser, Registration, Session};
use async_trait::async_trait;
use dentalbook_auth::{AuthError, AuthenticatedUser, JwtService, PasswordHasher, Role, TokenValidator};
use dentalbook_core::reducer::Reducer;
use dentalbook_postgres::RepositoryError;
use dentalbook_runtime::EffectExecutor;
use std::sync::Arc;
use thiserror::Error;

/// Errors from account commands and queries.
#[derive(Debug, Error)]
pub enum AccountError {
    /// An account rule refused the command
    #[error(transparent)]
    Rejected(#[from] AccountRejection),

    /// Credentials, token or hashing failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Storage failed
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Result alias for account operations
pub type Result<T> = std::result::Result<T, AccountError>;

/// Account commands, queries and token validation.
#[derive(Clone)]
pub struct Accounts {
    repository: Arc<dyn AccountRepository>,
    hasher: PasswordHasher,
    jwt: JwtService,
    env: AccountEnvironment,
    reducer: AccountReducer,
    executor: EffectExecutor<AccountAction>,
}

impl std::fmt::Debug for Accounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounts").finish_non_exhaustive()
    }
}

impl Accounts {
    /// Wire the service. Publish failures come back through the reducer,
    /// which logs them.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AccountRepository>,
        hasher: PasswordHasher,
        jwt: JwtService,
        env: AccountEnvironment,
    ) -> Self {
        let feedback_env = env.clone();
        let executor = EffectExecutor::new(move |action| {
            feed_back(action, &feedback_env);
        });
        Self {
            repository,
            hasher,
            jwt,
            env,
            reducer: AccountReducer::new(),
            executor,
        }
    }

    /// Storage is reachable
    pub async fn storage_ready(&self) -> bool {
        self.repository.ping().await
    }

    /// Public client self-registration.
    ///
    /// # Errors
    ///
    /// Invalid fields, mismatched passwords, a taken email, or a storage
    /// or hashing failure.
    pub async fn register(&self, registration: Registration) -> Result<Session> {
        validate_password(&registration.password, Some(&registration.confirm_password))?;
        self.open(
            registration.name,
            registration.surname,
            &registration.email,
            registration.password,
            Role::Client,
        )
        .await
    }

    /// Account creation by an admin, with any role.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub async fn create_user(&self, user: NewUser) -> Result<Session> {
        validate_password(&user.password, None)?;
        self.open(
            user.name,
            user.surname,
            &user.email,
            user.password,
            user.role.unwrap_or(Role::Client),
        )
        .await
    }

    /// Check credentials, stamp the login and issue a token.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] for an unknown email or a wrong
    /// password, [`AccountRejection::Inactive`] for a deactivated account.
    pub async fn login(&self, credentials: Credentials, context: LoginContext) -> Result<Session> {
        let email = normalize_email(&credentials.email);
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AccountRejection::Invalid {
                field: "email",
                message: "Email and password are required".to_string(),
            }
            .into());
        }

        let Some(account) = self.repository.find_by_email(&email).await? else {
            metrics::counter!("logins_total", "outcome" => "unknown_email").increment(1);
            return Err(AuthError::InvalidCredentials.into());
        };
        if !self
            .hasher
            .verify_async(credentials.password, account.password_hash.clone())
            .await?
        {
            metrics::counter!("logins_total", "outcome" => "wrong_password").increment(1);
            tracing::info!(user_id = account.id, "Login with a wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let mut state = AccountState::of(Some(account));
        let effects = self.reducer.reduce(&mut state, AccountAction::LogIn(context), &self.env);
        if let Some(rejection) = state.rejection.take() {
            metrics::counter!("logins_total", "outcome" => "inactive").increment(1);
            return Err(rejection.into());
        }
        let account = state.account.ok_or(AccountRejection::NotFound)?;
        self.repository.update(&account).await?;
        self.executor.run(effects).await;

        metrics::counter!("logins_total", "outcome" => "success").increment(1);
        tracing::info!(user_id = account.id, role = %account.role, "User logged in");
        let token = self.jwt.issue(&account.principal(), self.env.clock.now())?;
        Ok(Session { token, user: account })
    }

    /// One account.
    ///
    /// # Errors
    ///
    /// [`AccountRejection::NotFound`] or a storage error.
    pub async fn find(&self, id: i64) -> Result<Account> {
        Ok(self.repository.find(id).await?.ok_or(AccountRejection::NotFound)?)
    }

    /// Every account, for other services.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn all(&self) -> Result<Vec<Account>> {
        Ok(self.repository.all().await?)
    }

    /// Activate or deactivate. Deactivation announces `USER_DELETED`.
    ///
    /// # Errors
    ///
    /// [`AccountRejection::NotFound`] or a storage error.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<Account> {
        let current = self.repository.find(id).await?;
        let mut state = AccountState::of(current.clone());
        let effects = self.reducer.reduce(&mut state, AccountAction::SetActive { active }, &self.env);
        if let Some(rejection) = state.rejection.take() {
            return Err(rejection.into());
        }
        let account = state.account.ok_or(AccountRejection::NotFound)?;
        if current.as_ref() != Some(&account) {
            self.repository.update(&account).await?;
            tracing::info!(user_id = id, active, "Account status changed");
        }
        self.executor.run(effects).await;
        Ok(account)
    }

    async fn open(
        &self,
        name: String,
        surname: String,
        email: &str,
        password: String,
        role: Role,
    ) -> Result<Session> {
        let email = normalize_email(email);
        if let Some(existing) = self.repository.find_by_email(&email).await? {
            return Err(AccountRejection::EmailTaken(existing.email).into());
        }

        let password_hash = self.hasher.hash_async(password).await?;
        let now = self.env.clock.now();
        let account = Account {
            id: self.repository.next_id().await?,
            email,
            password_hash,
            name: name.trim().to_string(),
            surname: surname.trim().to_string(),
            role,
            active: true,
            profile_complete: role != Role::Client,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        let mut state = AccountState::default();
        let effects = self.reducer.reduce(&mut state, AccountAction::Open(account), &self.env);
        if let Some(rejection) = state.rejection.take() {
            return Err(rejection.into());
        }
        let account = state.account.ok_or(AccountRejection::NotFound)?;
        match self.repository.insert(&account).await {
            Ok(()) => {},
            Err(RepositoryError::UniqueViolation(_)) => {
                return Err(AccountRejection::EmailTaken(account.email).into());
            },
            Err(error) => return Err(error.into()),
        }
        self.executor.run(effects).await;

        metrics::counter!("accounts_created_total", "role" => account.role.as_str()).increment(1);
        tracing::info!(user_id = account.id, role = %account.role, "Account created");
        let token = self.jwt.issue(&account.principal(), now)?;
        Ok(Session { token, user: account })
    }
}

/// Emails compare case-insensitively and without surrounding blanks.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Tokens are checked against the signature and against the live account,
/// so a deactivated user is refused even with an unexpired token.
#[async_trait]
impl TokenValidator for Accounts {
    async fn validate(&self, token: &str) -> dentalbook_auth::Result<AuthenticatedUser> {
        let claims = self.jwt.verify(token)?;
        let account = self
            .repository
            .find(claims.id)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .ok_or_else(|| AuthError::InvalidToken("account no longer exists".to_string()))?;
        if !account.active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(account.principal())
    }
}

/// Settle an action the executor fed back. Returns the rejection, if the
/// reducer refused it, after logging it.
fn feed_back(action: AccountAction, env: &AccountEnvironment) -> Option<AccountRejection> {
    let mut state = AccountState::default();
    let effects = AccountReducer::new().reduce(&mut state, action, env);
    if !effects.is_empty() {
        tracing::warn!(count = effects.len(), "Dropping effects of a fed-back account action");
    }
    if let Some(rejection) = &state.rejection {
        tracing::warn!(reason = %rejection, "Fed-back account action was rejected");
    }
    state.rejection
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{AUTH_TOPIC, USER_TOPIC};
    use crate::repository::InMemoryAccountRepository;
    use dentalbook_auth::AuthConfig;
    use dentalbook_core::event::EventEnvelope;
    use dentalbook_testing::clock_at;
    use dentalbook_testing::mocks::InMemoryEventBus;

    pub(crate) struct Harness {
        pub(crate) accounts: Accounts,
        pub(crate) repository: InMemoryAccountRepository,
        pub(crate) bus: Arc<InMemoryEventBus>,
    }

    /// Clock fixed at 2025-06-02T12:00:00Z. Tokens it issues are already
    /// expired by the wall clock; use [`Harness::fresh_token`] to validate.
    pub(crate) fn harness() -> Harness {
        let bus = Arc::new(InMemoryEventBus::new());
        let repository = InMemoryAccountRepository::new();
        let env = AccountEnvironment::new(Arc::new(clock_at("2025-06-02T12:00:00Z")), bus.clone());
        let config = AuthConfig::for_tests();
        Harness {
            accounts: Accounts::new(
                Arc::new(repository.clone()),
                PasswordHasher::new(config.bcrypt_cost),
                JwtService::new(&config),
                env,
            ),
            repository,
            bus,
        }
    }

    impl Harness {
        /// A token for `account` issued now by the wall clock.
        pub(crate) fn fresh_token(&self, account: &Account) -> String {
            JwtService::new(&AuthConfig::for_tests())
                .issue(&account.principal(), chrono::Utc::now())
                .unwrap()
        }
    }

    pub(crate) fn registration(email: &str, password: &str, confirmation: &str) -> Registration {
        Registration {
            name: "Ana".to_string(),
            surname: "Ruiz".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirmation.to_string(),
        }
    }

    fn context() -> LoginContext {
        LoginContext {
            ip: "203.0.113.1".to_string(),
            user_agent: "curl/8".to_string(),
        }
    }

    fn credentials(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn fed_back_actions_report_rejections() {
        let h = harness();

        assert_eq!(
            feed_back(AccountAction::SetActive { active: false }, &h.accounts.env),
            Some(AccountRejection::NotFound)
        );
        let lost = AccountAction::PublishFailed {
            event_type: "USER_LOGIN".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(feed_back(lost, &h.accounts.env), None);
    }

    #[tokio::test]
    async fn registration_creates_a_client_and_announces_it() {
        let h = harness();

        let session = h
            .accounts
            .register(registration(" Ana@Example.com ", "secret1", "secret1"))
            .await
            .unwrap();
        assert_eq!(session.user.id, 1);
        assert_eq!(session.user.email, "ana@example.com");
        assert_eq!(session.user.role, Role::Client);
        assert!(!session.user.profile_complete);
        assert!(!session.token.is_empty());

        let published = h.bus.published(USER_TOPIC);
        assert_eq!(published.len(), 1);
        let envelope = EventEnvelope::from_serialized(&published[0]).unwrap();
        assert_eq!(envelope.event_type, "USER_CREATED");
        assert_eq!(envelope.data["id"], 1);
        assert_eq!(envelope.data["email"], "ana@example.com");
    }

    #[tokio::test]
    async fn registration_rejects_bad_passwords_and_taken_emails() {
        let h = harness();

        assert!(matches!(
            h.accounts.register(registration("ana@example.com", "secret1", "secret2")).await,
            Err(AccountError::Rejected(AccountRejection::Invalid { field: "confirmPassword", .. }))
        ));
        assert!(matches!(
            h.accounts.register(registration("ana@example.com", "abc", "abc")).await,
            Err(AccountError::Rejected(AccountRejection::Invalid { field: "password", .. }))
        ));

        h.accounts
            .register(registration("ana@example.com", "secret1", "secret1"))
            .await
            .unwrap();
        assert!(matches!(
            h.accounts.register(registration("ANA@example.com", "secret1", "secret1")).await,
            Err(AccountError::Rejected(AccountRejection::EmailTaken(_)))
        ));
        assert_eq!(h.bus.published_types(USER_TOPIC), vec!["USER_CREATED"]);
    }

    #[tokio::test]
    async fn staff_accounts_start_complete() {
        let h = harness();
        let session = h
            .accounts
            .create_user(NewUser {
                name: "Lucía".to_string(),
                surname: "Mora".to_string(),
                email: "lucia@example.com".to_string(),
                password: "secret1".to_string(),
                role: Some(Role::Practitioner),
            })
            .await
            .unwrap();
        assert_eq!(session.user.role, Role::Practitioner);
        assert!(session.user.profile_complete);
    }

    #[tokio::test]
    async fn login_checks_credentials_then_status() {
        let h = harness();
        let id = h
            .accounts
            .register(registration("ana@example.com", "secret1", "secret1"))
            .await
            .unwrap()
            .user
            .id;

        assert!(matches!(
            h.accounts.login(credentials("nobody@example.com", "secret1"), context()).await,
            Err(AccountError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            h.accounts.login(credentials("ana@example.com", "wrong!!"), context()).await,
            Err(AccountError::Auth(AuthError::InvalidCredentials))
        ));

        let session = h.accounts.login(credentials("ana@example.com", "secret1"), context()).await.unwrap();
        assert!(session.user.last_login.is_some());
        assert!(h.accounts.find(id).await.unwrap().last_login.is_some());
        let logins = h.bus.published(AUTH_TOPIC);
        let envelope = EventEnvelope::from_serialized(&logins[0]).unwrap();
        assert_eq!(envelope.event_type, "USER_LOGIN");
        assert_eq!(envelope.data["userId"], id);
        assert_eq!(envelope.data["ip"], "203.0.113.1");

        h.accounts.set_active(id, false).await.unwrap();
        assert!(matches!(
            h.accounts.login(credentials("ana@example.com", "secret1"), context()).await,
            Err(AccountError::Rejected(AccountRejection::Inactive))
        ));
    }

    #[tokio::test]
    async fn status_changes_publish_delete_or_update() {
        let h = harness();
        let id = h
            .accounts
            .register(registration("ana@example.com", "secret1", "secret1"))
            .await
            .unwrap()
            .user
            .id;

        assert!(!h.accounts.set_active(id, false).await.unwrap().active);
        assert!(!h.accounts.set_active(id, false).await.unwrap().active);
        assert!(h.accounts.set_active(id, true).await.unwrap().active);
        assert_eq!(
            h.bus.published_types(USER_TOPIC),
            vec!["USER_CREATED", "USER_DELETED", "USER_UPDATED"]
        );
        assert!(matches!(
            h.accounts.set_active(404, false).await,
            Err(AccountError::Rejected(AccountRejection::NotFound))
        ));
    }

    #[tokio::test]
    async fn tokens_of_deactivated_accounts_are_refused() {
        let h = harness();
        let account = h
            .accounts
            .register(registration("ana@example.com", "secret1", "secret1"))
            .await
            .unwrap()
            .user;
        let token = h.fresh_token(&account);

        assert_eq!(h.accounts.validate(&token).await.unwrap().id, account.id);
        h.accounts.set_active(account.id, false).await.unwrap();
        assert_eq!(h.accounts.validate(&token).await, Err(AuthError::AccountDisabled));
        assert!(matches!(h.accounts.validate("garbage").await, Err(AuthError::InvalidToken(_))));
    }
}
