//! Account storage.

mod memory;
mod postgres;

pub use memory::InMemoryAccountRepository;
pub use postgres::PostgresAccountRepository;

use crate::types::Account;
use async_trait::async_trait;
use dentalbook_postgres::RepositoryError;

/// Result alias for storage operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Unique constraint on `email`
pub const EMAIL_CONSTRAINT: &str = "accounts_email_key";

/// Persistence for accounts.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Reserve the id for an account about to be opened
    async fn next_id(&self) -> Result<i64>;

    /// One account by id
    async fn find(&self, id: i64) -> Result<Option<Account>>;

    /// One account by email (exact match)
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Insert a new account.
    ///
    /// Fails with [`RepositoryError::UniqueViolation`] on a taken email.
    async fn insert(&self, account: &Account) -> Result<()>;

    /// Overwrite the mutable columns of an existing account
    async fn update(&self, account: &Account) -> Result<()>;

    /// Every account, by id
    async fn all(&self) -> Result<Vec<Account>>;

    /// Storage is reachable
    async fn ping(&self) -> bool;
}
