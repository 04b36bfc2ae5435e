//! In-memory account store for tests and local runs.

use super::{AccountRepository, EMAIL_CONSTRAINT, Result};
use crate::types::Account;
use async_trait::async_trait;
use dentalbook_postgres::RepositoryError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// [`AccountRepository`] backed by a `BTreeMap`, with a sequence for ids.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccountRepository {
    accounts: Arc<RwLock<BTreeMap<i64, Account>>>,
    sequence: Arc<AtomicI64>,
}

impl InMemoryAccountRepository {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account directly, moving the sequence past it.
    pub async fn seed(&self, account: Account) {
        self.sequence.fetch_max(account.id, Ordering::SeqCst);
        self.accounts.write().await.insert(account.id, account);
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn next_id(&self) -> Result<i64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn find(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn insert(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|other| other.email == account.email) {
            return Err(RepositoryError::UniqueViolation(EMAIL_CONSTRAINT.to_string()));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(stored) = accounts.get_mut(&account.id) {
            *stored = account.clone();
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::tests::account;
    use dentalbook_auth::Role;

    #[tokio::test]
    async fn ids_continue_after_seeded_accounts() {
        let repository = InMemoryAccountRepository::new();
        repository.seed(account(10, Role::Admin)).await;

        assert_eq!(repository.next_id().await.unwrap(), 11);
        assert_eq!(repository.next_id().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn emails_are_unique() {
        let repository = InMemoryAccountRepository::new();
        repository.insert(&account(1, Role::Client)).await.unwrap();

        let mut clash = account(2, Role::Client);
        clash.email = "user1@example.com".to_string();
        assert!(matches!(
            repository.insert(&clash).await,
            Err(RepositoryError::UniqueViolation(constraint)) if constraint == EMAIL_CONSTRAINT
        ));
        assert_eq!(repository.all().await.unwrap().len(), 1);
    }
}
