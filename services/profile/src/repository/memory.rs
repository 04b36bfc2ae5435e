//! In-memory profile store for tests and local runs.

use super::{EMAIL_CONSTRAINT, ID_CONSTRAINT, NATIONAL_ID_CONSTRAINT, ProfileRepository, Result};
use crate::types::{Page, Pagination, Profile, ProfileFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_postgres::RepositoryError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// [`ProfileRepository`] backed by a `BTreeMap`, enforcing the same unique
/// constraints as the `profiles` table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProfileRepository {
    profiles: Arc<RwLock<BTreeMap<i64, Profile>>>,
}

impl InMemoryProfileRepository {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile directly.
    pub async fn seed(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.id, profile);
    }

    /// Every stored profile
    pub async fn all(&self) -> Vec<Profile> {
        self.profiles.read().await.values().cloned().collect()
    }

    fn check_unique(profiles: &BTreeMap<i64, Profile>, profile: &Profile) -> Result<()> {
        for other in profiles.values().filter(|other| other.id != profile.id) {
            if other.email == profile.email {
                return Err(RepositoryError::UniqueViolation(EMAIL_CONSTRAINT.to_string()));
            }
            if profile.national_id.is_some() && other.national_id == profile.national_id {
                return Err(RepositoryError::UniqueViolation(NATIONAL_ID_CONSTRAINT.to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn find(&self, id: i64) -> Result<Option<Profile>> {
        Ok(self.profiles.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Profile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .find(|profile| profile.email == email)
            .cloned())
    }

    async fn insert(&self, profile: &Profile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.id) {
            return Err(RepositoryError::UniqueViolation(ID_CONSTRAINT.to_string()));
        }
        Self::check_unique(&profiles, profile)?;
        profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update(&self, profile: &Profile, expected: DateTime<Utc>) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        match profiles.get(&profile.id) {
            Some(stored) if stored.updated_at == expected => {},
            _ => return Ok(false),
        }
        Self::check_unique(&profiles, profile)?;
        profiles.insert(profile.id, profile.clone());
        Ok(true)
    }

    async fn list(&self, filter: &ProfileFilter) -> Result<Page<Profile>> {
        let profiles = self.profiles.read().await;
        let mut matching: Vec<&Profile> = profiles.values().filter(|p| filter.matches(p)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit.max(1) as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            pagination: Pagination::new(filter.page, filter.limit, total),
        })
    }

    async fn by_role(&self, role: Role, active: bool) -> Result<Vec<Profile>> {
        let mut found: Vec<Profile> = self
            .profiles
            .read()
            .await
            .values()
            .filter(|p| p.role == role && p.active == active)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.surname.cmp(&b.surname)));
        Ok(found)
    }

    async fn ping(&self) -> bool {
        true
    }
}
