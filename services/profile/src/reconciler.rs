//! Replication reconciler: keeps the profile replica in step with identity.
//!
//! Settlement rules:
//!
//! | Situation | Settlement |
//! |---|---|
//! | applied, unchanged, duplicate | ack |
//! | update/delete/login for an unknown user | ack (dropped, logged at `warn`) |
//! | malformed envelope or payload, invalid record | ack (dropped, logged at `error`) |
//! | storage or identity failure | nack, requeue |

use crate::events::Incoming;
use crate::service::{Profiles, Replicated};
use async_trait::async_trait;
use dentalbook_core::event::SerializedEvent;
use dentalbook_core::event_bus::Settlement;
use dentalbook_runtime::consumer::EventHandler;

/// [`EventHandler`] applying `user.events` and `auth.events` to the replica.
#[derive(Clone, Debug)]
pub struct Reconciler {
    profiles: Profiles,
}

impl Reconciler {
    /// Reconciler writing through `profiles`
    #[must_use]
    pub const fn new(profiles: Profiles) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &SerializedEvent) -> Settlement {
        let incoming = match Incoming::decode(event) {
            Ok(Some(incoming)) => incoming,
            Ok(None) => {
                tracing::trace!(event_type = %event.event_type, "Event not relevant to the replica");
                return Settlement::Ack;
            },
            Err(error) => {
                metrics::counter!("replication_events_total", "outcome" => "malformed").increment(1);
                tracing::error!(event_type = %event.event_type, error = %error, "Dropping malformed replication event");
                return Settlement::Ack;
            },
        };

        let event_type = incoming.event_type();
        let user_id = incoming.user_id();
        match self.profiles.replicate(incoming).await {
            Ok(outcome) => {
                metrics::counter!("replication_events_total", "outcome" => outcome.as_str()).increment(1);
                match &outcome {
                    Replicated::Applied => {
                        tracing::info!(event_type, user_id, "Replica updated");
                    },
                    Replicated::DroppedMissing => {
                        tracing::warn!(event_type, user_id, "No local replica for event, dropping it");
                    },
                    Replicated::Rejected(reason) => {
                        tracing::error!(event_type, user_id, reason = %reason, "Replication event can never apply, dropping it");
                    },
                    Replicated::Unchanged | Replicated::Duplicate => {
                        tracing::debug!(event_type, user_id, outcome = outcome.as_str(), "Replication event had no effect");
                    },
                }
                Settlement::Ack
            },
            Err(error) => {
                metrics::counter!("replication_events_total", "outcome" => "requeued").increment(1);
                tracing::warn!(event_type, user_id, error = %error, "Replication failed, requeueing");
                Settlement::Nack { requeue: true }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregates::ProfileEnvironment;
    use crate::events::tests::wire;
    use crate::repository::{InMemoryProfileRepository, ProfileRepository, Result as RepoResult};
    use crate::service::tests::{FakeAccounts, harness};
    use crate::types::{Page, Profile, ProfileFilter};
    use chrono::{DateTime, Utc};
    use dentalbook_auth::Role;
    use dentalbook_core::event_bus::EventBus;
    use dentalbook_postgres::RepositoryError;
    use dentalbook_runtime::consumer::EventConsumer;
    use dentalbook_testing::clock_at;
    use dentalbook_testing::mocks::InMemoryEventBus;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Storage that is always down.
    struct DownRepository;

    #[async_trait]
    impl ProfileRepository for DownRepository {
        async fn find(&self, _id: i64) -> RepoResult<Option<Profile>> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn find_by_email(&self, _email: &str) -> RepoResult<Option<Profile>> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn insert(&self, _profile: &Profile) -> RepoResult<()> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn update(&self, _profile: &Profile, _expected: DateTime<Utc>) -> RepoResult<bool> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn list(&self, _filter: &ProfileFilter) -> RepoResult<Page<Profile>> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn by_role(&self, _role: Role, _active: bool) -> RepoResult<Vec<Profile>> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn ping(&self) -> bool {
            false
        }
    }

    fn created(id: i64) -> SerializedEvent {
        wire(
            "USER_CREATED",
            json!({"id": id, "email": format!("user{id}@example.com"), "name": "Ana", "surname": "Ruiz", "role": "client", "profileComplete": false, "active": true}),
        )
    }

    #[tokio::test]
    async fn settles_by_outcome() {
        let h = harness();
        let reconciler = Reconciler::new(h.profiles.clone());

        assert_eq!(reconciler.handle(&created(5)).await, Settlement::Ack);
        assert_eq!(reconciler.handle(&created(5)).await, Settlement::Ack);
        assert_eq!(
            reconciler
                .handle(&wire("USER_UPDATED", json!({"id": 404, "name": "Eva"})))
                .await,
            Settlement::Ack
        );
        assert_eq!(
            reconciler
                .handle(&wire("USER_UPDATED", json!({"id": 5, "phone": "600123123"})))
                .await,
            Settlement::Ack
        );
        assert_eq!(h.profiles.find(5).await.unwrap().phone.as_deref(), Some("600123123"));
    }

    #[tokio::test]
    async fn reactivation_stamped_before_the_replica_changed_still_applies() {
        let h = harness();
        let reconciler = Reconciler::new(h.profiles.clone());

        reconciler.handle(&created(5)).await;
        reconciler.handle(&wire("USER_DELETED", json!({"userId": 5}))).await;
        assert!(!h.profiles.find(5).await.unwrap().active);

        let settlement = reconciler
            .handle(&wire(
                "USER_UPDATED",
                json!({"id": 5, "active": true, "updatedAt": "2025-06-02T10:00:00Z"}),
            ))
            .await;
        assert_eq!(settlement, Settlement::Ack);
        assert!(h.profiles.find(5).await.unwrap().active);
    }

    #[tokio::test]
    async fn malformed_events_are_dropped_not_requeued() {
        let h = harness();
        let reconciler = Reconciler::new(h.profiles.clone());

        let garbage = SerializedEvent::new("USER_CREATED".to_string(), b"not json".to_vec(), None);
        assert_eq!(reconciler.handle(&garbage).await, Settlement::Ack);
        assert_eq!(
            reconciler.handle(&wire("USER_CREATED", json!({"id": "five"}))).await,
            Settlement::Ack
        );
        assert!(h.repository.all().await.is_empty());
    }

    #[tokio::test]
    async fn storage_failures_are_requeued() {
        let env = ProfileEnvironment::new(
            Arc::new(clock_at("2025-06-02T12:00:00Z")),
            Arc::new(InMemoryEventBus::new()),
        );
        let profiles = Profiles::new(Arc::new(DownRepository), Arc::new(FakeAccounts), env);
        let reconciler = Reconciler::new(profiles);

        assert_eq!(
            reconciler.handle(&created(5)).await,
            Settlement::Nack { requeue: true }
        );
    }

    #[tokio::test]
    async fn consumer_replicates_from_the_bus() {
        dentalbook_testing::init_test_tracing();
        let bus = Arc::new(InMemoryEventBus::new());
        let repository = InMemoryProfileRepository::new();
        let env = ProfileEnvironment::new(Arc::new(clock_at("2025-06-02T12:00:00Z")), bus.clone());
        let profiles = Profiles::new(Arc::new(repository.clone()), Arc::new(FakeAccounts), env);
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

        let handle = EventConsumer::new(
            "profile-reconciler",
            vec!["user.events".to_string(), "auth.events".to_string()],
            bus.clone(),
            Arc::new(Reconciler::new(profiles)),
            shutdown_rx,
        )
        .spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.publish("user.events", &created(5)).await.unwrap();
        bus.publish(
            "auth.events",
            &wire("USER_LOGIN", json!({"userId": 5, "timestamp": "2025-06-02T08:00:00Z"})),
        )
        .await
        .unwrap();

        for _ in 0..50 {
            if repository.find(5).await.unwrap().is_some_and(|p| p.last_login.is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(repository.find(5).await.unwrap().unwrap().last_login.is_some());
        assert!(bus.settlements().iter().all(|record| record.settlement == Settlement::Ack));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
