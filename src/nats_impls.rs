//! NATS-backed collaborators: JetStream KV lease store, core-NATS event
//! publishing, and queue-job dispatch.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::SchedError;
use crate::task::JobDescriptor;
use crate::traits::{JobQueue, LockStore, Notifier, TaskEvent};

/// KV bucket holding both leader and overlap leases. The key namespaces are
/// disjoint (`scheduler-leader-lock` vs `overlap.*`), so one bucket serves
/// both without collisions.
pub const LOCK_BUCKET: &str = "chime_locks";

/// Subject prefix for lifecycle events (`chime.task.starting` etc.).
pub const EVENT_SUBJECT_PREFIX: &str = "chime.task.";

/// Subject prefix for queue-job dispatch (`chime.jobs.<name>`).
pub const JOBS_SUBJECT_PREFIX: &str = "chime.jobs.";

/// Lease store over a JetStream KV bucket.
///
/// KV TTLs are bucket-wide, but leases here need per-key TTLs (a 55s leader
/// lease next to multi-hour overlap leases), so the expiry deadline travels
/// in the value: an entry whose deadline has passed counts as absent and is
/// taken over with a CAS update on its revision, keeping acquisition atomic
/// between contenders.
#[derive(Clone)]
pub struct NatsLockStore {
    store: kv::Store,
}

impl NatsLockStore {
    /// Ensure the lock bucket exists and wrap it.
    pub async fn connect(js: &jetstream::Context) -> Result<Self, SchedError> {
        let config = kv::Config { bucket: LOCK_BUCKET.to_string(), history: 1, ..Default::default() };
        let store = match js.create_key_value(config).await {
            Ok(store) => store,
            Err(_) => js
                .get_key_value(LOCK_BUCKET)
                .await
                .map_err(|e| SchedError::Lock(e.to_string()))?,
        };
        Ok(Self { store })
    }

    /// Wrap an existing KV bucket.
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }
}

fn deadline_value(ttl: Duration) -> Bytes {
    (Utc::now() + ttl).to_rfc3339().into_bytes().into()
}

fn lease_is_live(value: &[u8]) -> bool {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|deadline| deadline > Utc::now())
}

impl LockStore for NatsLockStore {
    type Error = SchedError;

    async fn acquire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, SchedError> {
        let value = deadline_value(ttl);
        // `create` is atomic "set if not exists"; the common case ends here.
        if self.store.create(key, value.clone()).await.is_ok() {
            return Ok(true);
        }

        let entry =
            self.store.entry(key).await.map_err(|e| SchedError::Lock(e.to_string()))?;
        match entry {
            Some(e) if e.operation == kv::Operation::Put => {
                if lease_is_live(&e.value) {
                    Ok(false)
                } else {
                    // Expired lease: CAS on the stale revision so only one
                    // contender can take it over.
                    Ok(self.store.update(key, value, e.revision).await.is_ok())
                }
            }
            // Delete/purge marker or a raced removal: retry the atomic create.
            _ => Ok(self.store.create(key, value).await.is_ok()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, SchedError> {
        let entry =
            self.store.entry(key).await.map_err(|e| SchedError::Lock(e.to_string()))?;
        Ok(matches!(
            entry,
            Some(e) if e.operation == kv::Operation::Put && lease_is_live(&e.value)
        ))
    }

    async fn release(&self, key: &str) -> Result<(), SchedError> {
        self.store.delete(key).await.map(|_| ()).map_err(|e| SchedError::Lock(e.to_string()))
    }
}

/// Publishes lifecycle events as JSON to `chime.task.<kind>`.
impl Notifier for async_nats::Client {
    type Error = SchedError;

    async fn publish_event(&self, event: &TaskEvent) -> Result<(), SchedError> {
        let subject = format!("{EVENT_SUBJECT_PREFIX}{}", event.event.as_subject());
        let payload = serde_json::to_vec(event)?;
        self.publish(subject, payload.into())
            .await
            .map_err(|e| SchedError::Publish(e.to_string()))
    }
}

/// Dispatches queue jobs as JSON to `chime.jobs.<name>`, fire-and-forget.
impl JobQueue for async_nats::Client {
    type Error = SchedError;

    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), SchedError> {
        let subject = format!("{JOBS_SUBJECT_PREFIX}{}", job.name);
        let payload = serde_json::to_vec(job)?;
        self.publish(subject, payload.into())
            .await
            .map_err(|e| SchedError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_lease_has_a_future_deadline() {
        let value = deadline_value(Duration::from_secs(60));
        assert!(lease_is_live(&value));
    }

    #[test]
    fn expired_deadline_is_not_live() {
        let past = (Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
        assert!(!lease_is_live(past.as_bytes()));
    }

    #[test]
    fn garbage_value_is_not_live() {
        assert!(!lease_is_live(b"not-a-timestamp"));
        assert!(!lease_is_live(&[0xff, 0xfe]));
    }
}
