//! The counter engine.
//!
//! All coordination happens in the backend: either through its atomic
//! field increment or through versioned conditional writes retried with
//! backoff. The engine itself keeps no mutable state, so one instance can
//! be shared by any number of concurrent callers.
//!
//! # Cancellation
//!
//! Dropping an operation's future stops it; nothing is retried on the
//! caller's behalf afterwards. A write may still have been applied by the
//! backend before the drop, so the outcome of a cancelled call is unknown
//! and should be settled with [`CounterEngine::fetch`].

use crate::codec::{self, CAMPAIGNS_ATTRIBUTE};
use crate::{Error, MAX_COUNT, Result, RetryPolicy, SessionRecord, SessionSnapshot};
use store::{Backend, CollectionInfo, Item, PutOutcome};

/// How increments are made safe against concurrent writers.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateStrategy {
    /// Use the backend's atomic field increment.
    Atomic,
    /// Read the record, write it back conditionally on its version, and
    /// retry conflicts according to the policy.
    Optimistic(RetryPolicy),
    /// `Atomic` when the backend supports it, otherwise `Optimistic` with
    /// the given policy.
    Auto(RetryPolicy),
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self::Auto(RetryPolicy::default())
    }
}

/// Outcome of a successful increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    /// The campaign's count after this increment.
    pub count: u64,
    /// The session as read after the increment.
    pub snapshot: SessionSnapshot,
}

/// Increments, removes and reads per-session campaign counters.
pub struct CounterEngine<B> {
    backend: B,
    strategy: UpdateStrategy,
}

impl<B: Backend> CounterEngine<B> {
    /// Create an engine over `backend`. `Auto` is resolved here.
    pub fn new(backend: B, strategy: UpdateStrategy) -> Self {
        let strategy = match strategy {
            UpdateStrategy::Auto(_) if backend.supports_atomic_increment() => {
                UpdateStrategy::Atomic
            }
            UpdateStrategy::Auto(policy) => UpdateStrategy::Optimistic(policy),
            other => other,
        };
        Self { backend, strategy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn strategy(&self) -> &UpdateStrategy {
        &self.strategy
    }

    /// Create the backing collection if it does not exist yet.
    pub async fn setup(&self) -> Result<()> {
        self.backend.ensure_collection().await?;
        Ok(())
    }

    /// Add one to the count of `campaign_id` in `session_id`, creating the
    /// session record and the campaign entry as needed.
    pub async fn increment(&self, session_id: &str, campaign_id: &str) -> Result<Increment> {
        validate_id("session id", session_id)?;
        validate_id("campaign id", campaign_id)?;

        match &self.strategy {
            UpdateStrategy::Optimistic(policy) => {
                self.increment_optimistic(session_id, campaign_id, policy)
                    .await
            }
            _ => self.increment_atomic(session_id, campaign_id).await,
        }
    }

    async fn increment_atomic(&self, session_id: &str, campaign_id: &str) -> Result<Increment> {
        let path = codec::campaign_path(campaign_id)?;
        let count = self
            .backend
            .increment_field_checked(session_id, &path, 1, check_record)
            .await
            .map_err(|e| match e {
                store::Error::Overflow { .. } => overflow(session_id, campaign_id),
                other => other.into(),
            })?;
        let count = u64::try_from(count).map_err(|_| {
            Error::CorruptRecord(format!(
                "session {session_id:?}: campaign {campaign_id:?} went negative"
            ))
        })?;

        let snapshot = self
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id));
        Ok(Increment { count, snapshot })
    }

    async fn increment_optimistic(
        &self,
        session_id: &str,
        campaign_id: &str,
        policy: &RetryPolicy,
    ) -> Result<Increment> {
        let mut attempts = 0;
        loop {
            attempts += 1;

            let (mut item, mut record, expected) = match self.backend.get(session_id).await? {
                Some(stored) => {
                    let record = codec::decode(&stored.item)?;
                    (stored.item, record, Some(stored.version))
                }
                None => (
                    codec::encode(&SessionRecord::new(session_id)),
                    SessionRecord::new(session_id),
                    None,
                ),
            };

            let count = record
                .count(campaign_id)
                .checked_add(1)
                .filter(|count| *count <= MAX_COUNT)
                .ok_or_else(|| overflow(session_id, campaign_id))?;
            record.campaigns.insert(campaign_id.to_string(), count);
            // Only the campaign map is replaced; other attributes are written back as read.
            item.insert(
                CAMPAIGNS_ATTRIBUTE.to_string(),
                codec::encode_campaigns(&record.campaigns),
            );

            match self
                .backend
                .conditional_put(session_id, item, expected)
                .await?
            {
                PutOutcome::Written(_) => {
                    return Ok(Increment {
                        count,
                        snapshot: record,
                    });
                }
                PutOutcome::VersionConflict if attempts >= policy.max_attempts => {
                    return Err(Error::Conflict { attempts });
                }
                PutOutcome::VersionConflict => {
                    tokio::time::sleep(policy.delay_for_attempt(attempts - 1)).await;
                }
            }
        }
    }

    /// Delete `campaign_id` from `session_id`. Removing an absent campaign
    /// is a no-op; an unknown session yields an empty snapshot.
    pub async fn remove(&self, session_id: &str, campaign_id: &str) -> Result<SessionSnapshot> {
        validate_id("session id", session_id)?;
        validate_id("campaign id", campaign_id)?;

        let path = codec::campaign_path(campaign_id)?;
        self.backend.remove_field(session_id, &path).await?;

        Ok(self
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id)))
    }

    /// Read a session. Fails with [`Error::NotFound`] if no record exists;
    /// a record whose campaigns were all removed is returned empty.
    pub async fn fetch(&self, session_id: &str) -> Result<SessionSnapshot> {
        validate_id("session id", session_id)?;

        self.load(session_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Drop every session record and recreate the empty collection.
    pub async fn reset_store(&self) -> Result<()> {
        self.backend.drop_collection().await?;
        self.backend.ensure_collection().await?;
        Ok(())
    }

    /// Describe the backing collection.
    pub async fn describe(&self) -> Result<CollectionInfo> {
        Ok(self.backend.describe_collection().await?)
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        match self.backend.get(session_id).await? {
            Some(stored) => Ok(Some(codec::decode(&stored.item)?)),
            None => Ok(None),
        }
    }
}

fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    if id.chars().any(char::is_control) {
        return Err(Error::InvalidArgument(format!(
            "{what} {id:?} contains control characters"
        )));
    }
    Ok(())
}

/// Refuses to count into a record that does not decode.
fn check_record(item: &Item) -> store::Result<()> {
    match codec::decode(item) {
        Ok(_) => Ok(()),
        Err(Error::CorruptRecord(reason)) => Err(store::Error::Rejected(reason)),
        Err(other) => Err(store::Error::Rejected(other.to_string())),
    }
}

fn overflow(session_id: &str, campaign_id: &str) -> Error {
    Error::CounterOverflow {
        session_id: session_id.to_string(),
        campaign_id: campaign_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{AttributeValue, KEY_ATTRIBUTE, MemoryBackend};

    fn engines() -> Vec<CounterEngine<MemoryBackend>> {
        vec![
            CounterEngine::new(MemoryBackend::new(), UpdateStrategy::Atomic),
            CounterEngine::new(
                MemoryBackend::without_atomic_increment(),
                UpdateStrategy::default(),
            ),
        ]
    }

    fn seed(campaigns: &[(&str, AttributeValue)]) -> Item {
        let mut item = Item::new();
        item.insert(KEY_ATTRIBUTE.into(), AttributeValue::string("s1"));
        item.insert(
            CAMPAIGNS_ATTRIBUTE.into(),
            AttributeValue::M(
                campaigns
                    .iter()
                    .map(|(id, value)| (id.to_string(), value.clone()))
                    .collect(),
            ),
        );
        item
    }

    #[test]
    fn auto_follows_backend_capabilities() {
        let atomic = CounterEngine::new(MemoryBackend::new(), UpdateStrategy::default());
        assert_eq!(atomic.strategy(), &UpdateStrategy::Atomic);

        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let optimistic = CounterEngine::new(
            MemoryBackend::without_atomic_increment(),
            UpdateStrategy::Auto(policy.clone()),
        );
        assert_eq!(optimistic.strategy(), &UpdateStrategy::Optimistic(policy));
    }

    #[tokio::test]
    async fn rejects_empty_and_control_ids() {
        for engine in engines() {
            assert!(matches!(
                engine.increment("", "c1").await,
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(
                engine.increment("s1", "").await,
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(
                engine.remove("s1\n", "c1").await,
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(engine.fetch("").await, Err(Error::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn remove_on_unknown_session_returns_empty_without_creating() {
        for engine in engines() {
            let snapshot = engine.remove("ghost", "c1").await.unwrap();
            assert_eq!(snapshot, SessionRecord::new("ghost"));
            assert!(matches!(
                engine.fetch("ghost").await,
                Err(Error::NotFound { session_id }) if session_id == "ghost"
            ));
        }
    }

    #[tokio::test]
    async fn overflow_is_reported_not_wrapped() {
        for engine in engines() {
            let mut campaigns = Item::new();
            campaigns.insert("c1".into(), AttributeValue::number(i64::MAX));
            let mut item = Item::new();
            item.insert(KEY_ATTRIBUTE.into(), AttributeValue::string("s1"));
            item.insert(CAMPAIGNS_ATTRIBUTE.into(), AttributeValue::M(campaigns));
            engine.backend().conditional_put("s1", item, None).await.unwrap();

            assert!(matches!(
                engine.increment("s1", "c1").await,
                Err(Error::CounterOverflow { .. })
            ));
            assert_eq!(engine.fetch("s1").await.unwrap().count("c1"), MAX_COUNT);
        }
    }

    #[tokio::test]
    async fn corrupt_records_are_surfaced() {
        for engine in engines() {
            let mut item = Item::new();
            item.insert(KEY_ATTRIBUTE.into(), AttributeValue::string("s1"));
            item.insert(CAMPAIGNS_ATTRIBUTE.into(), AttributeValue::Bool(true));
            engine.backend().conditional_put("s1", item, None).await.unwrap();

            assert!(matches!(engine.fetch("s1").await, Err(Error::CorruptRecord(_))));
            assert!(matches!(
                engine.increment("s1", "c1").await,
                Err(Error::CorruptRecord(_))
            ));
        }
    }

    #[tokio::test]
    async fn negative_counts_are_reported_not_repaired() {
        for engine in engines() {
            let item = seed(&[("c1", AttributeValue::N("-1".into()))]);
            engine.backend().conditional_put("s1", item, None).await.unwrap();

            for _ in 0..2 {
                assert!(matches!(
                    engine.increment("s1", "c1").await,
                    Err(Error::CorruptRecord(_))
                ));
            }

            let stored = engine.backend().get("s1").await.unwrap().unwrap();
            assert_eq!(stored.version, 1);
            assert_eq!(
                stored.item[CAMPAIGNS_ATTRIBUTE].as_map().unwrap()["c1"],
                AttributeValue::N("-1".into())
            );
        }
    }

    #[tokio::test]
    async fn corrupt_sibling_blocks_increment_without_writing() {
        for engine in engines() {
            let item = seed(&[("c2", AttributeValue::string("x"))]);
            engine.backend().conditional_put("s1", item, None).await.unwrap();

            for _ in 0..2 {
                let err = engine.increment("s1", "c1").await.unwrap_err();
                assert!(matches!(err, Error::CorruptRecord(_)));
                assert!(!err.is_transient());
            }

            let stored = engine.backend().get("s1").await.unwrap().unwrap();
            assert_eq!(stored.version, 1);
            assert!(!stored.item[CAMPAIGNS_ATTRIBUTE].as_map().unwrap().contains_key("c1"));
        }
    }

    #[tokio::test]
    async fn optimistic_increment_preserves_unrelated_attributes() {
        let engine = CounterEngine::new(
            MemoryBackend::without_atomic_increment(),
            UpdateStrategy::default(),
        );
        let mut item = Item::new();
        item.insert("owner".into(), AttributeValue::string("ads-team"));
        engine.backend().conditional_put("s1", item, None).await.unwrap();

        engine.increment("s1", "c1").await.unwrap();

        let stored = engine.backend().get("s1").await.unwrap().unwrap();
        assert_eq!(stored.item["owner"], AttributeValue::string("ads-team"));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn reset_store_drops_sessions() {
        for engine in engines() {
            engine.increment("s1", "c1").await.unwrap();
            engine.increment("s2", "c1").await.unwrap();
            assert_eq!(engine.describe().await.unwrap().item_count, 2);

            engine.reset_store().await.unwrap();

            assert_eq!(engine.describe().await.unwrap().item_count, 0);
            assert!(matches!(engine.fetch("s1").await, Err(Error::NotFound { .. })));
        }
    }

    #[tokio::test]
    async fn operations_fail_cleanly_without_a_collection() {
        let engine = CounterEngine::new(MemoryBackend::new(), UpdateStrategy::Atomic);
        engine.backend().drop_collection().await.unwrap();

        let err = engine.increment("s1", "c1").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        engine.setup().await.unwrap();
        assert_eq!(engine.increment("s1", "c1").await.unwrap().count, 1);
    }
}
