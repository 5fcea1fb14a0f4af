use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, instrument};

use crate::{
    errors::FlagError,
    metrics_consts::{ROLLOUT_FETCH_TIME, ROLLOUT_STORE_ERRORS_COUNTER},
    metrics_utils::{inc_error, timing_guard},
    redis::{Client as RedisClientTrait, CustomRedisError},
    rollouts::rollout_models::{NewRollout, Rollout, RolloutId},
};

/// Where rollouts are persisted. Implementations must return a flag's rollouts newest first.
#[async_trait]
pub trait RolloutStore: Send + Sync {
    async fn list_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError>;

    /// Stores the rollout, assigning its id and creation time.
    async fn insert_rollout(&self, new: NewRollout) -> Result<Rollout, FlagError>;
}

/// Newest `created_at` first; on equal timestamps the later insert (higher id) wins.
pub fn sort_newest_first(rollouts: &mut [Rollout]) {
    rollouts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[derive(Default)]
struct InMemoryState {
    next_id: RolloutId,
    rollouts: HashMap<String, Vec<Rollout>>,
}

/// A process-local store, for tests and for embedding without Redis.
#[derive(Clone, Default)]
pub struct InMemoryRolloutStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRolloutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, InMemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Inserts with an explicit creation time instead of now.
    pub fn insert_at(&self, new: NewRollout, created_at: DateTime<Utc>) -> Rollout {
        let mut state = self.lock_state();
        state.next_id += 1;
        let rollout = new.into_rollout(state.next_id, created_at);
        state
            .rollouts
            .entry(rollout.flag_id.clone())
            .or_default()
            .push(rollout.clone());
        rollout
    }
}

#[async_trait]
impl RolloutStore for InMemoryRolloutStore {
    async fn list_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError> {
        let mut rollouts = self
            .lock_state()
            .rollouts
            .get(flag_id)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut rollouts);
        Ok(rollouts)
    }

    async fn insert_rollout(&self, new: NewRollout) -> Result<Rollout, FlagError> {
        Ok(self.insert_at(new, Utc::now()))
    }
}

pub const DEFAULT_ROLLOUTS_KEY_PREFIX: &str = "rollout_flags:rollouts:";
const SEQUENCE_KEY: &str = "sequence";

/// Keeps each flag's rollouts in a sorted set of JSON members, scored by creation time in
/// milliseconds. Ids come from a shared counter under the same prefix.
pub struct RedisRolloutStore {
    client: Arc<dyn RedisClientTrait + Send + Sync>,
    key_prefix: String,
}

impl RedisRolloutStore {
    pub fn new(
        client: Arc<dyn RedisClientTrait + Send + Sync>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn rollouts_key(&self, flag_id: &str) -> String {
        format!("{}{}", self.key_prefix, flag_id)
    }

    pub fn sequence_key(&self) -> String {
        format!("{}{}", self.key_prefix, SEQUENCE_KEY)
    }

    async fn fetch_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError> {
        let key = self.rollouts_key(flag_id);

        let members = self
            .client
            .zrangebyscore(key.clone(), "-inf".to_string(), "+inf".to_string())
            .await
            .map_err(|e| store_error(e, "zrangebyscore", &key))?;

        let mut rollouts = members
            .iter()
            .map(|member| {
                serde_json::from_str::<Rollout>(member).map_err(|e| {
                    error!(key = %key, error = %e, "failed to parse stored rollout");
                    let err = FlagError::DataParsingError;
                    inc_error(ROLLOUT_STORE_ERRORS_COUNTER, &err);
                    err
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        sort_newest_first(&mut rollouts);
        Ok(rollouts)
    }
}

fn store_error(err: CustomRedisError, operation: &'static str, key: &str) -> FlagError {
    let flag_error = match err {
        CustomRedisError::Timeout => FlagError::TimeoutError,
        CustomRedisError::ParseError(_) => FlagError::DataParsingError,
        CustomRedisError::Redis(_) => FlagError::RedisUnavailable,
    };
    error!(operation, key, error = %err, "rollout store failure");
    inc_error(ROLLOUT_STORE_ERRORS_COUNTER, &flag_error);
    flag_error
}

#[async_trait]
impl RolloutStore for RedisRolloutStore {
    #[instrument(skip_all, fields(flag_id = %flag_id))]
    async fn list_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError> {
        let timer = timing_guard(ROLLOUT_FETCH_TIME, &[]);
        let result = self.fetch_rollouts(flag_id).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        timer.label("outcome", outcome).fin();
        result
    }

    #[instrument(skip_all, fields(flag_id = %new.flag_id))]
    async fn insert_rollout(&self, new: NewRollout) -> Result<Rollout, FlagError> {
        let sequence_key = self.sequence_key();
        let id = self
            .client
            .incr(sequence_key.clone())
            .await
            .map_err(|e| store_error(e, "incr", &sequence_key))?;

        let rollout = new.into_rollout(id, Utc::now());
        let member = serde_json::to_string(&rollout).map_err(|e| {
            error!(error = %e, "failed to serialize rollout");
            FlagError::DataParsingError
        })?;

        let key = self.rollouts_key(&rollout.flag_id);
        // Millisecond scores stay exact in an f64 for any realistic timestamp.
        let score = rollout.created_at.timestamp_millis() as f64;
        self.client
            .zadd(key.clone(), member, score)
            .await
            .map_err(|e| store_error(e, "zadd", &key))?;

        Ok(rollout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;
    use crate::subjects::subject_models::{IP_ADDRESS_SUBJECT, USER_SUBJECT};
    use crate::test_utils::rollout_factory;
    use chrono::{Duration, TimeZone};
    use metrics_util::debugging::DebuggingRecorder;

    fn ids(rollouts: &[Rollout]) -> Vec<RolloutId> {
        rollouts.iter().map(|rollout| rollout.id).collect()
    }

    #[test]
    fn test_sort_newest_first_breaks_ties_by_id() {
        let mut rollouts = vec![
            rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 10.0, 0),
            rollout_factory(3, "hello", IP_ADDRESS_SUBJECT, 10.0, 5),
            rollout_factory(2, "hello", IP_ADDRESS_SUBJECT, 10.0, 5),
            rollout_factory(4, "hello", IP_ADDRESS_SUBJECT, 10.0, -5),
        ];
        sort_newest_first(&mut rollouts);
        assert_eq!(ids(&rollouts), vec![3, 2, 1, 4]);
    }

    #[tokio::test]
    async fn test_in_memory_store_lists_newest_first() {
        let store = InMemoryRolloutStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store.insert_at(NewRollout::new("hello", IP_ADDRESS_SUBJECT), base);
        store.insert_at(
            NewRollout::new("hello", USER_SUBJECT),
            base + Duration::seconds(10),
        );
        store.insert_at(NewRollout::new("hello", IP_ADDRESS_SUBJECT), base);
        store.insert_at(NewRollout::new("other", IP_ADDRESS_SUBJECT), base);

        let rollouts = store.list_rollouts("hello").await.unwrap();
        assert_eq!(ids(&rollouts), vec![2, 3, 1]);
        assert!(rollouts.iter().all(|rollout| rollout.flag_id == "hello"));
        assert!(store.list_rollouts("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_insert_assigns_ids() {
        let store = InMemoryRolloutStore::new();
        let first = store
            .insert_rollout(NewRollout::new("hello", IP_ADDRESS_SUBJECT))
            .await
            .unwrap();
        let second = store
            .insert_rollout(NewRollout::new("hello", IP_ADDRESS_SUBJECT))
            .await
            .unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(first.enable_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_redis_store_round_trips_rollouts() {
        let client = MockRedisClient::new();
        let store = RedisRolloutStore::new(Arc::new(client.clone()), "test:");

        let first = store
            .insert_rollout(
                NewRollout::new("hello", IP_ADDRESS_SUBJECT)
                    .with_enable_percentage(20.0),
            )
            .await
            .unwrap();
        let second = store
            .insert_rollout(NewRollout::new("hello", USER_SUBJECT))
            .await
            .unwrap();

        let rollouts = store.list_rollouts("hello").await.unwrap();
        assert_eq!(ids(&rollouts), vec![second.id, first.id]);
        assert_eq!(rollouts[1], first);

        let ops: Vec<(String, String)> = client
            .get_calls()
            .into_iter()
            .map(|call| (call.op, call.key))
            .collect();
        assert_eq!(ops[0], ("incr".to_string(), "test:sequence".to_string()));
        assert_eq!(ops[1], ("zadd".to_string(), "test:hello".to_string()));
    }

    #[tokio::test]
    async fn test_redis_store_missing_flag_is_empty() {
        let store = RedisRolloutStore::new(Arc::new(MockRedisClient::new()), "test:");
        assert!(store.list_rollouts("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redis_store_orders_equal_timestamps_by_id() {
        let older = rollout_factory(7, "hello", IP_ADDRESS_SUBJECT, 0.0, 0);
        let newer = rollout_factory(8, "hello", IP_ADDRESS_SUBJECT, 100.0, 0);
        let score = older.created_at.timestamp_millis() as f64;
        let client = MockRedisClient::new()
            .zadd_raw("test:hello", &serde_json::to_string(&newer).unwrap(), score)
            .zadd_raw("test:hello", &serde_json::to_string(&older).unwrap(), score);

        let store = RedisRolloutStore::new(Arc::new(client), "test:");
        assert_eq!(ids(&store.list_rollouts("hello").await.unwrap()), vec![8, 7]);
    }

    #[tokio::test]
    async fn test_redis_store_maps_errors() {
        let client = MockRedisClient::new()
            .error_on("test:timeout", CustomRedisError::Timeout)
            .error_on(
                "test:down",
                CustomRedisError::from_redis_kind(redis::ErrorKind::IoError, "connection refused"),
            )
            .zadd_raw("test:garbage", "{not json", 1.0);
        let store = RedisRolloutStore::new(Arc::new(client), "test:");

        assert!(matches!(
            store.list_rollouts("timeout").await,
            Err(FlagError::TimeoutError)
        ));
        assert!(matches!(
            store.list_rollouts("down").await,
            Err(FlagError::RedisUnavailable)
        ));
        assert!(matches!(
            store.list_rollouts("garbage").await,
            Err(FlagError::DataParsingError)
        ));
    }

    #[test]
    fn test_redis_store_times_fetches_by_outcome() {
        let client = MockRedisClient::new().error_on("test:down", CustomRedisError::Timeout);
        let store = RedisRolloutStore::new(Arc::new(client), "test:");
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                assert!(store.list_rollouts("hello").await.is_ok());
                assert!(store.list_rollouts("down").await.is_err());
            })
        });

        let mut outcomes: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == ROLLOUT_FETCH_TIME)
            .flat_map(|(key, _, _, _)| {
                key.key()
                    .labels()
                    .filter(|label| label.key() == "outcome")
                    .map(|label| label.value().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        outcomes.sort();
        assert_eq!(outcomes, vec!["error", "success"]);
    }

    #[tokio::test]
    async fn test_redis_store_insert_fails_when_sequence_is_down() {
        let client = MockRedisClient::new().error_on("test:sequence", CustomRedisError::Timeout);
        let store = RedisRolloutStore::new(Arc::new(client.clone()), "test:");
        let result = store
            .insert_rollout(NewRollout::new("hello", IP_ADDRESS_SUBJECT))
            .await;
        assert!(matches!(result, Err(FlagError::TimeoutError)));
        assert!(client.get_calls().iter().all(|call| call.op != "zadd"));
    }
}
