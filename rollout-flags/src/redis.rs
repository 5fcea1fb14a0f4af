use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Builds a Redis error of the given kind, mostly for tests.
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }
}

/// The handful of sorted-set and counter commands the rollout store needs.
#[async_trait]
pub trait Client {
    async fn zrangebyscore(
        &self,
        k: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError>;

    async fn zadd(&self, k: String, member: String, score: f64) -> Result<(), CustomRedisError>;

    async fn incr(&self, k: String) -> Result<i64, CustomRedisError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connects eagerly. `timeout` applies to both connecting and every command response;
    /// `None` blocks indefinitely.
    pub async fn new(
        addr: String,
        timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = timeout.filter(|timeout| !timeout.is_zero()) {
            config = config
                .set_response_timeout(timeout)
                .set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn zrangebyscore(
        &self,
        k: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let results = conn.zrangebyscore(k, min, max).await?;
        Ok(results)
    }

    async fn zadd(&self, k: String, member: String, score: f64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.zadd(k, member, score).await?;
        Ok(())
    }

    async fn incr(&self, k: String) -> Result<i64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(k, 1).await?;
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub enum MockRedisValue {
    None,
    MinMax(String, String),
    Member(String, f64),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[derive(Default)]
struct MockState {
    sorted_sets: HashMap<String, Vec<(f64, String)>>,
    counters: HashMap<String, i64>,
    calls: Vec<MockRedisCall>,
}

/// An in-memory stand-in that actually keeps sorted sets and counters, so a store can be
/// exercised end to end. Errors can be injected per key.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
    errors: HashMap<String, CustomRedisError>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every command touching `key` fails with `err` from now on.
    pub fn error_on(&mut self, key: &str, err: CustomRedisError) -> Self {
        self.errors.insert(key.to_owned(), err);
        self.clone()
    }

    /// Seeds a raw sorted-set member, bypassing any encoding the caller would do.
    pub fn zadd_raw(&mut self, key: &str, member: &str, score: f64) -> Self {
        let mut state = self.lock_state();
        insert_member(&mut state, key, member.to_string(), score);
        drop(state);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_state().calls.clone()
    }

    fn record(&self, state: &mut MockState, op: &str, key: &str, value: MockRedisValue) {
        state.calls.push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn check_error(&self, key: &str) -> Result<(), CustomRedisError> {
        match self.errors.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn insert_member(state: &mut MockState, key: &str, member: String, score: f64) {
    let set = state.sorted_sets.entry(key.to_string()).or_default();
    set.retain(|(_, existing)| *existing != member);
    set.push((score, member));
    set.sort_by(|(a_score, a), (b_score, b)| a_score.total_cmp(b_score).then_with(|| a.cmp(b)));
}

fn parse_bound(bound: &str) -> Result<f64, CustomRedisError> {
    match bound {
        "-inf" => Ok(f64::NEG_INFINITY),
        "+inf" | "inf" => Ok(f64::INFINITY),
        other => other
            .parse()
            .map_err(|_| CustomRedisError::ParseError(format!("invalid score bound `{other}`"))),
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn zrangebyscore(
        &self,
        key: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut state = self.lock_state();
        self.record(
            &mut state,
            "zrangebyscore",
            &key,
            MockRedisValue::MinMax(min.clone(), max.clone()),
        );
        self.check_error(&key)?;

        let (min, max) = (parse_bound(&min)?, parse_bound(&max)?);
        Ok(state
            .sorted_sets
            .get(&key)
            .map(|set| {
                set.iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zadd(&self, key: String, member: String, score: f64) -> Result<(), CustomRedisError> {
        let mut state = self.lock_state();
        self.record(
            &mut state,
            "zadd",
            &key,
            MockRedisValue::Member(member.clone(), score),
        );
        self.check_error(&key)?;

        insert_member(&mut state, &key, member, score);
        Ok(())
    }

    async fn incr(&self, key: String) -> Result<i64, CustomRedisError> {
        let mut state = self.lock_state();
        self.record(&mut state, "incr", &key, MockRedisValue::None);
        self.check_error(&key)?;

        let counter = state.counters.entry(key).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sorted_set_orders_by_score() {
        let client = MockRedisClient::new();
        client.zadd("k".to_string(), "b".to_string(), 2.0).await.unwrap();
        client.zadd("k".to_string(), "a".to_string(), 1.0).await.unwrap();
        client.zadd("k".to_string(), "c".to_string(), 3.0).await.unwrap();

        let all = client
            .zrangebyscore("k".to_string(), "-inf".to_string(), "+inf".to_string())
            .await
            .unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let bounded = client
            .zrangebyscore("k".to_string(), "2".to_string(), "+inf".to_string())
            .await
            .unwrap();
        assert_eq!(bounded, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_missing_key_is_empty() {
        let client = MockRedisClient::new();
        let members = client
            .zrangebyscore("nope".to_string(), "-inf".to_string(), "+inf".to_string())
            .await
            .unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn test_mock_incr_counts_per_key() {
        let client = MockRedisClient::new();
        assert_eq!(client.incr("a".to_string()).await.unwrap(), 1);
        assert_eq!(client.incr("a".to_string()).await.unwrap(), 2);
        assert_eq!(client.incr("b".to_string()).await.unwrap(), 1);
        assert_eq!(client.get_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_injected_errors() {
        let client = MockRedisClient::new().error_on("k", CustomRedisError::Timeout);
        let result = client.incr("k".to_string()).await;
        assert!(matches!(result, Err(CustomRedisError::Timeout)));
        assert_eq!(client.get_calls()[0].op, "incr");
    }

    #[test]
    fn test_timeout_errors_are_mapped() {
        let err: CustomRedisError =
            redis::RedisError::from(std::io::Error::from(std::io::ErrorKind::TimedOut)).into();
        assert!(matches!(err, CustomRedisError::Timeout));

        let err =
            CustomRedisError::from_redis_kind(redis::ErrorKind::IoError, "connection refused");
        assert!(matches!(err, CustomRedisError::Redis(_)));
    }
}
