//! Redis backend.
//!
//! Uses one multiplexed [`ConnectionManager`] that reconnects on its own.
//! Each operation checks out a cheap clone of the manager and drops it when
//! the operation finishes, on success and error paths alike. Every command is
//! bounded by `op_timeout`; a dead server surfaces as an error, never a hang
//! or a process abort.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use tracing::{debug, info, warn};

use crate::errors::{Result, StoreError};
use crate::{CasOutcome, SessionStore, ttl_secs};

/// Returns 1 on swap, 0 on mismatch, -1 when the key is absent.
const CAS_LUA: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
";

static CAS_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(CAS_LUA));

/// Connection settings for [`RedisStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    /// `host:port` of the Redis server.
    pub address: String,
    /// `AUTH` password, if the server requires one.
    pub password: Option<String>,
    /// Logical database index.
    pub database: i64,
    /// Deadline for establishing the initial connection.
    pub connect_timeout: Duration,
    /// Deadline for each individual command.
    pub op_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "redis-master:6379".into(),
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// `redis://[:password@]host:port/db`
    pub fn connection_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}/{}",
                encode_userinfo(password),
                self.address,
                self.database
            ),
            None => format!("redis://{}/{}", self.address, self.database),
        }
    }
}

/// Percent-encode characters that would break the userinfo part of a URL.
fn encode_userinfo(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// [`SessionStore`] over a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect to the configured server.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_url())?;
        let store = Self::with_client(client, config.connect_timeout, config.op_timeout).await?;
        info!(address = %config.address, database = config.database, "connected to redis");
        Ok(store)
    }

    /// Connect through an already-configured client.
    pub async fn with_client(
        client: redis::Client,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self> {
        let conn = match tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
        {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(StoreError::Timeout {
                    op: "connect",
                    millis: millis(connect_timeout),
                });
            }
        };
        Ok(Self { conn, op_timeout })
    }

    /// Run one command against a checked-out connection handle.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.conn.clone();
        match tokio::time::timeout(self.op_timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "redis command failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op, timeout_ms = millis(self.op_timeout), "redis command timed out");
                Err(StoreError::Timeout {
                    op,
                    millis: millis(self.op_timeout),
                })
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, key: &str) -> Result<String> {
        let value = self
            .run("get", |mut conn| async move {
                let value: Option<String> =
                    redis::cmd("GET").arg(key).query_async(&mut conn).await?;
                Ok(value)
            })
            .await?;
        value.ok_or_else(|| StoreError::NotFound { key: key.to_owned() })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run("exists", |mut conn| async move {
            let exists: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
            Ok(exists)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl_secs(ttl);
        self.run("set", |mut conn| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let secs = ttl_secs(ttl);
        let reply = self
            .run("set_nx", |mut conn| async move {
                // `SET .. NX` answers OK when written and nil otherwise.
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(secs)
                    .query_async(&mut conn)
                    .await?;
                Ok(reply)
            })
            .await?;
        debug!(key, written = reply.is_some(), "set_if_absent");
        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<CasOutcome> {
        let secs = ttl_secs(ttl);
        let code = self
            .run("cas", |mut conn| async move {
                let code: i64 = CAS_SCRIPT
                    .key(key)
                    .arg(expected)
                    .arg(new)
                    .arg(secs)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(code)
            })
            .await?;
        Ok(cas_outcome(code))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn cas_outcome(code: i64) -> CasOutcome {
    match code {
        1 => CasOutcome::Swapped,
        -1 => CasOutcome::Missing,
        _ => CasOutcome::Mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_without_password() {
        let cfg = RedisConfig {
            address: "localhost:6379".into(),
            ..RedisConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn url_with_password() {
        let cfg = RedisConfig {
            address: "redis-master:6379".into(),
            password: Some("s3cret".into()),
            database: 2,
            ..RedisConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://:s3cret@redis-master:6379/2");
    }

    #[test]
    fn empty_password_is_ignored() {
        let cfg = RedisConfig {
            password: Some(String::new()),
            ..RedisConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://redis-master:6379/0");
    }

    #[test]
    fn password_is_percent_encoded() {
        assert_eq!(encode_userinfo("p@ss:w/rd"), "p%40ss%3Aw%2Frd");
        assert_eq!(encode_userinfo("plain-_.~"), "plain-_.~");
    }

    #[test]
    fn default_config() {
        let cfg = RedisConfig::default();
        assert_eq!(cfg.address, "redis-master:6379");
        assert_eq!(cfg.op_timeout, Duration::from_secs(2));
    }

    #[test]
    fn cas_codes() {
        assert_eq!(cas_outcome(1), CasOutcome::Swapped);
        assert_eq!(cas_outcome(0), CasOutcome::Mismatch);
        assert_eq!(cas_outcome(-1), CasOutcome::Missing);
    }


    #[tokio::test]
    async fn connect_to_closed_port_fails_without_panicking() {
        let cfg = RedisConfig {
            address: "127.0.0.1:1".into(),
            connect_timeout: Duration::from_millis(500),
            ..RedisConfig::default()
        };
        assert!(RedisStore::connect(&cfg).await.is_err());
    }

    // Tests below run against a live server named by `REDIS_URL`
    // (e.g. `redis://127.0.0.1:6379/15`) and pass vacuously without one.

    async fn live_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty())?;
        let client = redis::Client::open(url).unwrap();
        let store = RedisStore::with_client(client, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap();
        Some(store)
    }

    fn unique_key(tag: &str) -> String {
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("huddle-test:{tag}:{}:{nanos}:{n}", std::process::id())
    }

    async fn server_ttl(store: &RedisStore, key: &str) -> i64 {
        let mut conn = store.conn.clone();
        redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn live_set_get_exists() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("get");
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(store.get(&key).await, Err(StoreError::NotFound { .. })));

        store.set(&key, "v1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), "v1");
        assert!(store.exists(&key).await.unwrap());
        let ttl = server_ttl(&store, &key).await;
        assert!((1..=60).contains(&ttl), "ttl {ttl}");
    }

    #[tokio::test]
    async fn live_set_if_absent_claims_once() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("claim");
        assert!(store.set_if_absent(&key, "first", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_absent(&key, "second", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), "first");
        let ttl = server_ttl(&store, &key).await;
        assert!((1..=60).contains(&ttl), "ttl {ttl}");
    }

    #[tokio::test]
    async fn live_cas_swap_rearms_ttl() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("swap");
        store.set(&key, "v1", Duration::from_secs(30)).await.unwrap();

        let outcome = store
            .compare_and_swap(&key, "v1", "v2", Duration::from_secs(5000))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Swapped);
        assert_eq!(store.get(&key).await.unwrap(), "v2");
        let ttl = server_ttl(&store, &key).await;
        assert!(ttl > 30 && ttl <= 5000, "ttl {ttl}");
    }

    #[tokio::test]
    async fn live_cas_mismatch_and_missing() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("mismatch");
        store.set(&key, "v1", Duration::from_secs(60)).await.unwrap();

        let outcome = store
            .compare_and_swap(&key, "stale", "v2", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Mismatch);
        assert_eq!(store.get(&key).await.unwrap(), "v1");

        let absent = unique_key("missing");
        let outcome = store
            .compare_and_swap(&absent, "a", "b", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);
        assert!(!store.exists(&absent).await.unwrap());
    }

    #[tokio::test]
    async fn live_concurrent_cas_has_one_winner() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("race");
        store.set(&key, "base", Duration::from_secs(60)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .compare_and_swap(&key, "base", &format!("w{i}"), Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut swapped = 0;
        for task in tasks {
            if task.await.unwrap() == CasOutcome::Swapped {
                swapped += 1;
            }
        }
        assert_eq!(swapped, 1);
        assert!(store.get(&key).await.unwrap().starts_with('w'));
    }
}
