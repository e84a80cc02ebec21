//! Shared key-value state for the gateway: throttle usage records,
//! in-flight counters and the result cache all live here.
//!
//! When a redis server is configured (typically via `REDIS_URL`) the
//! state is shared across every worker process talking to the same
//! server. Without one, an in-memory store provides the same surface
//! for a single process, which is also what the tests use.
use anyhow::Context;
use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, IntoConnectionInfo};
pub use redis::{cmd, Cmd, FromRedisValue, Value as RedisValue};
use std::time::Duration;

mod memory;
pub use memory::MemoryStore;

/// Connection parameters for a redis node. The node URL is the only
/// required field; everything else tunes the deadpool pool wrapped
/// around the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConnKey {
    pub node: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Maximum number of connections managed by the pool.
    /// Default is 10
    pub pool_size: Option<usize>,
    pub connect_timeout: Option<Duration>,
    pub recycle_timeout: Option<Duration>,
    pub wait_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
}

impl RedisConnKey {
    pub fn new<S: Into<String>>(node: S) -> Self {
        Self {
            node: node.into(),
            username: None,
            password: None,
            pool_size: None,
            connect_timeout: None,
            recycle_timeout: None,
            wait_timeout: None,
            response_timeout: None,
        }
    }

    pub fn build_client(&self) -> anyhow::Result<(Client, ConnectionManagerConfig)> {
        let mut config = ConnectionManagerConfig::new();
        if let Some(duration) = self.connect_timeout {
            config = config.set_connection_timeout(duration);
        }
        if let Some(duration) = self.response_timeout {
            config = config.set_response_timeout(duration);
        }

        let mut info = self
            .node
            .as_str()
            .into_connection_info()
            .with_context(|| format!("building redis client {self:?}"))?;
        if let Some(user) = &self.username {
            info.redis.username.replace(user.to_string());
        }
        if let Some(pass) = &self.password {
            info.redis.password.replace(pass.to_string());
        }

        let client =
            Client::open(info).with_context(|| format!("building redis client {self:?}"))?;
        Ok((client, config))
    }

    pub fn open(&self) -> anyhow::Result<RedisConnection> {
        let (client, config) = self.build_client()?;
        let mut builder = Pool::builder(ClientManager { client, config })
            .runtime(deadpool::Runtime::Tokio1)
            .create_timeout(self.connect_timeout)
            .recycle_timeout(self.recycle_timeout)
            .wait_timeout(self.wait_timeout);

        if let Some(limit) = self.pool_size {
            builder = builder.max_size(limit);
        }

        Ok(RedisConnection {
            pool: builder.build()?,
        })
    }
}

pub struct ClientManager {
    client: Client,
    config: ConnectionManagerConfig,
}

impl Manager for ClientManager {
    type Type = ConnectionManager;
    type Error = anyhow::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn =
            ConnectionManager::new_with_config(self.client.clone(), self.config.clone()).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _metrics: &Metrics,
    ) -> RecycleResult<anyhow::Error> {
        redis::cmd("PING")
            .query_async::<()>(conn)
            .await
            .map_err(|err| RecycleError::message(format!("{err:#}")))
    }
}

#[derive(Clone)]
pub struct RedisConnection {
    pool: Pool<ClientManager>,
}

impl RedisConnection {
    pub async fn query<T: FromRedisValue>(&self, cmd: Cmd) -> anyhow::Result<T> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| anyhow::anyhow!("{err:#}"))?;
        Ok(cmd.query_async(&mut *conn).await?)
    }

    pub async fn pipeline<T: FromRedisValue>(&self, pipe: redis::Pipeline) -> anyhow::Result<T> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| anyhow::anyhow!("{err:#}"))?;
        Ok(pipe.query_async(&mut *conn).await?)
    }
}

/// The store handle used throughout the gateway. Redis when configured,
/// otherwise process-local memory with the same semantics.
#[derive(Clone)]
pub enum Store {
    Redis(RedisConnection),
    Memory(MemoryStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }

    pub fn from_redis_url(url: &str) -> anyhow::Result<Self> {
        Ok(Self::Redis(RedisConnKey::new(url).open()?))
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match self {
            Self::Redis(conn) => {
                let mut c = Cmd::new();
                c.arg("GET").arg(key);
                conn.query(c).await
            }
            Self::Memory(mem) => Ok(mem.get(key)),
        }
    }

    pub async fn mget(&self, keys: &[&str]) -> anyhow::Result<Vec<Option<String>>> {
        match self {
            Self::Redis(conn) => {
                let mut c = Cmd::new();
                c.arg("MGET");
                for key in keys {
                    c.arg(key);
                }
                conn.query(c).await
            }
            Self::Memory(mem) => Ok(keys.iter().map(|key| mem.get(key)).collect()),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        match self {
            Self::Redis(conn) => {
                let mut c = Cmd::new();
                c.arg("SET").arg(key).arg(value);
                conn.query(c).await
            }
            Self::Memory(mem) => {
                mem.set(key, value, None);
                Ok(())
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        match self {
            Self::Redis(conn) => {
                let mut c = Cmd::new();
                c.arg("SET").arg(key).arg(value).arg("EX").arg(ttl.as_secs());
                conn.query(c).await
            }
            Self::Memory(mem) => {
                mem.set(key, value, Some(ttl));
                Ok(())
            }
        }
    }

    /// Increment the counter at `key` and refresh its expiry in one
    /// round trip. Returns the post-increment count.
    pub async fn incr_ex(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        match self {
            Self::Redis(conn) => {
                let mut pipe = redis::pipe();
                pipe.cmd("INCR").arg(key);
                pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();
                let (count,): (i64,) = conn.pipeline(pipe).await?;
                Ok(count)
            }
            Self::Memory(mem) => mem.incr_by(key, 1, Some(ttl)),
        }
    }

    /// Decrement the counter at `key` and refresh its expiry.
    pub async fn decr_ex(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        match self {
            Self::Redis(conn) => {
                let mut pipe = redis::pipe();
                pipe.cmd("DECR").arg(key);
                pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();
                let (count,): (i64,) = conn.pipeline(pipe).await?;
                Ok(count)
            }
            Self::Memory(mem) => mem.incr_by(key, -1, Some(ttl)),
        }
    }
}
