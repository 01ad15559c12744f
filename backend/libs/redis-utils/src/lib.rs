use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, ErrorKind, IntoConnectionInfo, RedisError, RedisResult};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{info, warn};

/// Upper bound on one attempt to establish the connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Quiet period after a failed attempt; calls in between fail immediately
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Process-wide Redis connection.
///
/// The underlying `ConnectionManager` is created on first use, so a pool can
/// be opened while Redis is down. After a failed attempt, callers get an error
/// straight away until the back-off has passed. Once established, the manager
/// is a cheap cloneable handle over one multiplexed connection that
/// reconnects on its own; callers clone it per command rather than sharing it
/// behind a lock.
#[derive(Clone)]
pub struct RedisPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    client: Client,
    manager: OnceCell<ConnectionManager>,
    last_failure: Mutex<Option<Instant>>,
    addr_label: String,
    connect_timeout: Duration,
    backoff: Duration,
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool")
            .field("addr", &self.inner.addr_label)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl RedisPool {
    /// Parse the URL without touching the network. Only a malformed URL fails.
    pub fn open(redis_url: &str) -> Result<Self> {
        Self::open_with(redis_url, CONNECT_TIMEOUT, RECONNECT_BACKOFF)
    }

    pub fn open_with(redis_url: &str, connect_timeout: Duration, backoff: Duration) -> Result<Self> {
        let info: ConnectionInfo = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let addr_label = describe_addr(&info.addr);
        let client = Client::open(info).context("failed to construct Redis client")?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                client,
                manager: OnceCell::new(),
                last_failure: Mutex::new(None),
                addr_label,
                connect_timeout,
                backoff,
            }),
        })
    }

    /// Open and connect eagerly; fails when Redis is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let pool = Self::open(redis_url)?;
        pool.manager()
            .await
            .context("failed to initialize Redis connection manager")?;
        Ok(pool)
    }

    /// A handle onto the shared connection, connecting first if needed.
    pub async fn manager(&self) -> RedisResult<ConnectionManager> {
        if let Some(manager) = self.inner.manager.get() {
            return Ok(manager.clone());
        }
        if self.backing_off() {
            return Err(RedisError::from((
                ErrorKind::IoError,
                "Redis unreachable, reconnect backing off",
            )));
        }

        let inner = &self.inner;
        let result = inner
            .manager
            .get_or_try_init(|| async {
                match timeout(inner.connect_timeout, ConnectionManager::new(inner.client.clone())).await {
                    Ok(connected) => connected,
                    Err(_) => Err(RedisError::from((ErrorKind::IoError, "Redis connect timed out"))),
                }
            })
            .await;

        match result {
            Ok(manager) => {
                info!(addr = %inner.addr_label, "Redis connection manager ready");
                Ok(manager.clone())
            }
            Err(e) => {
                warn!(addr = %inner.addr_label, error = %e, "Redis connect failed");
                *self.failure_slot() = Some(Instant::now());
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.manager.initialized()
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr_label
    }

    /// PING with a deadline; used at startup and by keep-alive loops.
    pub async fn ping(&self, deadline: Duration) -> Result<()> {
        let reply = timeout(deadline, async {
            let mut conn = self.manager().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await
        .context("Redis PING timed out")?;

        match reply {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(addr = %self.inner.addr_label, error = %e, "Redis PING failed");
                Err(e).context("Redis PING failed")
            }
        }
    }

    fn backing_off(&self) -> bool {
        match *self.failure_slot() {
            Some(at) => at.elapsed() < self.inner.backoff,
            None => false,
        }
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.inner
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Host/port label without credentials, safe to log.
pub fn describe_addr(addr: &ConnectionAddr) -> String {
    match addr {
        ConnectionAddr::Tcp(host, port) => format!("{}:{}", host, port),
        ConnectionAddr::TcpTls { host, port, .. } => format!("tls://{}:{}", host, port),
        ConnectionAddr::Unix(path) => format!("unix://{}", path.display()),
    }
}
