//! Per-environment connection pool.
//!
//! Every schemasync run talks to an environment sequentially, so the pool is
//! sized for one connection unless a caller asks for more (the live tests
//! do, to hold a setup connection next to the one under test).

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections to one environment.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Start building a pool.
    pub fn builder() -> PgPoolBuilder {
        PgPoolBuilder::default()
    }

    /// Check out a connection. The first call opens it.
    pub async fn get(&self) -> PgResult<PgConnection> {
        debug!(host = %self.config.host, database = %self.config.database, "Acquiring connection");
        let client = self.inner.get().await?;
        Ok(PgConnection::new(client))
    }

    /// Settings the pool connects with.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

/// Builder for [`PgPool`].
#[derive(Debug)]
pub struct PgPoolBuilder {
    config: Option<PgConfig>,
    url: Option<String>,
    max_connections: usize,
    wait_timeout: Duration,
}

impl Default for PgPoolBuilder {
    fn default() -> Self {
        Self {
            config: None,
            url: None,
            max_connections: 1,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl PgPoolBuilder {
    /// Connect using a `postgresql://` URL with default settings.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Connect using a prepared configuration. Takes precedence over [`url`](Self::url).
    pub fn config(mut self, config: PgConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Upper bound on open connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// How long [`PgPool::get`] waits for a free or new connection.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Create the pool. No connection is opened until the first [`PgPool::get`].
    pub async fn build(self) -> PgResult<PgPool> {
        let config = match (self.config, self.url) {
            (Some(config), _) => config,
            (None, Some(url)) => PgConfig::from_url(url)?,
            (None, None) => return Err(PgError::config("no database URL or config provided")),
        };

        let manager = Manager::from_config(
            config.to_pg_config(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let inner = Pool::builder(manager)
            .max_size(self.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(self.wait_timeout))
            .create_timeout(Some(config.connect_timeout))
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {}", e)))?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = self.max_connections,
            statement_timeout_ms = config.statement_timeout.as_millis() as u64,
            "Connection pool created"
        );

        Ok(PgPool {
            inner,
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_one_connection() {
        let builder = PgPoolBuilder::default();
        assert_eq!(builder.max_connections, 1);
        assert_eq!(builder.wait_timeout, DEFAULT_WAIT_TIMEOUT);

        let builder = PgPool::builder()
            .url("postgresql://localhost/test")
            .max_connections(2);
        assert!(builder.url.is_some());
        assert_eq!(builder.max_connections, 2);
    }

    #[tokio::test]
    async fn test_build_without_url_fails() {
        let err = PgPool::builder().build().await.err().unwrap();
        assert!(matches!(err, PgError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_is_lazy() {
        // Port 1 refuses connections; building must still succeed.
        let pool = PgPool::builder()
            .url("postgresql://app@127.0.0.1:1/app?statement_timeout=2500")
            .build()
            .await
            .unwrap();
        assert_eq!(pool.config().database, "app");
        assert_eq!(pool.config().statement_timeout, Duration::from_millis(2500));
    }
}
