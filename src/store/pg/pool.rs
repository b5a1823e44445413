// Bounded client pool: a semaphore caps open clients, idle ones are reused LIFO.
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: Config,
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl PgPool {
    pub fn new(settings: &StoreConfig) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(PoolInner {
                config: settings.pg_config()?,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(settings.max_connections)),
                max_connections: settings.max_connections,
                acquire_timeout: settings.acquire_timeout,
            }),
        })
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Clients not currently checked out (idle or not yet opened).
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub async fn get(&self) -> Result<PooledClient, Error> {
        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            Error::new(ErrorKind::Connection).with_message(format!(
                "connection pool exhausted after {:?}",
                self.inner.acquire_timeout
            ))
        })?
        .map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("connection pool closed")
                .with_source(err)
        })?;

        while let Some(client) = self.pop_idle() {
            if client.is_closed() {
                debug!("discarding closed client");
                continue;
            }
            return Ok(PooledClient::new(client, Arc::clone(&self.inner), permit));
        }

        let (client, connection) = self.inner.config.connect(NoTls).await.map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("failed to connect to database")
                .with_source(err)
        })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "connection error");
            }
        });
        debug!("opened database connection");
        Ok(PooledClient::new(client, Arc::clone(&self.inner), permit))
    }

    fn pop_idle(&self) -> Option<Client> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }
}

/// Checked-out client; goes back to the idle list on drop unless it died.
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    fn new(client: Client, pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            client: Some(client),
            pool,
            _permit: permit,
        }
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client present until drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("client present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !client.is_closed() {
                self.pool
                    .idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(client);
            }
        }
    }
}
