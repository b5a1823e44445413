//! Purpose: Connection settings for the PostgreSQL store.
//! Exports: `StoreConfig`.
//! Role: Single place that turns env vars and CLI flags into a `tokio_postgres::Config`.
//! Invariants: An explicit URL wins over libpq-style `PG*` variables.
//! Invariants: Pool bounds are always positive.
use std::time::Duration;

use tokio_postgres::Config as PgConfig;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreConfig {
    /// `postgres://` URL or key/value connection string.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            dbname: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let mut config = Self {
            url: non_empty("PGCOUCH_DATABASE_URL").or_else(|| non_empty("DATABASE_URL")),
            host: non_empty("PGHOST"),
            port: None,
            user: non_empty("PGUSER"),
            password: lookup("PGPASSWORD"),
            dbname: non_empty("PGDATABASE"),
            ..Self::default()
        };
        if let Some(port) = non_empty("PGPORT") {
            config.port = Some(port.parse().map_err(|_| {
                Error::new(ErrorKind::Usage).with_message(format!("invalid PGPORT: {port}"))
            })?);
        }
        if let Some(max) = non_empty("PGCOUCH_MAX_CONNECTIONS") {
            config = config.with_max_connections(max.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid PGCOUCH_MAX_CONNECTIONS: {max}"))
            })?)?;
        }
        if let Some(ms) = non_empty("PGCOUCH_ACQUIRE_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid PGCOUCH_ACQUIRE_TIMEOUT_MS: {ms}"))
            })?;
            config.acquire_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Result<Self, Error> {
        if max_connections == 0 {
            return Err(
                Error::new(ErrorKind::Usage).with_message("max connections must be at least 1")
            );
        }
        self.max_connections = max_connections;
        Ok(self)
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub(crate) fn pg_config(&self) -> Result<PgConfig, Error> {
        let mut pg = match &self.url {
            Some(url) => url.parse::<PgConfig>().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid database url")
                    .with_source(err)
            })?,
            None => PgConfig::new(),
        };
        if self.url.is_none() {
            pg.host(self.host.as_deref().unwrap_or("localhost"));
            pg.port(self.port.unwrap_or(5432));
            if let Some(user) = &self.user {
                pg.user(user);
            }
            if let Some(password) = &self.password {
                pg.password(password);
            }
            if let Some(dbname) = &self.dbname {
                pg.dbname(dbname);
            }
        }
        pg.application_name("pgcouch");
        Ok(pg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        let pg = config.pg_config().unwrap();
        assert_eq!(pg.get_ports(), &[5432]);
    }

    #[test]
    fn pgcouch_url_wins_over_database_url() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("PGCOUCH_DATABASE_URL", "postgres://a@db1/one"),
            ("DATABASE_URL", "postgres://b@db2/two"),
        ]))
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("postgres://a@db1/one"));
        let pg = config.pg_config().unwrap();
        assert_eq!(pg.get_user(), Some("a"));
        assert_eq!(pg.get_dbname(), Some("one"));
    }

    #[test]
    fn libpq_variables_are_used_without_url() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("PGUSER", "couch"),
            ("PGDATABASE", "docs"),
            ("PGCOUCH_MAX_CONNECTIONS", "4"),
            ("PGCOUCH_ACQUIRE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        let pg = config.pg_config().unwrap();
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_user(), Some("couch"));
        assert_eq!(pg.get_dbname(), Some("docs"));
    }

    #[test]
    fn invalid_values_are_usage_errors() {
        for vars in [
            [("PGPORT", "not-a-port")],
            [("PGCOUCH_MAX_CONNECTIONS", "0")],
            [("PGCOUCH_ACQUIRE_TIMEOUT_MS", "soon")],
        ] {
            let err = StoreConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
        let err = StoreConfig::default()
            .with_url("postgres://host:notaport/db")
            .pg_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
