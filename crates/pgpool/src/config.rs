//! Pool and connection-target configuration

use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hard upper bound accepted for [`PoolConfig::max_size`].
pub const MAX_POOL_SIZE_CEILING: usize = 10;

/// No connection lives longer than this, whatever the configuration says.
pub const MAX_LIFETIME_CEILING_SECS: u64 = 3600;

/// How the pool decides whether another physical connection may be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AdmissionPolicy {
    /// Count every physical open ever made. Discarded connections are not
    /// replaced, so capacity shrinks as connections expire.
    #[default]
    Cumulative,
    /// Count only connections the pool currently tracks (idle + in use).
    /// A discard frees a slot for a replacement open.
    Live,
}

/// Configuration for a connection pool. Fixed once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Connections opened eagerly at construction
    pub min_size: usize,
    /// Ceiling on physical connections, at most [`MAX_POOL_SIZE_CEILING`]
    pub max_size: usize,
    /// Maximum age of a connection in seconds; 0 disables lifetime eviction
    pub max_lifetime_secs: u64,
    /// Accounting used by the admission check
    pub admission: AdmissionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: MAX_POOL_SIZE_CEILING,
            max_lifetime_secs: MAX_LIFETIME_CEILING_SECS,
            admission: AdmissionPolicy::Cumulative,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given min and max sizes.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Self::default()
        }
    }

    /// Set the maximum connection lifetime in seconds (0 disables).
    pub fn with_max_lifetime_secs(mut self, secs: u64) -> Self {
        self.max_lifetime_secs = secs;
        self
    }

    /// Set the admission accounting policy.
    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    /// Validate pool sizing, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.max_size > MAX_POOL_SIZE_CEILING {
            return Err(Error::configuration(format!(
                "max_size ({}) must not exceed {MAX_POOL_SIZE_CEILING}",
                self.max_size
            )));
        }
        if self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Return a copy with `max_lifetime_secs` clamped to
    /// [`MAX_LIFETIME_CEILING_SECS`].
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.max_lifetime_secs = self.max_lifetime_secs.min(MAX_LIFETIME_CEILING_SECS);
        self
    }

    /// Maximum lifetime as a `Duration`, `None` when eviction is disabled.
    #[must_use]
    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime_secs > 0).then(|| Duration::from_secs(self.max_lifetime_secs))
    }
}

/// Target and credentials handed to the [`ConnectionFactory`](crate::ConnectionFactory).
///
/// The pool does not interpret these beyond rendering [`target`](Self::target)
/// in logs and errors.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectOptions {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Role to authenticate as
    pub user: String,
    /// Password, if the server requires one
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing, deserialize_with = "deserialize_password")
    )]
    pub password: Option<SecretString>,
    /// Reported to the server as `application_name`
    pub application_name: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            application_name: None,
        }
    }
}

impl ConnectOptions {
    /// Options for `host` with every other field at its default.
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    pub fn dbname<S: Into<String>>(mut self, dbname: S) -> Self {
        self.dbname = dbname.into();
        self
    }

    /// Set the user.
    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the application name.
    pub fn application_name<S: Into<String>>(mut self, name: S) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// The password in clear text, for drivers that need it.
    #[must_use]
    pub fn expose_password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    /// `host:port/dbname`, safe to log.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }
}

#[cfg(feature = "serde")]
fn deserialize_password<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("application_name", &self.application_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.max_lifetime(), Some(Duration::from_secs(3600)));
        assert_eq!(config.admission, AdmissionPolicy::Cumulative);
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PoolConfig::new(0, 0).validate().is_err());
        assert!(PoolConfig::new(0, 11).validate().is_err());
        assert!(PoolConfig::new(4, 3).validate().is_err());
        assert!(PoolConfig::new(3, 3).validate().is_ok());
        assert!(PoolConfig::new(0, 10).validate().is_ok());
    }

    #[test]
    fn lifetime_is_clamped_not_rejected() {
        let config = PoolConfig::new(0, 2).with_max_lifetime_secs(86_400);
        assert!(config.validate().is_ok());
        assert_eq!(config.clamped().max_lifetime_secs, 3600);

        let config = PoolConfig::new(0, 2).with_max_lifetime_secs(0).clamped();
        assert_eq!(config.max_lifetime(), None);
    }

    #[test]
    fn target_and_debug_hide_password() {
        let options = ConnectOptions::new("db.internal")
            .port(6432)
            .dbname("orders")
            .user("svc")
            .password("hunter2");

        assert_eq!(options.target(), "db.internal:6432/orders");
        assert_eq!(options.expose_password(), Some("hunter2"));

        let debug = format!("{options:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
