//! Configuration for the replication reader

use crate::core::errors::{ReplicationError, ReplicationResult};

/// Configuration for a logical replication reader
///
/// Carries the source connection string, the name recorded as `db` on every
/// emitted table schema, and the publication/slot pair the reader attaches to.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub db_name: String,
    pub conninfo: String,
    pub publication_name: String,
    pub slot_name: String,
}

impl ReplicationConfig {
    /// Create a new ReplicationConfig with validation
    pub fn new(
        db_name: impl Into<String>,
        conninfo: impl Into<String>,
        publication_name: impl Into<String>,
        slot_name: impl Into<String>,
    ) -> ReplicationResult<Self> {
        let db_name = db_name.into();
        let conninfo = conninfo.into();
        let publication_name = publication_name.into();
        let slot_name = slot_name.into();

        if db_name.trim().is_empty() {
            return Err(ReplicationError::config("Database name cannot be empty"));
        }

        if conninfo.trim().is_empty() {
            return Err(ReplicationError::config("Connection string cannot be empty"));
        }

        if publication_name.trim().is_empty() {
            return Err(ReplicationError::config("Publication name cannot be empty"));
        }

        if slot_name.trim().is_empty() {
            return Err(ReplicationError::config("Slot name cannot be empty"));
        }

        // PostgreSQL naming rules for replication slots
        if !slot_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ReplicationError::config(
                "Slot name can only contain alphanumeric characters and underscores",
            ));
        }

        if slot_name.len() > 63 {
            // PostgreSQL identifier length limit
            return Err(ReplicationError::config(
                "Slot name cannot be longer than 63 characters",
            ));
        }

        Ok(Self {
            db_name,
            conninfo,
            publication_name,
            slot_name,
        })
    }

    /// Build a configuration from individual connection parameters
    pub fn from_params(
        host: &str,
        port: u16,
        db_name: &str,
        user: &str,
        password: Option<&str>,
        publication_name: impl Into<String>,
        slot_name: impl Into<String>,
    ) -> ReplicationResult<Self> {
        let mut conninfo = format!("host={host} port={port} dbname={db_name} user={user}");
        if let Some(password) = password {
            conninfo.push_str(&format!(" password={password}"));
        }
        Self::new(db_name, conninfo, publication_name, slot_name)
    }

    /// Connection string for regular (catalog) connections
    pub fn conninfo(&self) -> &str {
        &self.conninfo
    }

    /// Connection string for the walsender connection
    ///
    /// `replication=database` puts the connection into logical replication
    /// mode while keeping SQL access to the connected database.
    pub fn replication_conninfo(&self) -> String {
        format!("{} replication=database", self.conninfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_config() {
        let config = ReplicationConfig::new("test", "host=localhost dbname=test", "pub", "slot_1")
            .expect("valid config");
        assert_eq!(config.slot_name, "slot_1");
        assert_eq!(
            config.replication_conninfo(),
            "host=localhost dbname=test replication=database"
        );
    }

    #[test]
    fn rejects_empty_fields() {
        assert!(ReplicationConfig::new("", "dsn", "pub", "slot").is_err());
        assert!(ReplicationConfig::new("db", " ", "pub", "slot").is_err());
        assert!(ReplicationConfig::new("db", "dsn", "", "slot").is_err());
        assert!(ReplicationConfig::new("db", "dsn", "pub", "").is_err());
    }

    #[test]
    fn rejects_invalid_slot_names() {
        assert!(ReplicationConfig::new("db", "dsn", "pub", "bad-slot").is_err());
        assert!(ReplicationConfig::new("db", "dsn", "pub", "a".repeat(64)).is_err());
    }

    #[test]
    fn builds_conninfo_from_params() {
        let config = ReplicationConfig::from_params(
            "localhost",
            5432,
            "test",
            "postgres",
            Some("secret"),
            "pub",
            "slot",
        )
        .expect("valid config");
        assert_eq!(
            config.conninfo(),
            "host=localhost port=5432 dbname=test user=postgres password=secret"
        );
    }
}
