use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Connector {connector_id} of {charge_point_id} already has transaction {transaction_id}")]
    ConnectorBusy {
        charge_point_id: String,
        connector_id: u32,
        transaction_id: i32,
    },

    #[error("Charge point {0} is not connected")]
    ChargePointOffline(String),

    #[error("Load management is unavailable")]
    EngineUnavailable,
}

impl DomainError {
    pub fn charge_point_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "ChargePoint",
            field: "id",
            value: id.into(),
        }
    }

    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Group",
            field: "id",
            value: id.into(),
        }
    }

    pub fn transaction_not_found(id: i32) -> Self {
        Self::NotFound {
            entity: "Transaction",
            field: "id",
            value: id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persistence I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
