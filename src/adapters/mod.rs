// Adapters layer: concrete store and notification sink implementations.

pub mod memory_store;
pub mod sinks;

use crate::config::toml_config::StoreConfig;
use crate::utils::error::{LibraryError, Result};
use memory_store::MemoryStore;
use url::Url;

/// Opens the store named by `store.uri`. Only `memory://` is built in.
pub fn open_store(config: &StoreConfig) -> Result<MemoryStore> {
    let url = Url::parse(&config.uri).map_err(|e| LibraryError::InvalidConfigValueError {
        field: "store.uri".to_string(),
        value: config.uri.clone(),
        reason: format!("Invalid URI: {}", e),
    })?;

    match url.scheme() {
        "memory" => {
            tracing::debug!(
                "Opening in-memory store '{}' (change log capacity {})",
                url.host_str().unwrap_or_default(),
                config.change_log_capacity
            );
            Ok(MemoryStore::with_change_log_capacity(
                config.change_log_capacity,
            ))
        }
        scheme => Err(LibraryError::InvalidConfigValueError {
            field: "store.uri".to_string(),
            value: config.uri.clone(),
            reason: format!("Unsupported store scheme: {}", scheme),
        }),
    }
}
