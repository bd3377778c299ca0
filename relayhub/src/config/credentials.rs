//! Credentials file loading.
//!
//! The file maps platform names to credential maps:
//! `{ "<platform>": { "<actor address>": { ...secrets } } }`.
//! Each entry is checked against the platform's credential contract before
//! it is loaded.

use std::path::Path;

use platforms::PlatformRegistry;
use platforms::schema::validate_node;
use platforms::session::CREDENTIALS_KEY;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store::MemoryConfigStore;

/// Read `path` and load every valid credential entry into `store`.
///
/// Returns the number of entries loaded. Unknown platforms and invalid
/// entries are skipped with a warning.
pub async fn load_credentials(
    path: &Path,
    registry: &PlatformRegistry,
    store: &MemoryConfigStore,
) -> Result<usize> {
    let raw = tokio::fs::read(path).await?;
    let document: Value = serde_json::from_slice(&raw)?;
    let Value::Object(platforms) = document else {
        return Err(Error::config(format!(
            "credentials file {} must contain a JSON object",
            path.display()
        )));
    };

    let mut loaded = 0;
    for (platform, entries) in platforms {
        loaded += load_platform(&platform, entries, registry, store);
    }

    info!("Loaded {} credential entries from {}", loaded, path.display());
    Ok(loaded)
}

fn load_platform(
    platform: &str,
    entries: Value,
    registry: &PlatformRegistry,
    store: &MemoryConfigStore,
) -> usize {
    let adapter = match registry.create(platform) {
        Ok(adapter) => adapter,
        Err(_) => {
            warn!("Skipping credentials for unknown platform {}", platform);
            return 0;
        }
    };

    let Value::Object(entries) = entries else {
        warn!("Credentials for {} must be an object, skipping", platform);
        return 0;
    };

    let contract = adapter.schema().credential_entry();
    let mut accepted = Map::new();
    for (address, entry) in entries {
        if let Some(contract) = contract {
            let path = format!("credentials.{}.{}", platform, address);
            if let Err(e) = validate_node(contract, &entry, &path) {
                warn!("Rejecting credentials: {}", e);
                continue;
            }
        }
        accepted.insert(address, entry);
    }

    let count = accepted.len();
    if count > 0 {
        store.merge(adapter.name(), CREDENTIALS_KEY, accepted);
    }
    count
}
