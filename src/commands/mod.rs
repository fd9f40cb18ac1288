// ABOUTME: Command implementations for the agency-sync CLI
// ABOUTME: Shared store-opening and argument-checking helpers live here

pub mod cancel;
pub mod errors;
pub mod init;
pub mod retry;
pub mod run;
pub mod stage;
pub mod status;

pub use cancel::cancel;
pub use errors::errors;
pub use init::init;
pub use retry::retry;
pub use run::run;
pub use stage::stage;
pub use status::status;

use crate::config::Config;
use crate::store::Store;
use crate::validate;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

pub(crate) fn resolved_store_path(config: &Config, override_path: Option<&Path>) -> PathBuf {
    override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.store_path())
}

pub(crate) fn open_store(config: &Config, override_path: Option<&Path>) -> Result<Store> {
    let path = resolved_store_path(config, override_path);
    Store::open(&path).with_context(|| format!("Failed to open store at {}", path.display()))
}

pub(crate) fn checked_batch_id(raw: &str) -> Result<String> {
    validate::validate_uuid(raw).map_err(|_| anyhow!("'{}' is not a valid batch id", raw))
}
