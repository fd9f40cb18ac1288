// ABOUTME: Init command that creates the store file and applies migrations

use crate::config::Config;
use crate::schema::EntityKind;
use anyhow::Result;
use std::path::Path;

pub fn init(config: &Config, store_override: Option<&Path>) -> Result<()> {
    let path = super::resolved_store_path(config, store_override);
    let store = super::open_store(config, store_override)?;

    println!("Store ready at {}", path.display());
    println!("  Schema version:    {}", store.schema_version()?);
    println!("  Production tables: {}", EntityKind::ALL.len());
    Ok(())
}
