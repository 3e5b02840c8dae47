//! Shared types, error model, and configuration for tagrail.
//!
//! This crate is the foundation depended on by all other tagrail crates.
//! It provides:
//! - [`TagrailError`] — the unified error type
//! - Domain types ([`Inventory`], [`TagMapping`], [`Progress`], tag splitting)
//! - Configuration ([`AppConfig`], config loading, credential resolution)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, LlmConfig, NormalizeConfig, StoreConfig, StoreEndpoint,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_llm_api_key, resolve_store_endpoint,
};
pub use error::{Result, TagrailError, clip};
pub use types::{
    CollectionProgress, Inventory, MappingMeta, Progress, SplitTag, TagMapping,
    UNSTRUCTURED_PREFIX, ValueCount, split_tag,
};
