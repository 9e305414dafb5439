//! Shared types, error model, and configuration for Prospector.
//!
//! This crate is the foundation depended on by all other Prospector crates.
//! It provides:
//! - [`ProspectorError`]: the unified error type
//! - Domain types ([`Cnpj`], [`FilterSet`], [`ResolvedEntity`], [`CacheEntry`],
//!   [`ProgressSnapshot`])
//! - Vocabulary normalization ([`normalize`])
//! - Configuration ([`AppConfig`] and the runtime configs derived from it)

pub mod cnpj;
pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cnpj::{CNPJ_LEN, Cnpj};
pub use config::{
    AppConfig, CacheConfig, ClientConfig, ControllerConfig, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
    PipelineConfig, PipelineSection, ProvidersConfig, ResolverConfig, SearchConfig, ServerConfig, cache_db_path, config_dir,
    config_file_path, init_config, load_config, load_config_from, search_api_key,
    validate_config,
};
pub use error::{ProspectorError, Result};
pub use types::{
    CacheEntry, Contacts, FilterSet, ProgressSnapshot, RegistrationStatus, ResolvedEntity,
    RunStats, SizeBand, TaskId,
};
