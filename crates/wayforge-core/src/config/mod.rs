//! Unified configuration layer: every env var read funnels through here so
//! the rest of the workspace deals in structured config, not
//! `std::env::var` calls scattered across call sites.

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv, load_dotenv_from_dir};
pub use schema::{ConfirmConfig, ObservabilityConfig, OracleBackend, OracleProviderConfig, PathsConfig};
