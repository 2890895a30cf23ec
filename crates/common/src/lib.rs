//! Common utilities and shared types for apub-engine.
//!
//! This crate provides the foundational pieces used by the federation engine:
//!
//! - **Configuration**: Layered settings via [`Config`]
//! - **Error handling**: The federation error taxonomy via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based identifiers via [`IdGenerator`]
//! - **Telemetry**: `tracing` subscriber bootstrap via [`init_tracing`]
//!
//! # Example
//!
//! ```no_run
//! use apub_common::{AppResult, Config, IdGenerator, init_tracing};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config.log)?;
//!     let id = IdGenerator::new().generate();
//!     tracing::info!(%id, "Generated ID");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod telemetry;

pub use config::{
    Config, DeliveryConfig, FederationConfig, LogConfig, OnFollow, PolicyConfig, ServerConfig,
};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use telemetry::init_tracing;
