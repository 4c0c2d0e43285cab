//! Ambient runtime glue shared by every keystone component: configuration
//! loading, the generic `AppError` envelope, and health check aggregation.
//!
//! This crate intentionally carries no authorization, storage, or dispatch
//! logic — those live in `keystone-security`, `keystone-storage`, and
//! `keystone-dispatch` respectively.

pub mod config;
pub mod error;
pub mod health;
pub mod prelude;

pub use config::{
    ConfigError, ConfigProperties, ConfigValidationError, ConfigValue, DefaultSecretResolver,
    FromConfigValue, KeystoneConfig, MissingKeyError, PropertyMeta, RegisteredSection,
    SecretResolver, register_section, registered_sections, validate_keys, validate_section,
};
pub use error::AppError;
pub use health::{
    HealthBuilder, HealthCheck, HealthCheckStatus, HealthIndicator, HealthIndicatorErased,
    HealthResponse, HealthState, HealthStatus,
};
