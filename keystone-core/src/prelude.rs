//! Keystone core prelude — import the ambient glue with a single `use`.
//!
//! ```ignore
//! use keystone_core::prelude::*;
//! ```

pub use crate::config::{ConfigError, ConfigProperties, ConfigValue, FromConfigValue, KeystoneConfig};
pub use crate::error::AppError;
pub use crate::health::{HealthBuilder, HealthIndicator, HealthState, HealthStatus};
