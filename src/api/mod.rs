//! Registry REST API client
//!
//! ```no_run
//! use iot2_sdk::api::{ApiClient, Registry};
//! use iot2_sdk::config::ApplicationConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApplicationConfig::from_env()?;
//! let registry = Registry::new(ApiClient::new(&config)?);
//!
//! let mut devices = registry.devices().iter();
//! while let Some(device) = devices.next().await {
//!     println!("{}", device?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod pagination;
pub mod registry;

pub use client::ApiClient;
pub use error::{ApiError, StatusError, Violation};
pub use pagination::{FromApiRecord, IterableList, SimpleList, DEFAULT_PAGE_SIZE};
pub use registry::*;
