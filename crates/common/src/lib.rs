//! Common crate
//!
//! Shared types and error handling for the Igloo planner crates.
//!
//! # Example
//! ```rust
//! use igloo_common::Endpoint;
//! let endpoint: Endpoint = "worker-1:31010:31011".parse().unwrap();
//! assert_eq!(endpoint.address, "worker-1");
//! ```

pub mod endpoint;
pub mod error;

pub use endpoint::{Endpoint, QueryId};
pub use error::{Error, Result};
