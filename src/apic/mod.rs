//! APIC API interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - Credentials and session token lifetime
//! - [`client`] - Main APIC client (login, refresh, authenticated requests)
//! - [`http`] - HTTP transport and response classification
//!
//! # Example
//!
//! ```ignore
//! use aci_collector::apic::{ApicClient, Credentials};
//!
//! async fn example() -> Result<(), aci_collector::CollectError> {
//!     let client = ApicClient::new("10.0.0.1", Credentials::new("admin", "pw"))?;
//!     client.authenticate().await?;
//!     let tenants = client.get_class("fvTenant", &[]).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;

pub use auth::{Credentials, SessionToken, TOKEN_TTL};
pub use client::{class_path, normalize_url, ApicClient};
pub use http::{ApicHttpClient, RawResponse};
