//! # Secretkit
//!
//! Secret material for provisioned hosts: generated once per deployment
//! identity, persisted with restrictive permissions, never shown in clear
//! text outside the store file.
//!
//! ```ignore
//! use secretkit::{SecretSpec, SecretStore};
//!
//! let store = SecretStore::open("/var/lib/provision/web-1/secrets.toml", "web-1")?;
//! let root = store.get_or_generate("db_root", &SecretSpec::password(32))?;
//! log::info!("secrets: {:?}", store.redacted_view());
//! ```

pub mod error;
pub mod material;
pub mod store;

pub use error::{Error, Result};
pub use material::{Charset, MASK, SecretMaterial, SecretSpec};
pub use store::{REDACTED, SecretStore};
