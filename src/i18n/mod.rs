//! Internationalization (i18n) module for multi-language support.
//!
//! # Architecture
//!
//! - `registry`: Single source of truth for all supported languages and their metadata
//! - `language`: Type-safe Language type validated against the registry
//! - `resolver`: Per-request locale resolution (query, session, header, geo-IP, default)
//! - `geoip`: Optional country-based locale hint with a per-address cache
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::i18n::{Language, LocaleRequest, LocaleResolver};
//!
//! let resolver = LocaleResolver::new(Language::canonical());
//! let language = resolver
//!     .resolve(&LocaleRequest { query: Some("en"), ..Default::default() })
//!     .await;
//! ```

mod geoip;
mod language;
mod registry;
mod resolver;

pub use geoip::{country_to_language, is_public_address, GeoIpLocator};
pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};
pub use resolver::{best_accept_language, LocaleRequest, LocaleResolver};
