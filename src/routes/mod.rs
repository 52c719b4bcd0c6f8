//! HTTP handlers. `public` serves the landing page and language switching,
//! `admin` the token-gated JSON API.

pub mod admin;
pub mod public;
