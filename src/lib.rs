pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod i18n;
pub mod migration;
pub mod render;
pub mod retry;
pub mod routes;
pub mod security;
pub mod server;
pub mod session;
pub mod translation;
pub mod uploads;
