//! Browse a public video catalog and keep per-user collections in a hosted
//! (or local SQLite) data store.

pub mod auth;
pub mod backend;
pub mod catalog;
pub mod collections;
pub mod config;
pub mod store;
pub mod util;
