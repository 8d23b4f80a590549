//! Data models shared by the gateway, the backends and the browser.
//!
//! Buckets and listing entries deserialize straight from the managed
//! storage API's JSON; `Bucket` also maps to the local backend's SQLite rows.

pub mod bucket;
pub mod item;
