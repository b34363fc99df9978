//! HTTP transport for the tagstore transfer engine.
//!
//! Implements the engine's [`Transport`](tagstore_engine::Transport) trait
//! on top of `reqwest`: ranged GET, Content-Range PUT, form POST and a
//! HEAD-based length probe, all carrying the session token as a cookie.

mod auth;
mod store;

pub use auth::StaticAuth;
pub use store::HttpStore;
