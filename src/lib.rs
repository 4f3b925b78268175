pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod handlers;
pub mod http_server;
pub mod identity;
pub mod logging;
pub mod store;
