pub mod api;
pub mod config;
pub mod http_client;
pub mod router_client;
pub mod services;
pub mod session_token;
pub mod types;
