pub mod api;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod models;
pub mod provisioning;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod template;
pub mod utils;
pub mod worker;
