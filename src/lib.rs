pub mod compactor;
pub mod config;
pub mod dto;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod resolver;
pub mod route;
pub mod schema;
pub mod wal;
