pub mod api;
pub mod app;
pub mod config;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod state;
