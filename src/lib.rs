pub mod actuator;
pub mod api;
pub mod barrier;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod http;
pub mod pipeline;
pub mod state;
