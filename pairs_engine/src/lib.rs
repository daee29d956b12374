pub mod cointegration;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod models;
pub mod ports;
pub mod ranker;
pub mod risk;
pub mod scan;
pub mod selector;
pub mod state;
pub mod store;

pub use models::*;
