pub mod cache;
pub mod config_store;
pub mod engine;
pub mod hyperliquid;
pub mod monitor;
pub mod signal_state;
pub mod throttle;
pub mod worker_pool;
