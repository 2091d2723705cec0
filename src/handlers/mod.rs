pub mod calculate;
pub mod config;
pub mod health;
pub mod signals;
