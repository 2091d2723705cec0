pub mod config;
pub mod confluence;
pub mod divergence;
pub mod indicators;
pub mod lifecycle;
pub mod multi_timeframe;
pub mod pipeline;
pub mod quad_band;
pub mod signal_builder;
pub mod stochastic;
