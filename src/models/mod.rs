pub mod api;
pub mod candle;
pub mod confluence;
pub mod divergence;
pub mod indicator;
pub mod messages;
pub mod signal;
pub mod stochastic;
pub mod timeframe;
