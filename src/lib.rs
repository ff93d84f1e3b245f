pub mod ports {
    pub mod kline_csv;
    pub mod replay_feed;
}
pub mod config;
pub mod pairtrade;
pub mod pnl_logger;
pub mod rule;
pub mod sizing;
pub mod stats;
pub mod trade;
pub mod window;
