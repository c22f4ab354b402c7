pub mod cost_basis;
pub mod monitor_service;
pub mod price_feed_service;
pub mod tracking_service;
pub mod valuation_service;
