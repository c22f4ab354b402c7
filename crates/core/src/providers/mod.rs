pub mod registry;
pub mod traits;

// Market-data source implementations
pub mod coincap;
pub mod coinmarketcap;
