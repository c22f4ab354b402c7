pub mod memory;
pub mod rest;
pub mod traits;
