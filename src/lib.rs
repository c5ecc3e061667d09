pub mod table;
pub mod error;
pub mod loader;
pub mod stats;
pub mod detector;
pub mod processor;
pub mod export;
