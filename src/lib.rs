pub mod dataset;
pub mod db;
pub mod download;
pub mod error;
pub mod loader;
