pub mod config;
pub mod constants;
pub mod db;
pub mod facebook;
pub mod models;
pub mod pagination;
pub mod rows;
pub mod sync;
pub mod transform;
pub mod warehouse;
pub mod worker;
