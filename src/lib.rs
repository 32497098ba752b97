pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod file_store;
pub mod models;
pub mod query;
pub mod repository;
pub mod store;
