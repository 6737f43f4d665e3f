pub mod attachments;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod hub;
pub mod models;
pub mod payments;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
