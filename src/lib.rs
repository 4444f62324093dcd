pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod model;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
