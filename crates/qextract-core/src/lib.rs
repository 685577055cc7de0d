pub mod config;
pub mod corpus;
pub mod domain;
pub mod extract;
pub mod spectrum;
pub mod store;
