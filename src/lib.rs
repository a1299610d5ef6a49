pub mod analysis;
pub mod config;
pub mod corpus;
pub mod embed;
pub mod error;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod store;
pub mod verify;
