pub mod catalog;
pub mod collaborators;
pub mod compactor;
pub mod config;
pub mod durable;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod tenant;
pub mod wal;
