pub mod clock;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod generation;
pub mod model;
pub mod schedule;
pub mod storage;
pub mod store;
pub mod terminal;
pub mod transport;
