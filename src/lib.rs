pub mod cells;
pub mod clients;
pub mod config;
pub mod data_model;
pub mod events;
pub mod processor;
pub mod service;
pub mod state_store;
pub mod tracing;

#[cfg(test)]
pub mod testing;
