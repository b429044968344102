pub mod client;
pub mod config;
pub mod dump;
pub mod enrich;
pub mod entity;
pub mod exporter;
pub mod importer;
pub mod mapping;
pub mod pagination;
pub mod reconcile;
pub mod runtime;

#[cfg(test)]
mod testing;
