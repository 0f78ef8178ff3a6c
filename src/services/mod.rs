//! Collaborators of the scan scheduler and the service that drives them.

pub mod clock;
pub mod object_store;
pub mod record_store;
pub mod scan_client;
pub mod scanner;

#[cfg(test)]
pub mod testing;
