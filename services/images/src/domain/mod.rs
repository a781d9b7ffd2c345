pub mod backoff;
pub mod repository;
pub mod types;
