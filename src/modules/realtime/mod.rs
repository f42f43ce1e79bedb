pub mod events;
pub mod repository;
pub mod repository_pg;
pub mod service;
