//! SQLite storage: pool setup in [`migrations`], queries on [`Repository`].

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
