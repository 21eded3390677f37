pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod services;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Decimal, Role, TimeMs};
pub use error::AppError;
