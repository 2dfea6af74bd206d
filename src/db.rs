pub mod error;
pub mod models;
pub mod pool;
pub mod reading_repository;
pub mod station_repository;

pub use error::DbError;
pub use models::*;
pub use pool::{connect, run_migrations};
pub use reading_repository::ReadingRepository;
pub use station_repository::StationRepository;
