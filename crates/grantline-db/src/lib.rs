pub mod config;
pub mod database;
pub mod grant_repository;
pub mod job_repository;
pub mod log_repository;
pub mod source_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use grant_repository::GrantRepository;
pub use job_repository::ScrapeJobRepository;
pub use log_repository::ScrapeLogRepository;
pub use source_repository::SourceRepository;
