pub mod batch_repository;
pub mod config;
pub mod database;
pub mod domain_repository;
pub mod proxy_repository;

pub use batch_repository::BatchRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use domain_repository::DomainRepository;
pub use proxy_repository::ProxyRepository;
