//! Repositories for database operations

pub mod cert_link;
pub mod user;

pub use cert_link::CertLinkRepository;
pub use user::UserRepository;

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = common::database::init_memory_pool()
        .await
        .expect("in-memory pool");
    common::database::run_migrations(&pool)
        .await
        .expect("schema");
    pool
}
