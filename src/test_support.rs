//! Shared fixtures for HTTP handler tests.

use std::net::SocketAddr;

use actix_web::web::Data;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::auth::jwt::generate_token;
use crate::config::Config;
use crate::db::init_db;
use crate::model::role::Role;
use crate::realtime::hub::AttendanceHub;

pub const PEER: &str = "127.0.0.1:40000";

pub fn peer() -> SocketAddr {
    PEER.parse().unwrap()
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        jwt_secret: "test-secret".into(),
        server_addr: "127.0.0.1:0".into(),
        token_ttl: 3600,
        rate_login_per_min: 10_000,
        rate_register_per_min: 10_000,
        rate_protected_per_min: 10_000,
        api_prefix: "/api".into(),
        hub_channel_capacity: 16,
        hub_replay_capacity: 16,
        log_dir: "logs".into(),
        log_level: tracing::Level::DEBUG,
    }
}

pub async fn test_pool() -> SqlitePool {
    init_db("sqlite::memory:").await.unwrap()
}

pub fn test_hub() -> Data<AttendanceHub> {
    Data::new(AttendanceHub::new(16, 16))
}

/// Inserts a user row so `createdBy` can be populated; returns its id.
pub async fn seed_user(pool: &SqlitePool, name: &str, email: &str, role: Role) -> i64 {
    sqlx::query(
        "INSERT INTO users (name, email, password, role, created_at) VALUES (?, ?, 'x', ?, ?)",
    )
    .bind(name)
    .bind(email)
    .bind(role.as_ref())
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub fn bearer(user_id: i64, role: Role, config: &Config) -> (&'static str, String) {
    let token = generate_token(
        user_id,
        "Tester",
        "tester@parlour.example",
        role,
        &config.jwt_secret,
        config.token_ttl,
    )
    .unwrap();
    ("Authorization", format!("Bearer {token}"))
}

/// Full application wired the way `main` wires it, minus Swagger and logging.
macro_rules! test_app {
    ($pool:expr, $config:expr, $hub:expr) => {{
        let config: $crate::config::Config = $config;
        let limiters = $crate::routes::Limiters::from_config(&config).unwrap();
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(actix_web::middleware::NormalizePath::trim())
                .app_data(actix_web::web::Data::new($pool.clone()))
                .app_data(actix_web::web::Data::new(config.clone()))
                .app_data($hub.clone())
                .app_data(actix_web::web::Data::new(
                    $crate::utils::account_index::AccountIndex::new(),
                ))
                .configure(|cfg| $crate::routes::configure(cfg, &config, &limiters)),
        )
        .await
    }};
}

pub(crate) use test_app;
