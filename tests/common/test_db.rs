//! PostgreSQL test databases for integration tests.
//!
//! Each `TestDatabase` starts its own container with migrations applied, so
//! tests never observe each other's rows or advisory locks.

#![allow(clippy::duplicate_mod)]

use chrono::{DateTime, Utc};
use credplane::config::DatabaseConfig;
use credplane::domain::{DeviceId, NewDevice};
use credplane::storage::{create_pool, DbPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

/// A test database that lives as long as its container.
pub struct TestDatabase {
    pub pool: DbPool,
    _container: ContainerAsync<Postgres>,
}

impl TestDatabase {
    pub async fn new(prefix: &str) -> Self {
        let container = Postgres::default().start().await.unwrap_or_else(|e| {
            panic!("Failed to start PostgreSQL container for {}: {}", prefix, e)
        });
        let host = container.get_host().await.expect("container host");
        let port = container.get_host_port_ipv4(5432).await.expect("container port");

        let config = DatabaseConfig {
            url: format!("postgresql://postgres:postgres@{}:{}/postgres", host, port),
            auto_migrate: true,
            max_connections: 8,
            min_connections: 1,
            ..Default::default()
        };

        let pool = create_pool(&config)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test pool for {}: {}", prefix, e));

        Self { pool, _container: container }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub fn new_device(key: &str, secret_created_at: DateTime<Utc>) -> NewDevice {
    NewDevice {
        id: DeviceId::new(),
        device_key: key.to_string(),
        model_code: "esp32".to_string(),
        secret_created_at,
    }
}
