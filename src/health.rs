//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

#[derive(Clone)]
pub struct HealthChecker {
    pool: PgPool,
}

impl HealthChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn check(&self) -> HealthStatus {
        let mut checks = HashMap::new();

        let started = Instant::now();
        let database = match timeout(Duration::from_secs(5), crate::database::ping(&self.pool))
            .await
        {
            Ok(Ok(())) => ComponentHealth {
                status: ComponentState::Up,
                response_time_ms: Some(started.elapsed().as_millis()),
                details: None,
            },
            Ok(Err(e)) => ComponentHealth {
                status: ComponentState::Down,
                response_time_ms: Some(started.elapsed().as_millis()),
                details: Some(e.to_string()),
            },
            Err(_) => ComponentHealth {
                status: ComponentState::Down,
                response_time_ms: None,
                details: Some("health check timed out".to_string()),
            },
        };
        let healthy = database.status == ComponentState::Up;
        checks.insert("database".to_string(), database);

        HealthStatus {
            status: if healthy {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            checks,
            timestamp: chrono::Utc::now(),
        }
    }
}
