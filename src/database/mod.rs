pub mod error;
pub mod error_log;
pub mod floats;
pub mod reconciliation;
pub mod records;
pub mod settings;
pub mod store;
pub mod transactions;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use self::error::DatabaseError;
use crate::config::DatabaseConfig;

/// Connections are recycled well before typical load-balancer idle
/// cutoffs so a quiet gateway never holds dead sockets.
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(45 * 60);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(
            config
                .idle_timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
        )
        .max_lifetime(MAX_CONNECTION_LIFETIME)
}

/// Connect and verify the database answers before the server starts
/// taking traffic; a gateway that cannot persist transactions must not
/// accept payments.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool = pool_options(config)
        .connect(&config.url)
        .await
        .map_err(DatabaseError::from_sqlx)?;

    ping(&pool).await?;
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.connection_timeout,
        "database pool ready"
    );
    Ok(pool)
}

/// One-row liveness probe, shared by startup and the health endpoint.
pub async fn ping(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(idle_timeout: Option<u64>) -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://gateway@localhost/gateway".to_string(),
            max_connections: 12,
            min_connections: 3,
            connection_timeout: 7,
            idle_timeout,
        }
    }

    #[test]
    fn pool_options_apply_configured_limits() {
        let options = pool_options(&config(Some(120)));
        assert_eq!(options.get_max_connections(), 12);
        assert_eq!(options.get_min_connections(), 3);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(7));
        assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn idle_timeout_falls_back_to_default() {
        let options = pool_options(&config(None));
        assert_eq!(options.get_idle_timeout(), Some(DEFAULT_IDLE_TIMEOUT));
        assert_eq!(options.get_max_lifetime(), Some(MAX_CONNECTION_LIFETIME));
    }
}
