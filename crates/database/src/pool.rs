use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tracing::info;

/// Connection pool type alias
pub type DbPool = Pool;

fn base_config(config: &config::DatabaseConfig) -> Config {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.database.clone());
    cfg.user = Some(config.username.clone());
    cfg.password = Some(config.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_connections));
    cfg
}

/// Create pool using native-tls (simpler for accepting self-signed certificates)
fn create_pool_with_native_tls(cfg: Config, accept_invalid_certs: bool) -> anyhow::Result<Pool> {
    use native_tls::TlsConnector;
    use postgres_native_tls::MakeTlsConnector;

    let mut builder = TlsConnector::builder();
    if accept_invalid_certs {
        info!("Configuring TLS to accept self-signed certificates");
        builder.danger_accept_invalid_certs(true);
    }

    let connector = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create TLS connector: {e}"))?;
    let tls = MakeTlsConnector::new(connector);

    cfg.create_pool(Some(Runtime::Tokio1), tls)
        .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {e}"))
}

/// Create a connection pool from configuration.
pub fn create_pool(config: &config::DatabaseConfig) -> anyhow::Result<Pool> {
    let cfg = base_config(config);
    if config.tls_enabled {
        info!("Creating database pool with TLS: host={}", config.host);
        create_pool_with_native_tls(cfg, config.tls_accept_invalid_certs)
    } else {
        info!("Creating database pool without TLS: host={}", config.host);
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(tls: bool) -> config::DatabaseConfig {
        config::DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "storytime_test".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 5,
            tls_enabled: tls,
            tls_accept_invalid_certs: false,
        }
    }

    #[test]
    fn test_create_pool_without_tls() {
        // Pool creation is lazy; no live database needed.
        let pool = create_pool(&test_config(false));
        assert!(pool.is_ok());
    }

    #[test]
    fn test_create_pool_with_tls() {
        let pool = create_pool(&test_config(true));
        assert!(pool.is_ok());
    }
}
