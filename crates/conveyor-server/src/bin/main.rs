use conveyor_broker::{BrokerClient, BrokerConfig, ConnectionRole};
use conveyor_core::ConveyorError;
use conveyor_server::{Backend, ServerConfig};
use conveyor_store::JobStatusStore;
use conveyor_store_mysql::MySqlJobStore;
use conveyor_store_postgres::PgJobStore;
use std::sync::Arc;

fn broker_config_from_env() -> BrokerConfig {
    BrokerConfig {
        host: std::env::var("CONVEYOR_BROKER_HOST").unwrap_or_default(),
        port: std::env::var("CONVEYOR_BROKER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5672),
        vhost: std::env::var("CONVEYOR_BROKER_VHOST").unwrap_or_else(|_| "/cvmfs".to_string()),
        username: std::env::var("CONVEYOR_BROKER_USER").unwrap_or_default(),
        password: std::env::var("CONVEYOR_BROKER_PASSWORD").unwrap_or_default(),
    }
}

async fn connect_store(database_url: &str) -> anyhow::Result<Arc<dyn JobStatusStore>> {
    if database_url.starts_with("mysql://") {
        Ok(Arc::new(MySqlJobStore::connect(database_url).await?))
    } else {
        Ok(Arc::new(PgJobStore::connect(database_url).await?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env().map_err(|e: ConveyorError| anyhow::anyhow!(e))?;
    let store = connect_store(&config.database_url).await?;
    let broker = Arc::new(BrokerClient::connect(&broker_config_from_env(), ConnectionRole::Publisher).await?);

    let backend = Arc::new(Backend::new(store, broker).await?);
    let app = conveyor_server::router(backend, config.shared_key.clone());

    tracing::info!(address = %config.bind_address, "server listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
