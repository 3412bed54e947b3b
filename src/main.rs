use hemmer_provider_clickhouse::{init_logging, serve, ClickHouseProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ClickHouse provider");
    serve(ClickHouseProvider::new()).await
}
