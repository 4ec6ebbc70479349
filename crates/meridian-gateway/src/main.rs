//! Meridian Gateway Service
//!
//! Main entry point for client connections. Supports:
//! - Batch query RPC (gRPC server streaming)
//! - Console query RPC with guardrail admission control
//! - PostgreSQL wire protocol (for psql, DBeaver, BI tools)
//! - Prometheus metrics (/metrics)
//!
//! Query resolution and OLAP execution live in external collaborator
//! services, reached over gRPC and consumed behind traits.

mod activity;
mod batch;
mod classify;
mod console;
mod engine;
mod errors;
mod grpc;
mod guardrails;
mod marshal;
mod metrics;
mod pg_wire;
mod runtime;
mod telemetry;

#[cfg(test)]
mod testutil;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tracing::{error, info};

use crate::activity::{ActivityClient, LoggingActivityClient};
use crate::engine::{RemoteOlapEngine, RemoteResolver};
use crate::grpc::GatewayService;
use crate::pg_wire::PgServer;
use crate::runtime::{
    AllowAllAuthorizer, CatalogSnapshot, InstanceOptions, OlapEngine, Runtime,
};

#[derive(Parser, Debug)]
#[command(name = "meridian-gateway")]
#[command(about = "Meridian Gateway - Query Entry Point")]
struct Args {
    /// gRPC query service port
    #[arg(long, env = "GRPC_PORT", default_value = "50051")]
    grpc_port: u16,

    /// PostgreSQL wire protocol port
    #[arg(long, env = "PG_PORT", default_value = "15432")]
    pg_port: u16,

    /// HTTP management port (health, metrics)
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// OLAP collaborator service address
    #[arg(long, env = "OLAP_ADDR", default_value = "http://localhost:50061")]
    olap_addr: String,

    /// Resolver collaborator service address
    #[arg(long, env = "RESOLVER_ADDR", default_value = "http://localhost:50062")]
    resolver_addr: String,

    /// Instance (tenant) id served by this gateway
    #[arg(long, env = "INSTANCE_ID", default_value = "default")]
    instance_id: String,

    /// Default connector name for the instance
    #[arg(long, env = "CONNECTOR", default_value = "duckdb")]
    connector: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(&args.log_level)?;

    info!("Starting Meridian Gateway");
    info!("  gRPC port: {}", args.grpc_port);
    info!("  PostgreSQL port: {}", args.pg_port);
    info!("  HTTP port: {}", args.http_port);
    info!("  OLAP address: {}", args.olap_addr);
    info!("  Resolver address: {}", args.resolver_addr);

    metrics::init_metrics();

    let runtime = Arc::new(Runtime::new(Arc::new(AllowAllAuthorizer)));

    let mut engines: HashMap<String, Arc<dyn OlapEngine>> = HashMap::new();
    engines.insert(
        args.connector.clone(),
        Arc::new(RemoteOlapEngine::new(&args.connector, &args.olap_addr)),
    );
    runtime.register_instance(InstanceOptions {
        instance_id: args.instance_id.clone(),
        variables: guardrail_vars_from_env(),
        default_connector: args.connector.clone(),
        engines,
        resolver: Arc::new(RemoteResolver::new(&args.resolver_addr)),
        catalog: CatalogSnapshot::default(),
    });
    info!(instance_id = %args.instance_id, "instance registered");

    let activity: Arc<dyn ActivityClient> = Arc::new(LoggingActivityClient);

    // gRPC query service
    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", args.grpc_port).parse()?;
    let service = GatewayService::new(runtime.clone(), activity).into_server();
    let grpc_handle = tokio::spawn(async move {
        info!("gRPC server listening on {}", grpc_addr);
        if let Err(err) = tonic::transport::Server::builder()
            .add_service(service)
            .serve(grpc_addr)
            .await
        {
            error!("gRPC server error: {}", err);
        }
    });

    // PostgreSQL wire protocol server
    let pg_runtime = runtime.clone();
    let pg_port = args.pg_port;
    let pg_handle = tokio::spawn(async move {
        let server = PgServer::new(pg_port, pg_runtime);
        if let Err(err) = server.start().await {
            error!("PostgreSQL server error: {}", err);
        }
    });

    // HTTP management endpoints
    let http_addr: SocketAddr = format!("0.0.0.0:{}", args.http_port).parse()?;
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics));
    let http_handle = tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .expect("failed to bind HTTP listener");
        if let Err(err) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", err);
        }
    });

    info!("Meridian Gateway started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down Meridian Gateway");
        }
        _ = grpc_handle => {}
        _ = pg_handle => {}
        _ = http_handle => {}
    }

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn prometheus_metrics() -> String {
    metrics::encode_metrics()
}

/// Guardrail limits for the default instance come from the environment and
/// land in the instance variables under their canonical keys.
fn guardrail_vars_from_env() -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (env_key, var_key) in [
        (
            "MERIDIAN_SOFT_LIMIT_BYTES_SCANNED",
            guardrails::SOFT_LIMIT_BYTES_VAR,
        ),
        (
            "MERIDIAN_HARD_LIMIT_BYTES_SCANNED",
            guardrails::HARD_LIMIT_BYTES_VAR,
        ),
        (
            "MERIDIAN_SOFT_LIMIT_RUNTIME_MS",
            guardrails::SOFT_LIMIT_RUNTIME_VAR,
        ),
        (
            "MERIDIAN_HARD_LIMIT_RUNTIME_MS",
            guardrails::HARD_LIMIT_RUNTIME_VAR,
        ),
    ] {
        if let Ok(value) = std::env::var(env_key) {
            vars.insert(var_key.to_string(), value);
        }
    }
    vars
}
