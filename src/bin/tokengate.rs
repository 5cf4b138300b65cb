use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokengate::{
    AdmissionGate, FileKeyStore, GatewayConfig, GatewayHttpState, SystemClock, TextEncoder,
    UpstreamClient, UsageLedger, UsageRecorder,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().ok_or(
        "usage: tokengate <config.json> [--listen HOST:PORT] [--keys PATH] [--ledger-dir PATH] [--json-logs]",
    )?;

    let mut listen_override: Option<String> = None;
    let mut keys_override: Option<std::path::PathBuf> = None;
    let mut ledger_override: Option<std::path::PathBuf> = None;
    let mut json_logs = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen_override = Some(args.next().ok_or("missing value for --listen/--addr")?);
            }
            "--keys" => {
                keys_override = Some(args.next().ok_or("missing value for --keys")?.into());
            }
            "--ledger-dir" => {
                ledger_override = Some(args.next().ok_or("missing value for --ledger-dir")?.into());
            }
            "--json-logs" => {
                json_logs = true;
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    init_tracing(json_logs);

    let mut config = GatewayConfig::load(&config_path)?;
    if let Some(listen) = listen_override {
        config.listen = listen;
    }
    if let Some(keys) = keys_override {
        config.keys_file = keys;
    }
    if let Some(ledger_dir) = ledger_override {
        config.ledger_dir = ledger_dir;
    }

    let encoder = Arc::new(TextEncoder::new());
    let keys = Arc::new(FileKeyStore::load(&config.keys_file)?);
    let ledger = Arc::new(UsageLedger::new(&config.ledger_dir)?);
    let upstream = UpstreamClient::new(
        &config.upstream_base_url,
        &config.upstream_api_key,
        Duration::from_secs(config.upstream_timeout_seconds),
    )?;

    let gate = AdmissionGate::new(
        keys.clone(),
        ledger.clone(),
        config.rate_limit.clone(),
        encoder.clone(),
        Arc::new(SystemClock),
    );
    let recorder = UsageRecorder::new(ledger, keys, encoder);
    let state = GatewayHttpState::new(gate, upstream, recorder);
    let app = tokengate::http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(listen = %config.listen, upstream = %config.upstream_base_url, "tokengate listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
