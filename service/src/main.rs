use std::net::SocketAddr;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "filegate-service")]
struct Args {
    /// Bind address, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// SQLite database file path (created if missing)
    #[arg(long)]
    sqlite: std::path::PathBuf,

    /// Policy file path (.toml or .json), parsed as filegate_core::policy::GatePolicy.
    #[arg(long)]
    policy: std::path::PathBuf,

    /// Serve every request as an anonymous guest without checking tokens.
    #[arg(long, default_value_t = false)]
    unsafe_no_auth: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let policy = filegate_service::policy_io::load_policy(&args.policy)?;
    if args.unsafe_no_auth {
        tracing::warn!("authentication is disabled; every request runs as a guest");
    }

    let app = filegate_service::server::build_app(args.sqlite, policy, args.unsafe_no_auth)?;
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, "filegate-service listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
