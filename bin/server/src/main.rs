use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use herald_auth::{Argon2Auth, AuthStorage};
use herald_core::dashboard::{self, Dashboard};
use herald_core::data_access::DataAccess;
use herald_core::directory::NewIdentity;
use herald_core::relay::SimulatedBot;
use herald_web::RequestHandler;
use local_store::LocalStore;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "HERALD_HOST", default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, env = "HERALD_PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "HERALD_DB", id = "CONNECTION URL", help = "Database connection url. Format: postgresql://[user[:password]@][host][:port][/dbname][?param1=value1&...]")]
    db: Option<String>,
    #[arg(long, env = "HERALD_STORE", conflicts_with = "CONNECTION URL", help = "Keep all data in this JSON file instead of a database")]
    store: Option<PathBuf>,
    #[arg(long, conflicts_with_all = ["CONNECTION URL", "store"], help = "Keep all data in memory, lost on shutdown")]
    mock: bool,
    #[arg(long, env = "HERALD_ADMIN_PASSWORD", default_value = dashboard::DEFAULT_ADMIN_PASSWORD, help = "Password of the admin account seeded into an empty directory")]
    admin_password: String,
    #[arg(long, help = "Don't seed the demo user account")]
    no_demo_user: bool,
    #[arg(long, help = "Log as JSON lines")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let addr = format!("{}:{}", args.host, args.port);
    let accounts = dashboard::default_accounts(&args.admin_password, !args.no_demo_user);
    let cancellation_token = make_cancellation_token();

    if args.mock {
        info!("Using in-memory storage");
        run_server(mock_db::Db::new(), &addr, accounts, cancellation_token).await?;
    } else if let Some(path) = args.store {
        info!(path = %path.display(), "Using local store");
        let store = LocalStore::open(&path)
            .await
            .with_context(|| format!("Couldn't open local store {}", path.display()))?;
        run_server(store, &addr, accounts, cancellation_token).await?;
    } else {
        let db_connection = args.db.context("Database connection url must be specified (or pass --store/--mock)")?;
        let db_access = postgres_db::Db::new(&db_connection).await?;
        db_access.check_migrations().await?;
        let db_graceful_shutdown = db_access.graceful_shutdown(cancellation_token.clone());

        run_server(db_access, &addr, accounts, cancellation_token).await?;

        db_graceful_shutdown.await.context("Join error in thread handling database connection shutdown")?;
    }

    Ok(())
}

async fn run_server<T: DataAccess + AuthStorage>(
    data_access: T,
    addr: &str,
    accounts: Vec<NewIdentity>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let auth = Argon2Auth::new(data_access.clone());
    let app = Dashboard::new(data_access, auth, SimulatedBot::new());
    app.bootstrap(accounts).await.context("Couldn't seed default accounts")?;

    let relay = app.relay.clone().spawn(&app.events);
    let request_handler = RequestHandler::new(app);
    http_server::server::run_server(addr, request_handler, cancellation_token)
        .await
        .with_context(|| format!("Unable to start server at {addr}"))?;

    relay.abort();
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let res = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = res {
        eprintln!("Unable to set up logging: {e}");
    }
}

fn make_cancellation_token() -> CancellationToken {
    let cancellation_token = CancellationToken::new();

    let cloned_token = cancellation_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(err) => error!("Unable to listen for shutdown signal: {err}"),
        };
        cloned_token.cancel();
    });

    cancellation_token
}
