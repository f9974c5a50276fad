use clap::{Args, Parser, Subcommand};
use keeper_map::coordination::handlers::{KeeperServerState, router};
use keeper_map::coordination::memory::MemoryKeeper;
use keeper_map::coordination::remote::RemoteConnector;
use keeper_map::table::{
    BincodeCodec, EngineSettings, KeeperMap, KeeperMapEngine, ReadRequest, TableSettings,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type StringTable = KeeperMap<BincodeCodec<String, String>>;

#[derive(Parser, Debug)]
#[command(name = "keeper-map", about = "Key-value tables stored in a keeper tree")]
struct Cli {
    /// Log at DEBUG instead of INFO.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an in-memory keeper over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7181")]
        bind: SocketAddr,
        #[arg(long, default_value_t = 10_000)]
        session_timeout_ms: u64,
    },
    /// Register the table, creating its root if needed.
    Create(TableArgs),
    Put {
        #[command(flatten)]
        table: TableArgs,
        key: String,
        value: String,
    },
    Get {
        #[command(flatten)]
        table: TableArgs,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Scan {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, default_value_t = 4)]
        parallelism: usize,
    },
    Delete {
        #[command(flatten)]
        table: TableArgs,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Truncate(TableArgs),
    Drop(TableArgs),
    Count(TableArgs),
}

#[derive(Args, Debug)]
struct TableArgs {
    /// Base URL of the keeper server.
    #[arg(long, env = "KEEPER_MAP_URL", default_value = "http://127.0.0.1:7181")]
    keeper: String,
    /// Engine settings JSON file.
    #[arg(long, env = "KEEPER_MAP_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "KEEPER_MAP_PATH_PREFIX")]
    path_prefix: Option<String>,
    #[arg(long)]
    operation_timeout_ms: Option<u64>,
    #[arg(long)]
    root_path: String,
    #[arg(long, default_value_t = 0)]
    keys_limit: u64,
    /// Stable table id; together with the server id it names this instance.
    #[arg(long)]
    table_id: Uuid,
    #[arg(long, env = "KEEPER_MAP_SERVER_ID")]
    server_id: Option<Uuid>,
}

impl TableArgs {
    fn engine_settings(&self) -> anyhow::Result<EngineSettings> {
        let mut settings = match &self.config {
            Some(path) => EngineSettings::from_json_file(path)?,
            None => EngineSettings::default(),
        };
        if let Some(prefix) = &self.path_prefix {
            settings.path_prefix = Some(prefix.clone());
        }
        if let Some(timeout) = self.operation_timeout_ms {
            settings.operation_timeout_ms = timeout;
        }
        Ok(settings)
    }

    fn engine(&self) -> anyhow::Result<KeeperMapEngine> {
        let settings = self.engine_settings()?;
        let connector = Arc::new(RemoteConnector::new(
            &self.keeper,
            settings.operation_timeout(),
        ));
        Ok(KeeperMapEngine::new(settings, connector)
            .with_server_id(self.server_id.unwrap_or_else(Uuid::nil)))
    }

    fn table_settings(&self) -> TableSettings {
        TableSettings::new(&self.root_path).with_keys_limit(self.keys_limit)
    }

    async fn create(&self) -> anyhow::Result<StringTable> {
        let table = self
            .engine()?
            .create_table(self.table_id, &self.table_settings(), BincodeCodec::new())
            .await?;
        Ok(table)
    }

    async fn attach(&self) -> anyhow::Result<StringTable> {
        let table = self
            .engine()?
            .attach_table(self.table_id, &self.table_settings(), BincodeCodec::new())
            .await?;
        Ok(table)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match cli.command {
        Command::Serve {
            bind,
            session_timeout_ms,
        } => serve(bind, Duration::from_millis(session_timeout_ms)).await?,
        Command::Create(args) => {
            let table = args.create().await?;
            println!("created {}", table.layout().table);
        }
        Command::Put { table, key, value } => {
            let summary = table.attach().await?.write(&[(key, value)]).await?;
            println!("inserted={} updated={}", summary.inserted, summary.updated);
        }
        Command::Get { table, keys } => {
            let (rows, presence) = table.attach().await?.get_by_keys(&keys).await?;
            for ((key, value), found) in rows.into_iter().zip(presence) {
                if found {
                    println!("{}\t{}", key, value);
                }
            }
        }
        Command::Scan { table, parallelism } => {
            let rows = table
                .attach()
                .await?
                .read(ReadRequest::FullScan, parallelism)
                .await?;
            for (key, value) in rows {
                println!("{}\t{}", key, value);
            }
        }
        Command::Delete { table, keys } => {
            let removed = table.attach().await?.delete(&keys).await?;
            println!("deleted {}", removed);
        }
        Command::Truncate(args) => {
            args.attach().await?.truncate().await?;
            println!("truncated");
        }
        Command::Drop(args) => {
            let outcome = args.attach().await?.drop_table().await?;
            println!("{:?}", outcome);
        }
        Command::Count(args) => {
            println!("{}", args.attach().await?.key_count().await?);
        }
    }

    Ok(())
}

async fn serve(bind: SocketAddr, session_timeout: Duration) -> anyhow::Result<()> {
    let keeper = MemoryKeeper::new();
    let reaper = keeper.spawn_session_reaper(session_timeout);
    let app = router(KeeperServerState::new(keeper, session_timeout));

    tracing::info!("Keeper listening on {}", bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let served = axum::serve(listener, app).await;
    reaper.abort();
    served?;
    Ok(())
}
