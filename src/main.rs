use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{debug, error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

mod api;
mod blockchain;
mod config;

use blockchain::{HttpPeerClient, MinerSettings, Node, PeerClient, Wallet};
use config::NodeConfig;

/// Proof-of-work blockchain node
#[derive(Debug, Parser)]
#[command(name = "powchain", version, about)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer base URL, may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Seed a new chain with this node's address
    #[arg(long)]
    genesis: bool,

    /// Required leading zeros in block hashes
    #[arg(long)]
    difficulty: Option<usize>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref())?;

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(difficulty) = self.difficulty {
            config.difficulty = difficulty;
        }
        config.genesis |= self.genesis;
        config.peers.extend(self.peers);

        config.validate()?;
        Ok(config)
    }
}

fn load_identity(config: &NodeConfig) -> anyhow::Result<Wallet> {
    match &config.secret_key {
        Some(secret) => Wallet::from_secret_hex(secret).context("invalid secret_key in config"),
        None => {
            let wallet = Wallet::new();
            debug!("Generated identity, set secret_key = \"{}\" to reuse it", wallet.secret_key_hex());
            Ok(wallet)
        }
    }
}

// The nonce search is CPU bound, so it gets its own thread and runtime
fn spawn_miner(node: Arc<Node>, settings: MinerSettings) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("miner".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("Failed to start miner runtime: {}", err);
                return;
            }
        };

        if let Err(err) = runtime.block_on(node.run_node(settings)) {
            error!("Mining stopped: {}", err);
        }
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_blocks,
        api::handlers::new_transaction,
        api::handlers::new_block,
        api::handlers::create_transaction,
        api::handlers::add_client,
        api::handlers::get_balance,
        api::handlers::get_balance_of,
        api::handlers::get_pending_transactions,
        api::handlers::get_peers
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::SignedTransaction,
            blockchain::PeerStatus,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::schema::TransactionSignalForm,
            api::schema::BlockSignalForm,
            api::schema::CreateTransactionForm,
            api::schema::AddClientForm,
            api::schema::BalanceResponse,
            api::schema::AddClientResponse
        )
    ),
    tags(
        (name = "node", description = "Proof-of-work node endpoints")
    ),
    info(
        title = "Node API",
        version = "0.1.0",
        description = "Gossip and status endpoints of a proof-of-work node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Cli::parse().into_config()?;
    let wallet = load_identity(&config)?;
    info!("Node address: {}", wallet.address());

    let client: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(config.peer_timeout())?);
    let node = Arc::new(Node::new(wallet, config.difficulty, config.genesis, client)?);
    if config.genesis {
        info!("Seeded chain with genesis address {}", node.address());
    }

    for peer in &config.peers {
        node.peers().register(peer);
    }
    if !node.peers().is_empty() {
        let syncing = node.clone();
        actix_web::rt::spawn(async move {
            syncing.sync_with_peers().await;
        });
    }

    spawn_miner(node.clone(), config.miner_settings()).context("failed to spawn miner thread")?;

    let bind = (config.host.clone(), config.port);
    info!("Starting HTTP server at {}", config.public_url());

    let node_data = web::Data::from(node);
    let config_data = web::Data::new(config);

    HttpServer::new(move || {
        // The browser form posts from another origin
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node_data.clone())
            .app_data(config_data.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
