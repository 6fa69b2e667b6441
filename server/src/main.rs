use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use server::trace::read_trace;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "server.toml")]
    config: PathBuf,

    /// Host to bind to, overrides the config file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulation ticks per second
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Maximum concurrent clients
    #[arg(short, long)]
    max_clients: Option<usize>,

    /// Record every message to the configured trace file
    #[arg(long)]
    trace: bool,

    /// Print the records of a trace file and exit
    #[arg(long, value_name = "PATH")]
    dump_trace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    if let Some(path) = &args.dump_trace {
        let records = read_trace(path)?;
        for record in &records {
            println!("{}", record);
        }
        info!("{} records in {}", records.len(), path.display());
        return Ok(());
    }

    let mut config = ServerConfig::load(&args.config)?;

    if args.host.is_some() || args.port.is_some() {
        let current = config.socket_addr()?;
        let host = args.host.unwrap_or_else(|| current.ip().to_string());
        let port = args.port.unwrap_or(current.port());
        config.listen_address = format!("{}:{}", host, port);
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    config.trace_network |= args.trace;

    let map = config.load_map()?;
    info!(
        "Starting server on {} with map {} at {} Hz",
        config.listen_address, map.map_id, config.tick_rate
    );

    let mut server = Server::bind(config, map).await?;
    server.run().await?;

    Ok(())
}
