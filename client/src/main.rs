use clap::Parser;
use client::bot::{Bot, BotSettings};
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:11900")]
    server: String,

    /// Number of bots to run
    #[arg(short = 'n', long, default_value = "1")]
    bots: usize,

    /// Stop after this many seconds (runs until ctrl-c if omitted)
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Milliseconds between position updates
    #[arg(short = 'i', long, default_value = "100")]
    move_interval: u64,

    /// Movement speed in units per second
    #[arg(long, default_value = "300")]
    speed: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let settings = BotSettings {
        move_interval: Duration::from_millis(args.move_interval.max(1)),
        speed: args.speed,
        ..BotSettings::default()
    };
    let duration = args.duration.map(Duration::from_secs);

    info!("Starting {} bot(s) against {}", args.bots, args.server);

    let mut tasks = Vec::with_capacity(args.bots);
    for index in 0..args.bots {
        let server = args.server.clone();
        let settings = settings.clone();
        tasks.push(tokio::spawn(async move {
            let mut bot = Bot::connect(&server, settings).await?;
            let master = bot.handshake(Duration::from_secs(10)).await?;
            info!("Bot {} joined as {}", index, master);
            bot.run(duration).await
        }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping bots");
        }
        _ = async {
            for (index, task) in tasks.iter_mut().enumerate() {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Bot {} failed: {}", index, e),
                    Err(e) => error!("Bot {} panicked: {}", index, e),
                }
            }
        } => {}
    }

    Ok(())
}
