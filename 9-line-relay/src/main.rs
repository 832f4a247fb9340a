use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use line_relay::{
    cli::{Cli, Command},
    hub::Hub,
    relay::Relay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Hub(args) => {
            let config = args.config();
            let listener = TcpListener::bind(config.listen).await?;
            let addr = listener.local_addr()?;
            info!("hub listening on {}", addr);
            let hub = Hub::with_config(&config);
            if let Err(err) = hub.run_until_ctrl_c(listener).await {
                warn!("hub exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Relay(args) => {
            info!("bridging {} to {}", args.upstream, args.hub);
            let relay = Relay::connect(args.upstream(), args.hub()).await?;
            let report = relay.run().await;
            info!(
                "relay done: {} lines upstream->hub, {} lines hub->upstream",
                report.a_to_b.forwarded, report.b_to_a.forwarded
            );
        }
    }

    Ok(())
}
