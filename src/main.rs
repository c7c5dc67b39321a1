use std::path::PathBuf;

use clap::Parser;
use wa_bootstrap::bootstrap::persist_creds_on_update;
use wa_bootstrap::{bootstrap, init_subscriber, BootstrapConfig};

/// Load a WhatsApp Web auth folder and build a client socket.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Folder holding creds.json and the key files.
    #[arg(long, env = "WA_AUTH_DIR", default_value = "auth_info_multi")]
    auth_dir: PathBuf,

    /// Verbosity of the key cache logger (trace, debug, info, warn, error, silent).
    #[arg(long, default_value = "debug")]
    log_level: String,

    /// Open the connection and run the handshake once.
    #[arg(long)]
    connect: bool,

    /// Override the WebSocket endpoint.
    #[arg(long)]
    ws_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> BootstrapConfig {
        let mut config = BootstrapConfig::default()
            .with_auth_dir(self.auth_dir)
            .with_log_level(self.log_level)
            .with_connect(self.connect);
        if let Some(url) = self.ws_url {
            config = config.with_ws_url(url);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config();
    init_subscriber(&config.log_level)?;

    let session = bootstrap(&config)?;
    let listener = tokio::spawn(persist_creds_on_update(
        session.socket.subscribe(),
        session.save_creds.clone(),
        session.logger.clone(),
    ));

    if config.connect {
        let result = session.socket.connect().await;
        session.socket.end(None).await;
        result?;
    }

    session.save_creds.save()?;
    println!("Credentials stored at {}", session.save_creds.path().display());

    drop(session);
    if let Err(e) = listener.await {
        log::error!("credentials listener failed: {e}");
    }
    Ok(())
}
