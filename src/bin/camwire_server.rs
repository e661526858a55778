use std::{
    error::Error,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, mpsc},
};

use camwire::{
    App, ServerConfig,
    camera::{CameraHandle, SimulatedCamera},
};
use clap::Parser;
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen for new connections at address
    #[arg(short, long)]
    address: Option<SocketAddr>,
    /// Outgoing messages buffered per client
    #[arg(long)]
    queue_capacity: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = capacity;
    }
    config.validate()?;

    let camera = Arc::new(SimulatedCamera::new(config.camera.simulated()));
    let mut app = App::start(config, CameraHandle::new(camera))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    rx.recv()?;
    info!("interrupted");
    app.shutdown();
    Ok(())
}
