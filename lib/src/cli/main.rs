// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for managing Ledger devices

use std::path::PathBuf;

use clap::Parser;
use futures::StreamExt;
use log::{debug, error, info, LevelFilter};

use ledger_dmk::{
    actions::OpenAppFlow,
    apdu::prelude::{CloseApp, GetAppAndVersion, GetOsVersion},
    dmk_core::{engine::ActionState, InternalApi, SendOptions},
    session::SessionId,
    DeviceManager, DmkConfig, Error, Filter,
};

mod helpers;
use helpers::*;

/// Ledger device management utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Supported transports for ledger discovery
    #[clap(long, value_enum, default_value = "any")]
    target: Filter,

    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// JSON configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch the running application
    AppInfo,

    /// Fetch device OS version (from the dashboard)
    OsVersion,

    /// Open an application, closing any other running application
    OpenApp {
        /// Application name
        #[clap(long)]
        name: String,
    },

    /// Close the running application
    CloseApp,

    /// Exchange a raw APDU
    Apdu {
        /// Hex encoded APDU (CLA INS P1 P2 [LC DATA])
        #[clap(long)]
        hex: HexApdu,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    // Load configuration
    let config = match &args.config {
        Some(p) => DmkConfig::load(p).await?,
        None => DmkConfig::default(),
    };

    debug!("Using config: {:?}", config);

    let m = DeviceManager::new(config)?;

    debug!("Using transport: {:?}", args.target);

    // List available devices
    let devices = m.list_devices(args.target).await;
    if devices.is_empty() {
        return Err(Error::NoDevice.into());
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        return Ok(());
    }

    // Select device by index
    if args.device_index >= devices.len() {
        return Err(anyhow::anyhow!(
            "Invalid device index: {} (max: {})",
            args.device_index,
            devices.len() - 1
        ));
    }

    let d = &devices[args.device_index];

    debug!("Using device {}: {}", args.device_index, d);

    // Connect to device
    let id = match m.connect(d).await {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to connect to device: {}", d);
            return Err(e.into());
        }
    };

    // Execute command
    let r = execute(&m, id, args.cmd).await;

    m.close().await;

    r
}

/// Execute a command against the provided session
async fn execute(m: &DeviceManager, id: SessionId, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        Actions::AppInfo => {
            let i = m.send_command(id, &GetAppAndVersion).await?;

            info!("app info: {:#?}", i);
        }
        Actions::OsVersion => {
            let v = m.send_command(id, &GetOsVersion).await?;

            info!("os version: {:#?}", v);
        }
        Actions::OpenApp { name } => {
            info!("Opening application '{}'", name);

            let h = m.execute(id, OpenAppFlow::new(&name))?;
            let mut s = h.subscribe();

            while let Some(v) = s.next().await {
                match v {
                    Ok(ActionState::Pending(i)) => info!("pending: {}", i),
                    Ok(ActionState::Completed(a)) => info!("opened: {}", a),
                    Ok(ActionState::Error(e)) => return Err(e.into()),
                    Ok(ActionState::Stopped) => return Err(anyhow::anyhow!("Action stopped")),
                    Err(f) => return Err(f.into()),
                }
            }
        }
        Actions::CloseApp => {
            m.send_command(id, &CloseApp).await?;

            info!("Application closed");
        }
        Actions::Apdu { hex: apdu } => {
            let s = m.session(id)?;

            info!("sending apdu: {}", apdu.as_ref());

            let r = s.send_apdu(apdu.as_ref(), SendOptions::default()).await?;

            info!("status: {}", r.status_word());
            info!("data: {}", hex::encode(&r.data));
        }
        Actions::List => unreachable!(),
    }

    Ok(())
}
