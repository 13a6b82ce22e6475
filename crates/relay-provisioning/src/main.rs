//! Relay provisioning - command line entry point.
//!
//! ```text
//! relay-provisioning register-account [name]
//! relay-provisioning register-device [name] [--manual]
//! ```

use clap::{Parser, Subcommand};
use relay_provisioning::{
    config::Config, DeviceOptions, ProvisionReady, Provisioner, WebSocketConnector,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Relay account bootstrap and device linking
#[derive(Parser, Debug)]
#[command(name = "relay-provisioning")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Create a new account and its first device
    RegisterAccount {
        /// Device name. Defaults to the configured device name.
        name: Option<String>,
    },
    /// Link this client as an additional device of an existing account
    RegisterDevice {
        /// Device name. Defaults to the configured device name.
        name: Option<String>,

        /// Do not ask the directory to forward the link request
        #[arg(long)]
        manual: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let provisioner = config.provisioner(Arc::new(WebSocketConnector::new()));

    let result = match cli.command {
        Command::RegisterAccount { name } => {
            let name = name.unwrap_or_else(|| config.device.name.clone());
            register_account(&provisioner, &name).await
        }
        Command::RegisterDevice { name, manual } => {
            let name = name.unwrap_or_else(|| config.device.name.clone());
            let auto_provision = config.device.auto_provision && !manual;
            register_device(&provisioner, &name, auto_provision).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn register_account(provisioner: &Provisioner, name: &str) -> anyhow::Result<()> {
    info!("Registering new account");
    let credentials = provisioner.register_account(None, name).await?;
    println!("{}", credentials.username());
    Ok(())
}

async fn register_device(
    provisioner: &Provisioner,
    name: &str,
    auto_provision: bool,
) -> anyhow::Result<()> {
    info!(auto_provision, "Linking device");

    let ready = ProvisionReady::new(|uuid, key| {
        println!("Link session ready");
        println!("  uuid: {}", uuid);
        println!("  key:  {}", key);
    });
    let options = DeviceOptions::new(name)
        .auto_provision(auto_provision)
        .on_provision_ready(ready);

    let handle = provisioner.register_device(None, options).await?;
    let canceller = handle.canceller();

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling device link");
            canceller.cancel().await;
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();

    let credentials = outcome?;
    println!("{}", credentials.username());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_register_device_flags() {
        let cli = Cli::try_parse_from(["relay-provisioning", "register-device", "laptop", "--manual"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::RegisterDevice {
                name: Some("laptop".into()),
                manual: true,
            }
        );

        let cli = Cli::try_parse_from(["relay-provisioning", "register-device"]).unwrap();
        assert_eq!(
            cli.command,
            Command::RegisterDevice {
                name: None,
                manual: false,
            }
        );
    }

    #[test]
    fn test_misspelled_flag_is_rejected() {
        let err = Cli::try_parse_from(["relay-provisioning", "register-device", "--manaul"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_register_account_name_is_optional() {
        let cli = Cli::try_parse_from(["relay-provisioning", "register-account"]).unwrap();
        assert_eq!(cli.command, Command::RegisterAccount { name: None });

        let cli = Cli::try_parse_from(["relay-provisioning", "register-account", "desk"]).unwrap();
        assert_eq!(
            cli.command,
            Command::RegisterAccount {
                name: Some("desk".into())
            }
        );
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["relay-provisioning"]).is_err());
        assert!(Cli::try_parse_from(["relay-provisioning", "--manual"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
