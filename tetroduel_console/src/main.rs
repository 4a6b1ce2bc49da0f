#![forbid(unsafe_code)]
#![cfg_attr(feature = "strict", deny(warnings))]

mod client_main;
mod server_config;
mod server_main;

use anyhow::Context;
use clap::{arg, Command};
use server_config::ServerConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let matches = Command::new("Tetroduel")
        .version(clap::crate_version!())
        .about("Tetroduel match server and console client")
        .subcommand_required(true)
        .subcommand(
            Command::new("server").about("Run the match server").arg(
                arg!(-c --config <config_file> "Path to the configuration file: yaml-serialized ServerConfig"),
            ),
        )
        .subcommand(
            Command::new("client")
                .about("Run the console test client")
                .arg(arg!(<server_address> "Server address"))
                .arg(arg!(<player_name> "Player name")),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("server", sub)) => {
            let config = match sub.get_one::<String>("config") {
                Some(path) => {
                    let content = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read config file '{}'", path))?;
                    serde_yaml::from_str(&content)
                        .with_context(|| format!("Failed to parse config file '{}'", path))?
                }
                None => ServerConfig::default(),
            };
            server_main::run(config)
        }
        Some(("client", sub)) => {
            let server_address = sub.get_one::<String>("server_address").unwrap();
            let player_name = sub.get_one::<String>("player_name").unwrap();
            client_main::run(server_address, player_name)
        }
        _ => unreachable!("Subcommand required"),
    }
}
