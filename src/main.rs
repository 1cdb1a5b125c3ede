use clap::Parser;
use colored::Colorize;

use postback_tracker::cli::{Cli, Commands};
use postback_tracker::config::{self, DEFAULT_CONFIG_PATH};
use postback_tracker::system::{RunMode, init_logging, install_panic_hook};

#[actix_web::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    config::init_config_from(cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
    let config = config::get_config();

    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {}", "Failed to initialize logging:".red().bold(), e);
            std::process::exit(1);
        }
    };

    match cli.command {
        None | Some(Commands::Serve) => {
            install_panic_hook(RunMode::Server);
            if let Err(e) = postback_tracker::runtime::modes::run_server().await {
                eprintln!("{} {:#}", "Server error:".red().bold(), e);
                std::process::exit(1);
            }
        }
        Some(cmd) => {
            install_panic_hook(RunMode::Cli);
            if let Err(e) = postback_tracker::runtime::modes::run_cli(cmd).await {
                eprintln!("{}", e.format_colored());
                std::process::exit(1);
            }
        }
    }
}
