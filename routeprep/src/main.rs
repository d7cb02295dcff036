use clap::Parser;
use routeprep::config::{AppConfig, CliOptions};
use routeprep::{download, pipeline};

fn main() {
    let cli = CliOptions::parse();

    let default_filter = if cli.debug_mode { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.srtm || cli.gmted {
        let kind = if cli.srtm { "srtm" } else { "gmted" };
        log::info!("downloading {kind} tiles, this might take a while");
        if let Err(e) = download::download_tiles(kind) {
            log::error!("{e}");
            std::process::exit(3);
        }
        return;
    }

    let config = match AppConfig::resolve(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("run with --help for usage");
            std::process::exit(1);
        }
    };

    if config.debug_mode {
        log::debug!("{config:?}");
    }

    if let Err(e) = pipeline::run(&config) {
        log::error!("{e}");
        std::process::exit(3);
    }
}
