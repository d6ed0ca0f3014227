use deck_logs::{cli::Cli, config::Config, errors::AppResult};

#[tokio::main]
async fn main() -> AppResult<()> {
    deck_logs::logging::init();

    let cli = <Cli as clap::Parser>::parse();
    let config = Config::try_from(cli)?;

    deck_logs::run(config).await
}
