use clap::Parser;

use demoterm::cli::Cli;
use demoterm::client::{SessionController, TerminalView};
use demoterm::session::Session;
use demoterm::telemetry;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_config())?;

    let config = cli.config();
    let (cols, rows) = TerminalView::size();
    let session = Session::new(&cli.slug, cols, rows)?;

    let controller = SessionController::new(&config, session)?;
    controller.run().await?;
    Ok(())
}
