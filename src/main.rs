mod cli;

use clap::Parser;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    cli::init_tracing(cli.verbose);
    cli::run(cli).await
}
