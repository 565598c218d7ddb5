//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Operator CLI for interacting with a running ezmb bus."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Parser, Subcommand};
use ezmb_logging as logging;

mod bus;
mod validate;

#[derive(Debug, Parser)]
#[command(author, version, about = "ezmb operator utility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Publish a payload to the relay's north address")]
    Publish(bus::PublishArgs),
    #[command(about = "Print frames from the relay's south address")]
    Subscribe(bus::SubscribeArgs),
    #[command(about = "Run an endpoint that sends back every payload it receives")]
    Echo(bus::EchoArgs),
    #[command(about = "Load a port descriptor file and print the result")]
    Validate(validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Publish(args) => bus::publish(args).await?,
        Commands::Subscribe(args) => bus::subscribe(args).await?,
        Commands::Echo(args) => bus::echo(args).await?,
        Commands::Validate(args) => validate::run(args)?,
    }
    Ok(())
}
