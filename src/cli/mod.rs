use anyhow::Result;

pub mod args;
pub mod doctor;
pub mod history;
pub mod meeting;

pub use args::{Cli, CliCommand};

use crate::config::Config;

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Version => {
            println!("meetrec {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Status => meeting::handle_status(),
        CliCommand::Start(args) => meeting::handle_start(args, &Config::load()?).await,
        CliCommand::Stop(args) => meeting::handle_stop(args, &Config::load()?).await,
        CliCommand::Process(args) => meeting::handle_process(args, &Config::load()?).await,
        CliCommand::List(args) => history::handle_list_command(args, &Config::load()?),
        CliCommand::Doctor(args) => doctor::handle_doctor_command(args, &Config::load()?).await,
    }
}
