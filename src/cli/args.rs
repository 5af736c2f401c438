use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetrec")]
#[command(about = "Record meetings (microphone + system audio), then transcribe and summarize them", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Start recording a meeting
    Start(StartCliArgs),
    /// Stop the current recording, then transcribe and summarize it
    Stop(StopCliArgs),
    /// Show whether a recording is in progress
    Status,
    /// Transcribe and summarize an existing meeting folder
    Process(ProcessCliArgs),
    /// List recorded meetings
    List(ListCliArgs),
    /// Check prerequisites and clean up after crashed sessions
    Doctor(DoctorCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct StartCliArgs {
    /// Meeting name, used in the folder name
    #[arg(short, long)]
    pub name: Option<String>,
    /// Record in the foreground until Ctrl+C, then process immediately
    #[arg(long)]
    pub sync: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StopCliArgs {
    /// Only stop the recording; skip transcription and summary
    #[arg(long)]
    pub no_process: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ProcessCliArgs {
    /// Meeting folder containing recording.wav
    pub meeting_dir: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct ListCliArgs {
    /// Maximum number of meetings to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(ClapArgs, Debug)]
pub struct DoctorCliArgs {
    /// Remove a stale session record and leftover routing devices
    #[arg(long)]
    pub fix: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_with_name() {
        let cli = Cli::try_parse_from(["meetrec", "start", "-n", "standup", "--sync"]).unwrap();
        match cli.command {
            CliCommand::Start(args) => {
                assert_eq!(args.name.as_deref(), Some("standup"));
                assert!(args.sync);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["meetrec", "stop", "-v", "--no-process"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, CliCommand::Stop(StopCliArgs { no_process: true })));
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["meetrec"]).is_err());
    }
}
