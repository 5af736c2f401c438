//! CLI handlers for the recording lifecycle: start, stop, status, process.

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::audio::inspect_recording;
use crate::capture::{process, FfmpegRecorder};
use crate::config::Config;
use crate::meeting::{
    FileSessionStore, MeetingMachine, MeetingPipeline, SessionRecord, SessionStore, StartOptions,
    RECORDING_FILE,
};
use crate::routing::PulseRouter;

use super::args::{ProcessCliArgs, StartCliArgs, StopCliArgs};

fn build_machine(config: &Config) -> Result<MeetingMachine> {
    Ok(MeetingMachine::new(
        Box::new(PulseRouter::new(&config.routing)),
        Box::new(FfmpegRecorder::new(&config.recording)),
        Box::new(FileSessionStore::default_location()?),
        config.meetings_path(),
        config.folder_template.clone(),
    )
    .with_capture_mode(config.recording.capture_mode))
}

pub async fn handle_start(args: StartCliArgs, config: &Config) -> Result<()> {
    let machine = build_machine(config)?;
    let options = StartOptions {
        name: args.name,
        sync: args.sync,
    };

    if !options.sync {
        let record = machine.start(options).await?;
        println!("Recording started: {}", record.meeting_name());
        println!("Folder: {}", record.meeting_dir.display());
        println!("Run 'meetrec stop' when the meeting is over.");
        return Ok(());
    }

    println!("Recording... press Ctrl+C to stop.");
    let record = machine.start(options).await?;
    let duration = record.elapsed();
    print_saved(&record, duration);
    process_recording(config, &record.meeting_dir, &record.audio_path, duration).await
}

pub async fn handle_stop(args: StopCliArgs, config: &Config) -> Result<()> {
    let machine = build_machine(config)?;
    let record = machine.stop().await?;
    let duration = record.elapsed();
    print_saved(&record, duration);

    if args.no_process {
        println!(
            "Skipping processing. Run 'meetrec process {}' later.",
            record.meeting_dir.display()
        );
        return Ok(());
    }
    process_recording(config, &record.meeting_dir, &record.audio_path, duration).await
}

pub fn handle_status() -> Result<()> {
    let store = FileSessionStore::default_location()?;
    let Some(record) = store.read()? else {
        println!("No recording in progress.");
        return Ok(());
    };

    println!("Recording in progress: {}", record.meeting_name());
    println!("Started:  {}", record.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Elapsed:  {}", format_duration(record.elapsed()));
    println!("Mode:     {}", record.capture_mode.as_str());
    println!("Folder:   {}", record.meeting_dir.display());
    for handle in record.process.iter().chain(record.mic_process.iter()) {
        let state = if process::is_running(handle.pid) {
            "running"
        } else {
            "not running (run 'meetrec doctor --fix')"
        };
        println!("Process:  {} (pid {}) {}", handle.program, handle.pid, state);
    }
    Ok(())
}

pub async fn handle_process(args: ProcessCliArgs, config: &Config) -> Result<()> {
    let audio_path = args.meeting_dir.join(RECORDING_FILE);
    if !audio_path.is_file() {
        bail!("No {} found in {}", RECORDING_FILE, args.meeting_dir.display());
    }

    let duration = match inspect_recording(&audio_path) {
        Ok(info) => info.duration,
        Err(e) => {
            warn!("Could not read recording length: {:#}", e);
            Duration::ZERO
        }
    };
    process_recording(config, &args.meeting_dir, &audio_path, duration).await
}

async fn process_recording(
    config: &Config,
    meeting_dir: &Path,
    audio_path: &Path,
    duration: Duration,
) -> Result<()> {
    let pipeline = MeetingPipeline::from_config(config)?;
    let pb = create_spinner();

    let work = pipeline.process_with_progress(meeting_dir, audio_path, duration.as_secs(), |stage| {
        pb.set_message(format!("{}...", stage.as_str()));
    });
    // The recording phase may have taken over SIGINT, so Ctrl+C is listened for here too.
    let result = until_interrupted(work, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    pb.finish_and_clear();

    let processed = match result {
        Ok(processed) => processed,
        Err(e) => {
            eprintln!(
                "The recording is kept. Retry with: meetrec process {}",
                meeting_dir.display()
            );
            return Err(e);
        }
    };

    println!("Transcript: {}", processed.transcript_path.display());
    println!("Summary:    {}", processed.summary_path.display());
    Ok(())
}

async fn until_interrupted<T>(
    work: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        result = work => result,
        _ = interrupt => bail!("Processing interrupted"),
    }
}

fn print_saved(record: &SessionRecord, duration: Duration) {
    println!(
        "Recording saved ({}): {}",
        format_duration(duration),
        record.audio_path.display()
    );
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_cancels_processing() {
        let err = until_interrupted(std::future::pending::<Result<()>>(), async {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_processing_finishes_without_interrupt() {
        let value = until_interrupted(async { Ok(7) }, std::future::pending())
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
