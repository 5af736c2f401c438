use anyhow::Result;

use crate::config::Config;
use crate::history::list_meetings;

use super::args::ListCliArgs;

pub fn handle_list_command(args: ListCliArgs, config: &Config) -> Result<()> {
    let meetings_dir = config.meetings_path();
    let meetings = list_meetings(&meetings_dir, args.limit)?;

    if meetings.is_empty() {
        println!("No meetings found in {}", meetings_dir.display());
        return Ok(());
    }

    println!("{:<44} {:^10} {:^7}", "MEETING", "TRANSCRIPT", "SUMMARY");
    for meeting in meetings {
        println!(
            "{:<44} {:^10} {:^7}",
            meeting.name,
            mark(meeting.has_transcript),
            mark(meeting.has_summary)
        );
    }
    Ok(())
}

fn mark(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "-"
    }
}
