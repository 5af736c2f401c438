use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::mixer::AudioMixer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
}

/// Read the header of a WAV recording.
pub fn inspect_recording(path: &Path) -> Result<RecordingInfo> {
    let reader =
        WavReader::open(path).with_context(|| format!("Failed to open recording {:?}", path))?;
    let spec = reader.spec();
    let frames = u64::from(reader.duration());
    let duration = if spec.sample_rate == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(frames * 1000 / u64::from(spec.sample_rate))
    };

    Ok(RecordingInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration,
    })
}

fn open_mono_track(path: &Path) -> Result<WavReader<BufReader<File>>> {
    let reader =
        WavReader::open(path).with_context(|| format!("Failed to open track {:?}", path))?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
    {
        bail!(
            "Track {:?} must be mono 16-bit PCM (got {} channel(s), {}-bit {:?})",
            path,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    Ok(reader)
}

/// Mix the system and microphone tracks of a dual-stream recording into `output`.
pub fn merge_tracks(system: &Path, mic: &Path, output: &Path) -> Result<()> {
    let mut system_reader = open_mono_track(system)?;
    let mut mic_reader = open_mono_track(mic)?;

    let system_rate = system_reader.spec().sample_rate;
    let mic_rate = mic_reader.spec().sample_rate;
    if system_rate != mic_rate {
        bail!(
            "Tracks have different sample rates ({} Hz system, {} Hz mic)",
            system_rate,
            mic_rate
        );
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: system_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output, spec)
        .with_context(|| format!("Failed to create {:?}", output))?;

    let mut written: u64 = 0;
    for sample in AudioMixer::mix_pair(system_reader.samples::<i16>(), mic_reader.samples::<i16>())
    {
        writer.write_sample(sample.context("Failed to read track samples")?)?;
        written += 1;
    }
    writer.finalize().context("Failed to finalize merged recording")?;

    info!("Merged tracks into {:?} ({} samples)", output, written);
    Ok(())
}
