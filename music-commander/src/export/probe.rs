//! Source probing via ffprobe: audio parameters, embedded cover art,
//! and tags for template rendering.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed with exit code {0}: {1}")]
    Failed(i32, String),

    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    #[error("ffprobe timed out")]
    Timeout,

    #[error("failed to run ffprobe: {0}")]
    Io(#[from] std::io::Error),
}

/// Probed parameters of a source audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub codec_name: String,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub channels: u32,
    pub has_cover_art: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeStreams {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeStream {
    #[serde(default)]
    codec_name: String,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bits_per_raw_sample: Option<String>,
    sample_fmt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    format: Option<FfprobeTagHolder>,
    #[serde(default)]
    streams: Vec<FfprobeTagHolder>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTagHolder {
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Map ffprobe `sample_fmt` tokens to a bit depth.
fn bit_depth_from_sample_fmt(sample_fmt: &str) -> u32 {
    match sample_fmt {
        "s16" | "s16p" => 16,
        "s24" => 24,
        "s32" | "s32p" | "flt" | "fltp" => 32,
        _ => 16,
    }
}

async fn run_ffprobe(args: &[&str], file: &Path) -> Result<std::process::Output, ProbeError> {
    let mut cmd = tokio::process::Command::new("ffprobe");
    cmd.args(args)
        .arg(file)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    debug!("ffprobe {} {}", args.join(" "), file.display());

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProbeError::Timeout),
    }
}

/// Probe a source file's audio parameters.
///
/// Bit depth is taken from `bits_per_raw_sample` when present, else
/// derived from the `sample_fmt` token.
pub async fn probe_source(file: &Path) -> Result<SourceInfo, ProbeError> {
    let output = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_name,bits_per_raw_sample,sample_fmt,sample_rate,channels",
            "-print_format",
            "json",
        ],
        file,
    )
    .await?;

    if !output.status.success() {
        return Err(ProbeError::Failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let parsed: FfprobeStreams = serde_json::from_slice(&output.stdout)
        .map_err(|e| ProbeError::Parse(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::Parse("no audio stream".into()))?;

    let bit_depth = match stream
        .bits_per_raw_sample
        .as_deref()
        .and_then(|v| v.parse::<u32>().ok())
    {
        Some(bits) if bits > 0 => bits,
        _ => bit_depth_from_sample_fmt(stream.sample_fmt.as_deref().unwrap_or("")),
    };

    // A video stream on an audio file is embedded cover art.
    let art = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-select_streams",
            "v",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "csv=p=0",
        ],
        file,
    )
    .await?;
    let has_cover_art = !String::from_utf8_lossy(&art.stdout).trim().is_empty();

    Ok(SourceInfo {
        codec_name: stream.codec_name,
        sample_rate: stream
            .sample_rate
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        bit_depth,
        channels: stream.channels.unwrap_or(0),
        has_cover_art,
    })
}

/// Read format and stream tags, lower-casing keys. Stream tags fill in
/// whatever the container-level tags lack.
pub async fn probe_tags(file: &Path) -> Result<HashMap<String, String>, ProbeError> {
    let output = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-show_entries",
            "format_tags:stream_tags",
            "-print_format",
            "json",
        ],
        file,
    )
    .await?;

    if !output.status.success() {
        return Err(ProbeError::Failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let parsed: FfprobeTags = serde_json::from_slice(&output.stdout)
        .map_err(|e| ProbeError::Parse(e.to_string()))?;

    let mut tags = HashMap::new();
    for holder in parsed.streams {
        for (key, value) in holder.tags {
            tags.entry(key.to_lowercase()).or_insert(value);
        }
    }
    if let Some(format) = parsed.format {
        for (key, value) in format.tags {
            tags.insert(key.to_lowercase(), value);
        }
    }
    Ok(tags)
}

/// Search the source's directory for external cover art, in priority
/// order, case-insensitively.
pub fn find_cover_art(file: &Path) -> Option<PathBuf> {
    let parent = file.parent()?;
    let entries = std::fs::read_dir(parent).ok()?;

    let mut by_name: HashMap<String, PathBuf> = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            by_name.insert(entry.file_name().to_string_lossy().to_lowercase(), path);
        }
    }

    for candidate in [
        "cover.jpg",
        "cover.png",
        "folder.jpg",
        "folder.png",
        "front.jpg",
        "front.png",
    ] {
        if let Some(path) = by_name.get(candidate) {
            return Some(path.clone());
        }
    }
    None
}
