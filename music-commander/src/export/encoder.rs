//! Encode/copy/skip decision engine and ffmpeg invocation.

use crate::annex::repo::is_present;
use crate::export::presets::{
    codec_accepts, is_lossless_target, is_lossy_codec, stream_copy_preset_for, FormatPreset,
};
use crate::export::probe::{find_cover_art, probe_source, SourceInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-file export status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Ok,
    Copied,
    Skipped,
    Error,
    NotPresent,
}

/// What the engine actually did with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportAction {
    Encoded,
    FileCopied,
    StreamCopy,
    Skipped,
}

/// Result of exporting a single file, as serialized into reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    /// Repo-relative source path.
    pub source: String,
    /// Final output file name.
    pub output: String,
    pub status: ExportStatus,
    pub preset: String,
    pub action: ExportAction,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Outcome of the per-file decision step.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Preset actually applied; differs from the requested preset on
    /// the guarded lossy path.
    pub preset: &'static FormatPreset,
    pub stream_copy: bool,
    /// True when the lossy-to-lossless guard fired; post-processing is
    /// skipped on this path.
    pub guarded: bool,
}

/// True when the source already satisfies the preset: codec equivalent
/// and every sample-rate/bit-depth/channel constraint met.
pub fn can_copy(source: &SourceInfo, preset: &FormatPreset) -> bool {
    if !codec_accepts(preset.codec, &source.codec_name) {
        return false;
    }
    if let Some(rate) = preset.sample_rate {
        if source.sample_rate != rate {
            return false;
        }
    }
    if let Some(depth) = preset.bit_depth {
        if source.bit_depth != depth {
            return false;
        }
    }
    if let Some(channels) = preset.channels {
        if source.channels != channels {
            return false;
        }
    }
    true
}

/// Decide how to reach the target preset from a probed source.
///
/// Lossy sources are never upconverted to a lossless target: the guard
/// swaps in a stream-copy preset matching the source codec so only
/// metadata is rewritten.
pub fn decide(source: &SourceInfo, requested: &'static FormatPreset) -> Decision {
    if is_lossy_codec(&source.codec_name) && is_lossless_target(requested) {
        warn!(
            "source is {} (lossy), keeping it instead of converting to {}",
            source.codec_name, requested.name
        );
        let preset = stream_copy_preset_for(&source.codec_name).unwrap_or(requested);
        return Decision {
            preset,
            stream_copy: true,
            guarded: true,
        };
    }
    if can_copy(source, requested) {
        return Decision {
            preset: requested,
            stream_copy: true,
            guarded: false,
        };
    }
    Decision {
        preset: requested,
        stream_copy: false,
        guarded: false,
    }
}

/// Incremental skip: target exists and is at least as new as the
/// source.
pub fn should_skip(source: &Path, output: &Path, force: bool) -> bool {
    if force || !output.exists() {
        return false;
    }
    let (Ok(source_meta), Ok(output_meta)) = (source.metadata(), output.metadata()) else {
        return false;
    };
    match (source_meta.modified(), output_meta.modified()) {
        (Ok(source_mtime), Ok(output_mtime)) => source_mtime <= output_mtime,
        _ => false,
    }
}

/// Full-encode codec selection: uncompressed presets without a bit
/// depth constraint follow a high-resolution source up to 24 bits.
fn select_codec(preset: &FormatPreset, source: &SourceInfo, stream_copy: bool) -> String {
    if stream_copy {
        return "copy".to_string();
    }
    if preset.bit_depth.is_none() && source.bit_depth >= 24 {
        match preset.codec {
            "pcm_s16be" => return "pcm_s24be".to_string(),
            "pcm_s16le" => return "pcm_s24le".to_string(),
            _ => {}
        }
    }
    preset.codec.to_string()
}

/// Build the ffmpeg argument vector for one conversion.
pub fn build_ffmpeg_command(
    input: &Path,
    output: &Path,
    preset: &FormatPreset,
    source: &SourceInfo,
    cover: Option<&Path>,
    stream_copy: bool,
) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "ffmpeg".into(),
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];

    let external_cover = if preset.supports_cover_art && !source.has_cover_art {
        cover
    } else {
        None
    };
    if let Some(cover_path) = external_cover {
        cmd.push("-i".into());
        cmd.push(cover_path.to_string_lossy().into_owned());
    }

    cmd.push("-map".into());
    cmd.push("0:a".into());
    if preset.supports_cover_art {
        if source.has_cover_art {
            cmd.push("-map".into());
            cmd.push("0:v".into());
        } else if external_cover.is_some() {
            cmd.push("-map".into());
            cmd.push("1:0".into());
            cmd.push("-disposition:v:0".into());
            cmd.push("attached_pic".into());
        }
    }

    cmd.push("-map_metadata".into());
    cmd.push("0".into());

    cmd.push("-codec:a".into());
    cmd.push(select_codec(preset, source, stream_copy));

    if !stream_copy {
        cmd.extend(preset.ffmpeg_args.iter().map(|a| a.to_string()));
    }

    cmd.push(output.to_string_lossy().into_owned());
    cmd
}

fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let end = bytes.len().min(limit);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Sibling temp path keeping the container extension so the muxer is
/// still inferred correctly.
fn temp_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    let ext = output
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    output.with_file_name(format!("{stem}.tmp{ext}"))
}

async fn run_external(argv: &[String]) -> std::io::Result<(i32, Vec<u8>)> {
    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    match tokio::time::timeout(FFMPEG_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) => Ok((out.status.code().unwrap_or(-1), out.stderr)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok((-1, b"timed out".to_vec())),
    }
}

/// Export one file to `output` under `preset`.
///
/// The transcoder writes to a sibling temp path which is atomically
/// renamed on success; a failing run deletes the temp file and records
/// an error with the first 500 bytes of stderr.
pub async fn export_file(
    source: &Path,
    output: &Path,
    requested: &'static FormatPreset,
    repo_root: &Path,
) -> ExportResult {
    let started = std::time::Instant::now();
    let rel_source = source
        .strip_prefix(repo_root)
        .unwrap_or(source)
        .to_string_lossy()
        .into_owned();

    let mut result = ExportResult {
        source: rel_source,
        output: output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        status: ExportStatus::Error,
        preset: requested.name.to_string(),
        action: ExportAction::Encoded,
        duration_seconds: 0.0,
        error_message: None,
    };

    if !source.exists() || !is_present(source) {
        result.status = ExportStatus::NotPresent;
        result.action = ExportAction::Skipped;
        return result;
    }

    let source_info = match probe_source(source).await {
        Ok(info) => info,
        Err(e) => {
            result.error_message = Some(format!("probe failed: {e}"));
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }
    };

    let decision = decide(&source_info, requested);

    // The guard keeps the source format; rewrite the output extension
    // to match what will actually be produced.
    let output = if decision.guarded {
        let container = if decision.preset.name == requested.name {
            // Unknown lossy codec: keep the source's own extension.
            source
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| decision.preset.container.to_string())
        } else {
            decision.preset.container.to_string()
        };
        let renamed = output.with_extension(container.trim_start_matches('.'));
        result.output = renamed
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        renamed
    } else {
        output.to_path_buf()
    };

    let external_cover = if decision.preset.supports_cover_art && !source_info.has_cover_art {
        find_cover_art(source)
    } else {
        None
    };

    if let Some(parent) = output.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            result.error_message = Some(format!("creating output directory: {e}"));
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }
    }

    // Exact copy: stream-copyable, nothing to retag or embed.
    if decision.stream_copy && !decision.guarded && external_cover.is_none() {
        return match std::fs::copy(source, &output) {
            Ok(_) => {
                result.status = ExportStatus::Copied;
                result.action = ExportAction::FileCopied;
                result.duration_seconds = started.elapsed().as_secs_f64();
                result
            }
            Err(e) => {
                result.error_message = Some(format!("copy failed: {e}"));
                result.duration_seconds = started.elapsed().as_secs_f64();
                result
            }
        };
    }

    let temp_path = temp_output_path(&output);
    let argv = build_ffmpeg_command(
        source,
        &temp_path,
        decision.preset,
        &source_info,
        external_cover.as_deref(),
        decision.stream_copy,
    );
    debug!("running: {}", argv.join(" "));

    match run_external(&argv).await {
        Ok((0, _)) => {}
        Ok((code, stderr)) => {
            let _ = std::fs::remove_file(&temp_path);
            result.error_message = Some(format!(
                "ffmpeg failed with exit code {code}: {}",
                truncate_lossy(&stderr, 500)
            ));
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            result.error_message = Some(format!("failed to run ffmpeg: {e}"));
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }
    }

    if let Err(e) = std::fs::rename(&temp_path, &output) {
        let _ = std::fs::remove_file(&temp_path);
        result.error_message = Some(format!("renaming output: {e}"));
        result.duration_seconds = started.elapsed().as_secs_f64();
        return result;
    }

    // Post-processing is skipped on the guarded path: the output is in
    // the source's own format, not the preset's.
    if !decision.guarded {
        for post in decision.preset.post_commands {
            let mut argv: Vec<String> = post.iter().map(|a| a.to_string()).collect();
            argv.push(output.to_string_lossy().into_owned());
            match run_external(&argv).await {
                Ok((0, _)) => {}
                Ok((code, stderr)) => {
                    result.error_message = Some(format!(
                        "{} failed with exit code {code}: {}",
                        post[0],
                        truncate_lossy(&stderr, 500)
                    ));
                    result.duration_seconds = started.elapsed().as_secs_f64();
                    return result;
                }
                Err(e) => {
                    result.error_message = Some(format!("failed to run {}: {e}", post[0]));
                    result.duration_seconds = started.elapsed().as_secs_f64();
                    return result;
                }
            }
        }
    }

    result.status = ExportStatus::Ok;
    result.action = if decision.stream_copy {
        ExportAction::StreamCopy
    } else {
        ExportAction::Encoded
    };
    result.duration_seconds = started.elapsed().as_secs_f64();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::presets::{AIFF, FLAC_PIONEER, MP3_320, WAV};

    fn source(codec: &str, rate: u32, depth: u32, channels: u32, art: bool) -> SourceInfo {
        SourceInfo {
            codec_name: codec.into(),
            sample_rate: rate,
            bit_depth: depth,
            channels,
            has_cover_art: art,
        }
    }

    #[test]
    fn can_copy_exact_match() {
        assert!(can_copy(&source("mp3", 44100, 16, 2, false), &MP3_320));
    }

    #[test]
    fn can_copy_rejects_codec_mismatch() {
        assert!(!can_copy(&source("flac", 44100, 16, 2, false), &MP3_320));
    }

    #[test]
    fn can_copy_rejects_constraint_mismatches() {
        assert!(!can_copy(&source("flac", 96000, 16, 2, false), &FLAC_PIONEER));
        assert!(!can_copy(&source("flac", 44100, 24, 2, false), &FLAC_PIONEER));
        assert!(!can_copy(&source("flac", 44100, 16, 6, false), &FLAC_PIONEER));
        assert!(can_copy(&source("flac", 44100, 16, 2, false), &FLAC_PIONEER));
    }

    #[test]
    fn lossy_to_lossless_guard_keeps_source_codec() {
        let decision = decide(&source("mp3", 44100, 16, 2, false), &FLAC_PIONEER);
        assert!(decision.guarded);
        assert!(decision.stream_copy);
        assert_eq!(decision.preset.name, "mp3-320");
    }

    #[test]
    fn lossless_source_encodes_to_lossless_target() {
        let decision = decide(&source("flac", 96000, 24, 2, false), &FLAC_PIONEER);
        assert!(!decision.guarded);
        assert!(!decision.stream_copy);
        assert_eq!(decision.preset.name, "flac-pioneer");
    }

    #[test]
    fn matching_source_stream_copies() {
        let decision = decide(&source("mp3", 44100, 16, 2, false), &MP3_320);
        assert!(!decision.guarded);
        assert!(decision.stream_copy);
    }

    #[test]
    fn full_encode_command_carries_preset_args() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.flac"),
            Path::new("/out.mp3"),
            &MP3_320,
            &source("flac", 44100, 16, 2, false),
            None,
            false,
        );
        assert_eq!(cmd[0], "ffmpeg");
        assert!(cmd.contains(&"-codec:a".into()));
        assert!(cmd.contains(&"libmp3lame".into()));
        assert!(cmd.contains(&"-b:a".into()));
        assert!(cmd.contains(&"320k".into()));
        assert!(cmd.contains(&"-map_metadata".into()));
    }

    #[test]
    fn external_cover_maps_as_attached_pic() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.flac"),
            Path::new("/out.mp3"),
            &MP3_320,
            &source("flac", 44100, 16, 2, false),
            Some(Path::new("/cover.jpg")),
            false,
        );
        assert_eq!(cmd.iter().filter(|a| *a == "-i").count(), 2);
        assert!(cmd.contains(&"1:0".into()));
        assert!(cmd.contains(&"-disposition:v:0".into()));
        assert!(cmd.contains(&"attached_pic".into()));
    }

    #[test]
    fn embedded_art_maps_source_video() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.flac"),
            Path::new("/out.mp3"),
            &MP3_320,
            &source("flac", 44100, 16, 2, true),
            None,
            false,
        );
        assert!(cmd.contains(&"0:v".into()));
        assert_eq!(cmd.iter().filter(|a| *a == "-i").count(), 1);
    }

    #[test]
    fn stream_copy_uses_copy_codec() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.mp3"),
            Path::new("/out.mp3"),
            &MP3_320,
            &source("mp3", 44100, 16, 2, false),
            None,
            true,
        );
        let codec_idx = cmd.iter().position(|a| a == "-codec:a").unwrap();
        assert_eq!(cmd[codec_idx + 1], "copy");
        // Preset encoder args are dropped on stream copy.
        assert!(!cmd.contains(&"-b:a".into()));
    }

    #[test]
    fn flac_pioneer_encode_pins_format() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.flac"),
            Path::new("/out.flac"),
            &FLAC_PIONEER,
            &source("flac", 96000, 24, 2, false),
            None,
            false,
        );
        assert!(cmd.contains(&"-sample_fmt".into()));
        assert!(cmd.contains(&"s16".into()));
        assert!(cmd.contains(&"-ar".into()));
        assert!(cmd.contains(&"44100".into()));
        assert!(cmd.contains(&"-ac".into()));
        assert!(cmd.contains(&"2".into()));
    }

    #[test]
    fn aiff_follows_24bit_source() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.aiff"),
            Path::new("/out.aiff"),
            &AIFF,
            &source("pcm_s24be", 44100, 24, 2, false),
            None,
            false,
        );
        let codec_idx = cmd.iter().position(|a| a == "-codec:a").unwrap();
        assert_eq!(cmd[codec_idx + 1], "pcm_s24be");
    }

    #[test]
    fn wav_never_maps_cover_art() {
        let cmd = build_ffmpeg_command(
            Path::new("/in.wav"),
            Path::new("/out.wav"),
            &WAV,
            &source("pcm_s16le", 44100, 16, 2, false),
            Some(Path::new("/cover.jpg")),
            false,
        );
        assert_eq!(cmd.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!cmd.contains(&"attached_pic".into()));
    }

    #[test]
    fn temp_path_keeps_extension() {
        assert_eq!(
            temp_output_path(Path::new("/x/track.mp3")),
            PathBuf::from("/x/track.tmp.mp3")
        );
    }

    #[test]
    fn skip_logic_compares_mtimes() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("in.mp3");
        let output = dir.path().join("out.mp3");
        std::fs::write(&source, b"a").unwrap();

        assert!(!should_skip(&source, &output, false), "no output yet");

        std::fs::write(&output, b"b").unwrap();
        assert!(should_skip(&source, &output, false), "output is newer");
        assert!(!should_skip(&source, &output, true), "force wins");
    }

    #[tokio::test]
    async fn missing_source_reports_not_present() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = export_file(
            &dir.path().join("ghost.flac"),
            &dir.path().join("out.mp3"),
            &MP3_320,
            dir.path(),
        )
        .await;
        assert_eq!(result.status, ExportStatus::NotPresent);
    }
}
