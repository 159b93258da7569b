//! Per-file check execution: tool invocation with timeouts, internal
//! validators, auxiliary warnings, and status aggregation.

use crate::annex::repo::is_present;
use crate::check::registry::{
    get_checkers_for_file, CheckerSpec, FileResolution, InternalValidator, ToolOutput, ToolResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Per-tool timeout; integrity checks decode whole files.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Classification of one checked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
    NotPresent,
    CheckerMissing,
    Skipped,
}

/// Result of checking a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Repo-relative path.
    pub file: String,
    pub status: CheckStatus,
    pub tools: Vec<String>,
    pub errors: Vec<ToolResult>,
    #[serde(default)]
    pub warnings: Vec<ToolResult>,
}

impl CheckResult {
    fn bare(file: String, status: CheckStatus) -> Self {
        Self {
            file,
            status,
            tools: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

fn tool_cache() -> &'static Mutex<HashMap<String, bool>> {
    static CACHE: OnceLock<Mutex<HashMap<String, bool>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn find_on_path(tool: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(tool).is_file())
}

/// Whether a tool exists on PATH, resolved once per run.
pub fn check_tool_available(tool: &str) -> bool {
    let mut cache = tool_cache().lock().expect("tool cache poisoned");
    *cache
        .entry(tool.to_string())
        .or_insert_with(|| find_on_path(tool))
}

#[cfg(test)]
pub fn clear_tool_cache() {
    tool_cache().lock().expect("tool cache poisoned").clear();
}

/// Run one checker tool against a file with a bounded timeout.
async fn run_tool(spec: &CheckerSpec, file: &Path, repo_root: &Path) -> ToolResult {
    let mut cmd = tokio::process::Command::new(spec.program);
    cmd.args(spec.args_before)
        .arg(file)
        .args(spec.args_after)
        .current_dir(repo_root)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    debug!("running checker: {} {}", spec.program, file.display());
    let invocation = async {
        cmd.output()
            .await
            .map(|out| ToolOutput {
                exit_code: out.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            })
    };

    match tokio::time::timeout(TOOL_TIMEOUT, invocation).await {
        Ok(Ok(output)) => (spec.parse)(&output),
        Ok(Err(e)) => ToolResult {
            tool: spec.name.into(),
            success: false,
            exit_code: -1,
            output: format!("failed to run checker: {e}"),
        },
        Err(_) => ToolResult {
            tool: spec.name.into(),
            success: false,
            exit_code: -1,
            output: format!("Checker timed out after {} seconds", TOOL_TIMEOUT.as_secs()),
        },
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1 (every byte maps to a
/// code point, so old CUE sheets always decode).
fn decode_text_latin1_fallback(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Validate a CUE sheet in-process: it must carry at least one `FILE`
/// and one `TRACK` directive.
pub fn validate_cue_file(path: &Path) -> ToolResult {
    let content = match std::fs::read(path) {
        Ok(bytes) => decode_text_latin1_fallback(&bytes),
        Err(e) => {
            return ToolResult {
                tool: "cue-validator".into(),
                success: false,
                exit_code: -1,
                output: format!("failed to read file: {e}"),
            }
        }
    };

    let has_file = content.lines().any(|l| l.trim_start().starts_with("FILE"));
    let has_track = content.lines().any(|l| l.trim_start().starts_with("TRACK"));

    let mut missing = Vec::new();
    if !has_file {
        missing.push("FILE");
    }
    if !has_track {
        missing.push("TRACK");
    }

    ToolResult {
        tool: "cue-validator".into(),
        success: missing.is_empty(),
        exit_code: if missing.is_empty() { 0 } else { 1 },
        output: if missing.is_empty() {
            String::new()
        } else {
            format!("missing {} directive(s)", missing.join(" and "))
        },
    }
}

/// Pioneer players refuse stereo FLAC files carrying a
/// `WAVEFORMATEXTENSIBLE_CHANNEL_MASK` tag; flag them as a warning.
pub async fn check_flac_multichannel(path: &Path, repo_root: &Path) -> Option<ToolResult> {
    if !check_tool_available("metaflac") {
        return None;
    }

    let channels = tokio::process::Command::new("metaflac")
        .arg("--show-channels")
        .arg(path)
        .current_dir(repo_root)
        .output()
        .await
        .ok()?;
    if !channels.status.success() {
        return None;
    }
    let channel_count = String::from_utf8_lossy(&channels.stdout).trim().to_string();
    if channel_count != "2" {
        return None;
    }

    let tag = tokio::process::Command::new("metaflac")
        .arg("--show-tag=WAVEFORMATEXTENSIBLE_CHANNEL_MASK")
        .arg(path)
        .current_dir(repo_root)
        .output()
        .await
        .ok()?;
    let tag_output = String::from_utf8_lossy(&tag.stdout).trim().to_string();
    if tag_output.is_empty() {
        return None;
    }

    let mask = tag_output
        .split_once('=')
        .map(|(_, v)| v.trim())
        .unwrap_or(&tag_output)
        .to_string();
    Some(ToolResult {
        tool: "flac-multichannel".into(),
        success: true,
        exit_code: 0,
        output: format!(
            "stereo file has WAVEFORMATEXTENSIBLE_CHANNEL_MASK={mask} set; \
             Pioneer hardware refuses such files"
        ),
    })
}

/// Options for a single file check.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckFileOptions {
    pub flac_multichannel_check: bool,
}

/// Check one file end-to-end: resolve its checker group, invoke every
/// available tool, and aggregate a status.
pub async fn check_file(
    file: &Path,
    repo_root: &Path,
    options: CheckFileOptions,
) -> CheckResult {
    let rel_path = file
        .strip_prefix(repo_root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned();

    if !file.exists() || !is_present(file) {
        return CheckResult::bare(rel_path, CheckStatus::NotPresent);
    }

    let group = match get_checkers_for_file(file) {
        FileResolution::Group(group) => group,
        FileResolution::Skipped => return CheckResult::bare(rel_path, CheckStatus::Skipped),
    };

    let mut tools_used = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut missing_tools = Vec::new();

    if let Some(InternalValidator::Cue) = group.internal_validator {
        let result = validate_cue_file(file);
        tools_used.push(result.tool.clone());
        if !result.success {
            errors.push(result);
        }
    }

    for spec in group.checkers {
        if !check_tool_available(spec.program) {
            missing_tools.push(spec.program.to_string());
            continue;
        }
        let result = run_tool(spec, file, repo_root).await;
        tools_used.push(spec.name.to_string());
        if !result.success {
            errors.push(result);
        }
    }

    if tools_used.is_empty() && !missing_tools.is_empty() {
        missing_tools.sort();
        missing_tools.dedup();
        let mut result = CheckResult::bare(rel_path, CheckStatus::CheckerMissing);
        result.tools = missing_tools;
        return result;
    }

    let is_flac = file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase() == "flac")
        .unwrap_or(false);
    if options.flac_multichannel_check && is_flac {
        if let Some(warning) = check_flac_multichannel(file, repo_root).await {
            tools_used.push(warning.tool.clone());
            warnings.push(warning);
        }
    }

    let status = if !errors.is_empty() {
        CheckStatus::Error
    } else if !warnings.is_empty() {
        CheckStatus::Warning
    } else {
        CheckStatus::Ok
    };

    CheckResult {
        file: rel_path,
        status,
        tools: tools_used,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn valid_cue_sheet_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("album.cue");
        std::fs::write(
            &path,
            "PERFORMER \"Artist\"\nFILE \"album.wav\" WAVE\n  TRACK 01 AUDIO\n",
        )
        .unwrap();
        let result = validate_cue_file(&path);
        assert!(result.success);
        assert_eq!(result.tool, "cue-validator");
    }

    #[test]
    fn cue_sheet_missing_file_directive_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.cue");
        std::fs::write(&path, "TRACK 01 AUDIO\n").unwrap();
        let result = validate_cue_file(&path);
        assert!(!result.success);
        assert!(result.output.contains("FILE"));
    }

    #[test]
    fn cue_sheet_missing_track_directive_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.cue");
        std::fs::write(&path, "FILE \"album.wav\" WAVE\n").unwrap();
        let result = validate_cue_file(&path);
        assert!(!result.success);
        assert!(result.output.contains("TRACK"));
    }

    #[test]
    fn cue_sheet_missing_both_directives_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.cue");
        std::fs::write(&path, "REM nothing here\n").unwrap();
        let result = validate_cue_file(&path);
        assert!(!result.success);
        assert!(result.output.contains("FILE and TRACK"));
    }

    #[test]
    fn latin1_cue_sheet_still_decodes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.cue");
        // "Café" in Latin-1, not valid UTF-8
        let mut content = b"PERFORMER \"Caf\xe9\"\nFILE \"a.wav\" WAVE\nTRACK 01 AUDIO\n".to_vec();
        content.push(b'\n');
        std::fs::write(&path, content).unwrap();
        let result = validate_cue_file(&path);
        assert!(result.success);
    }

    #[tokio::test]
    async fn missing_file_reports_not_present() {
        let dir = TempDir::new().unwrap();
        let result = check_file(
            &dir.path().join("ghost.flac"),
            dir.path(),
            CheckFileOptions::default(),
        )
        .await;
        assert_eq!(result.status, CheckStatus::NotPresent);
        assert!(result.tools.is_empty());
    }

    #[tokio::test]
    async fn non_audio_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readme.txt");
        std::fs::write(&path, "hello\n").unwrap();
        let result = check_file(&path, dir.path(), CheckFileOptions::default()).await;
        assert_eq!(result.status, CheckStatus::Skipped);
    }

    #[tokio::test]
    async fn cue_file_checks_without_external_tools() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("album.cue");
        std::fs::write(&path, "FILE \"a.wav\" WAVE\nTRACK 01 AUDIO\n").unwrap();
        let result = check_file(&path, dir.path(), CheckFileOptions::default()).await;
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.tools, vec!["cue-validator"]);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn unavailable_tools_yield_checker_missing() {
        clear_tool_cache();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.flac");
        std::fs::write(&path, b"fLaC fake").unwrap();

        // Point PATH at an empty directory so no checker resolves.
        let empty = dir.path().join("empty-bin");
        std::fs::create_dir(&empty).unwrap();
        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", &empty);

        let result = check_file(&path, dir.path(), CheckFileOptions::default()).await;

        if let Some(old) = old_path {
            std::env::set_var("PATH", old);
        }
        clear_tool_cache();

        assert_eq!(result.status, CheckStatus::CheckerMissing);
        assert_eq!(result.tools, vec!["flac"]);
    }
}
