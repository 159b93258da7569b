//! Checker registry: which tools verify which formats, and how their
//! output is judged.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Captured output of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Judged result of one tool invocation, as serialized into reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
}

/// Where the checked file goes in the tool's argument list.
#[derive(Debug, Clone, Copy)]
pub struct CheckerSpec {
    pub name: &'static str,
    pub program: &'static str,
    /// Arguments before the file path.
    pub args_before: &'static [&'static str],
    /// Arguments after the file path.
    pub args_after: &'static [&'static str],
    pub parse: fn(&ToolOutput) -> ToolResult,
}

/// In-process validators for formats without an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalValidator {
    /// Textual CUE sheet validation.
    Cue,
}

/// A set of checkers covering one family of files.
#[derive(Debug, Clone, Copy)]
pub struct CheckerGroup {
    pub extensions: &'static [&'static str],
    pub mimetypes: &'static [&'static str],
    pub checkers: &'static [CheckerSpec],
    pub internal_validator: Option<InternalValidator>,
}

/// flac test result: success = exit code 0.
pub fn parse_flac_result(output: &ToolOutput) -> ToolResult {
    ToolResult {
        tool: "flac".into(),
        success: output.exit_code == 0,
        exit_code: output.exit_code,
        output: output.stderr.clone(),
    }
}

/// mp3val result: success = no WARNING/PROBLEM lines in stdout.
/// The exit code is unreliable (always 0), so stdout is parsed.
pub fn parse_mp3val_result(output: &ToolOutput) -> ToolResult {
    let has_problems = output
        .stdout
        .lines()
        .any(|line| line.starts_with("WARNING") || line.starts_with("PROBLEM"));
    ToolResult {
        tool: "mp3val".into(),
        success: !has_problems,
        exit_code: output.exit_code,
        output: output.stdout.clone(),
    }
}

/// ffmpeg decode result: success = exit code 0 AND empty stderr.
pub fn parse_ffmpeg_result(output: &ToolOutput) -> ToolResult {
    ToolResult {
        tool: "ffmpeg".into(),
        success: output.exit_code == 0 && output.stderr.trim().is_empty(),
        exit_code: output.exit_code,
        output: output.stderr.clone(),
    }
}

/// shntool len result: the problems column (5th) must be `-`.
///
/// Problem indicators: t (truncated), j (junk), i (inconsistent),
/// a (not aligned), h (non-canonical header).
pub fn parse_shntool_result(output: &ToolOutput) -> ToolResult {
    let mut has_problems = false;
    for line in output.stdout.lines() {
        let lowered = line.to_lowercase();
        if lowered.contains("problems") || line.trim() == "---" || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 5 {
            let problems_field = parts[4];
            if problems_field != "-" && problems_field.chars().any(|c| "tjiah".contains(c)) {
                has_problems = true;
                break;
            }
        }
    }
    ToolResult {
        tool: "shntool".into(),
        success: !has_problems && output.exit_code == 0,
        exit_code: output.exit_code,
        output: output.stdout.clone(),
    }
}

/// sox result: success = exit code 0.
pub fn parse_sox_result(output: &ToolOutput) -> ToolResult {
    ToolResult {
        tool: "sox".into(),
        success: output.exit_code == 0,
        exit_code: output.exit_code,
        output: output.stderr.clone(),
    }
}

/// ogginfo result: success = exit code 0.
pub fn parse_ogginfo_result(output: &ToolOutput) -> ToolResult {
    ToolResult {
        tool: "ogginfo".into(),
        success: output.exit_code == 0,
        exit_code: output.exit_code,
        output: format!("{}{}", output.stdout, output.stderr),
    }
}

pub const FFMPEG_CHECKER: CheckerSpec = CheckerSpec {
    name: "ffmpeg",
    program: "ffmpeg",
    args_before: &["-v", "error", "-i"],
    args_after: &["-f", "null", "-"],
    parse: parse_ffmpeg_result,
};

pub const SOX_CHECKER: CheckerSpec = CheckerSpec {
    name: "sox",
    program: "sox",
    args_before: &[],
    args_after: &["-n", "stat"],
    parse: parse_sox_result,
};

static FLAC_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".flac"],
    mimetypes: &["audio/flac", "audio/x-flac"],
    checkers: &[CheckerSpec {
        name: "flac",
        program: "flac",
        args_before: &["-t", "-s", "-w"],
        args_after: &[],
        parse: parse_flac_result,
    }],
    internal_validator: None,
};

static MP3_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".mp3"],
    mimetypes: &["audio/mpeg"],
    checkers: &[
        CheckerSpec {
            name: "mp3val",
            program: "mp3val",
            args_before: &[],
            args_after: &[],
            parse: parse_mp3val_result,
        },
        FFMPEG_CHECKER,
    ],
    internal_validator: None,
};

static OGG_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".ogg"],
    mimetypes: &["audio/ogg"],
    checkers: &[
        CheckerSpec {
            name: "ogginfo",
            program: "ogginfo",
            args_before: &[],
            args_after: &[],
            parse: parse_ogginfo_result,
        },
        FFMPEG_CHECKER,
    ],
    internal_validator: None,
};

static WAV_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".wav"],
    mimetypes: &["audio/wav", "audio/x-wav", "audio/vnd.wave"],
    checkers: &[
        CheckerSpec {
            name: "shntool",
            program: "shntool",
            args_before: &["len"],
            args_after: &[],
            parse: parse_shntool_result,
        },
        SOX_CHECKER,
    ],
    internal_validator: None,
};

static AIFF_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".aiff", ".aif"],
    mimetypes: &["audio/aiff", "audio/x-aiff"],
    checkers: &[SOX_CHECKER],
    internal_validator: None,
};

static M4A_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".m4a"],
    mimetypes: &["audio/m4a", "audio/mp4", "audio/x-m4a"],
    checkers: &[FFMPEG_CHECKER],
    internal_validator: None,
};

static CUE_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[".cue"],
    mimetypes: &[],
    checkers: &[],
    internal_validator: Some(InternalValidator::Cue),
};

/// Generic decode-only pass for unknown extensions that sniff as audio.
pub static AUDIO_FALLBACK_GROUP: CheckerGroup = CheckerGroup {
    extensions: &[],
    mimetypes: &["audio/*"],
    checkers: &[FFMPEG_CHECKER],
    internal_validator: None,
};

/// All registered groups, in resolution order.
pub static CHECKER_GROUPS: &[&CheckerGroup] = &[
    &FLAC_GROUP,
    &MP3_GROUP,
    &OGG_GROUP,
    &WAV_GROUP,
    &AIFF_GROUP,
    &M4A_GROUP,
    &CUE_GROUP,
];

/// Group lookup by file extension (with leading dot, lowercased).
pub fn get_checkers_for_extension(ext: &str) -> Option<&'static CheckerGroup> {
    let ext = ext.to_lowercase();
    CHECKER_GROUPS
        .iter()
        .copied()
        .find(|g| g.extensions.contains(&ext.as_str()))
}

/// How a file maps onto the registry.
#[derive(Debug, Clone, Copy)]
pub enum FileResolution {
    Group(&'static CheckerGroup),
    /// Not audio; reported as skipped without invoking anything.
    Skipped,
}

fn sniff_mimetype(path: &Path) -> Option<String> {
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|kind| kind.mime_type().to_string())
}

/// Resolve the checker group for a file.
///
/// Known extensions resolve directly; unknown extensions are sniffed,
/// matching either an exact group MIME type, the `audio/*` fallback, or
/// nothing (skipped).
pub fn get_checkers_for_file(path: &Path) -> FileResolution {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    if let Some(group) = get_checkers_for_extension(&ext) {
        return FileResolution::Group(group);
    }

    match sniff_mimetype(path) {
        Some(mime) => {
            if let Some(group) = CHECKER_GROUPS
                .iter()
                .copied()
                .find(|g| g.mimetypes.contains(&mime.as_str()))
            {
                FileResolution::Group(group)
            } else if mime.starts_with("audio/") {
                FileResolution::Group(&AUDIO_FALLBACK_GROUP)
            } else {
                FileResolution::Skipped
            }
        }
        None => FileResolution::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> ToolOutput {
        ToolOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn flac_parser_uses_exit_code() {
        assert!(parse_flac_result(&output(0, "", "test.flac: ok")).success);
        let failed = parse_flac_result(&output(1, "", "ERROR: bad frame"));
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 1);
    }

    #[test]
    fn mp3val_parser_scans_stdout() {
        assert!(parse_mp3val_result(&output(0, "Analyzing file...\nDone!\n", "")).success);
        assert!(!parse_mp3val_result(&output(0, "WARNING: garbage at end\n", "")).success);
        assert!(!parse_mp3val_result(&output(0, "PROBLEM: MPEG stream error\n", "")).success);
    }

    #[test]
    fn ffmpeg_parser_requires_silent_success() {
        assert!(parse_ffmpeg_result(&output(0, "", "")).success);
        assert!(!parse_ffmpeg_result(&output(1, "", "")).success);
        assert!(!parse_ffmpeg_result(&output(0, "", "corrupt frame at 12:34")).success);
    }

    #[test]
    fn shntool_parser_reads_problems_column() {
        let clean = "length  expanded size  cdr  WAVE problems  fmt  ratio  filename\n\
                     5:30.00  58320044  cdr  WAVE  -  wav  0.551  test.wav\n";
        assert!(parse_shntool_result(&output(0, clean, "")).success);

        let truncated = "5:30.00  58320044  cdr  WAVE  t  wav  0.551  bad.wav\n";
        assert!(!parse_shntool_result(&output(0, truncated, "")).success);
    }

    #[test]
    fn sox_and_ogginfo_parsers_use_exit_codes() {
        assert!(parse_sox_result(&output(0, "", "stats")).success);
        assert!(!parse_sox_result(&output(2, "", "FAIL formats")).success);
        assert!(parse_ogginfo_result(&output(0, "Processing file", "")).success);
        assert!(!parse_ogginfo_result(&output(1, "", "not an Ogg")).success);
    }

    #[test]
    fn registry_covers_expected_extensions() {
        assert_eq!(get_checkers_for_extension(".flac").unwrap().checkers[0].name, "flac");
        let mp3 = get_checkers_for_extension(".mp3").unwrap();
        assert_eq!(mp3.checkers.len(), 2);
        assert_eq!(mp3.checkers[1].name, "ffmpeg");
        assert_eq!(get_checkers_for_extension(".ogg").unwrap().checkers[0].name, "ogginfo");
        assert_eq!(get_checkers_for_extension(".wav").unwrap().checkers[0].name, "shntool");
        assert!(get_checkers_for_extension(".m4a").is_some());
        assert!(get_checkers_for_extension(".unknown").is_none());
    }

    #[test]
    fn aiff_and_aif_share_sox() {
        let aiff = get_checkers_for_extension(".aiff").unwrap();
        let aif = get_checkers_for_extension(".aif").unwrap();
        assert_eq!(aiff.checkers[0].name, "sox");
        assert_eq!(aif.checkers[0].name, "sox");
    }

    #[test]
    fn cue_group_is_internal() {
        let cue = get_checkers_for_extension(".cue").unwrap();
        assert!(cue.checkers.is_empty());
        assert_eq!(cue.internal_validator, Some(InternalValidator::Cue));
    }

    #[test]
    fn fallback_group_is_audio_star() {
        assert!(AUDIO_FALLBACK_GROUP.mimetypes.contains(&"audio/*"));
        assert_eq!(AUDIO_FALLBACK_GROUP.checkers[0].name, "ffmpeg");
    }

    #[test]
    fn every_group_names_extensions_or_mimetypes() {
        for group in CHECKER_GROUPS {
            assert!(!group.extensions.is_empty() || !group.mimetypes.is_empty());
        }
    }

    #[test]
    fn known_extension_resolves_without_sniffing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("track.flac");
        std::fs::write(&path, b"not really flac").unwrap();
        match get_checkers_for_file(&path) {
            FileResolution::Group(group) => assert_eq!(group.checkers[0].name, "flac"),
            FileResolution::Skipped => panic!("expected flac group"),
        }
    }

    #[test]
    fn unknown_extension_non_audio_content_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.xyz");
        std::fs::write(&path, b"#!/bin/sh\necho hello\n").unwrap();
        assert!(matches!(get_checkers_for_file(&path), FileResolution::Skipped));
    }

    #[test]
    fn unknown_extension_flac_magic_resolves_to_flac_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mystery.bin");
        // fLaC magic followed by padding
        let mut content = b"fLaC".to_vec();
        content.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, content).unwrap();
        match get_checkers_for_file(&path) {
            FileResolution::Group(group) => {
                assert_eq!(group.checkers[0].name, "flac");
            }
            FileResolution::Skipped => panic!("expected flac group via MIME"),
        }
    }
}
