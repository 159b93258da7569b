//! Audio file integrity checking
//!
//! Format-specific external tools (flac, mp3val, ogginfo, shntool,
//! sox) with ffmpeg as the generic decode fallback, plus in-process
//! validators for textual formats. Per-file results aggregate into a
//! JSON report written atomically.

pub mod pipeline;
pub mod registry;
pub mod runner;

pub use pipeline::{
    run_check, CheckOptions, CheckReport, CheckRunOutcome, CheckSummary, CHECK_REPORT_NAME,
};
pub use registry::{
    get_checkers_for_extension, get_checkers_for_file, CheckerGroup, CheckerSpec, FileResolution,
    ToolOutput, ToolResult,
};
pub use runner::{check_file, check_tool_available, CheckResult, CheckStatus};
