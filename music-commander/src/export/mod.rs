//! Audio export: format presets, source probing, and the
//! encode/copy/skip decision engine driving ffmpeg.

pub mod encoder;
pub mod pipeline;
pub mod presets;
pub mod probe;

pub use encoder::{
    build_ffmpeg_command, can_copy, decide, export_file, should_skip, Decision, ExportAction,
    ExportResult, ExportStatus,
};
pub use pipeline::{
    run_export, template_extension, ExportOptions, ExportReport, ExportRunOutcome, ExportSummary,
    EXPORT_REPORT_NAME,
};
pub use presets::{preset_by_name, preset_for_extension, FormatPreset, PRESETS};
pub use probe::{find_cover_art, probe_source, probe_tags, SourceInfo};
