//! Format preset definitions.
//!
//! A preset bundles the ffmpeg encoder, container, argument tuple,
//! optional sample-rate/bit-depth/channel constraints, and optional
//! post-processing. Pioneer variants constrain to 44.1 kHz / 16-bit /
//! stereo for hardware players.

/// A target encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPreset {
    pub name: &'static str,
    /// ffmpeg `-codec:a` value.
    pub codec: &'static str,
    /// Output container extension, with dot.
    pub container: &'static str,
    pub ffmpeg_args: &'static [&'static str],
    /// None = preserve source.
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub channels: Option<u32>,
    /// Post-processing commands run against the finished output; the
    /// output path is appended to each.
    pub post_commands: &'static [&'static [&'static str]],
    pub supports_cover_art: bool,
}

pub static MP3_320: FormatPreset = FormatPreset {
    name: "mp3-320",
    codec: "libmp3lame",
    container: ".mp3",
    ffmpeg_args: &["-b:a", "320k", "-id3v2_version", "3"],
    sample_rate: None,
    bit_depth: None,
    channels: None,
    post_commands: &[],
    supports_cover_art: true,
};

pub static MP3_V0: FormatPreset = FormatPreset {
    name: "mp3-v0",
    codec: "libmp3lame",
    container: ".mp3",
    ffmpeg_args: &["-q:a", "0", "-id3v2_version", "3"],
    sample_rate: None,
    bit_depth: None,
    channels: None,
    post_commands: &[],
    supports_cover_art: true,
};

pub static FLAC: FormatPreset = FormatPreset {
    name: "flac",
    codec: "flac",
    container: ".flac",
    ffmpeg_args: &["-compression_level", "8"],
    sample_rate: None,
    bit_depth: None,
    channels: None,
    post_commands: &[],
    supports_cover_art: true,
};

pub static FLAC_PIONEER: FormatPreset = FormatPreset {
    name: "flac-pioneer",
    codec: "flac",
    container: ".flac",
    ffmpeg_args: &[
        "-sample_fmt",
        "s16",
        "-ar",
        "44100",
        "-ac",
        "2",
        "-compression_level",
        "8",
    ],
    sample_rate: Some(44100),
    bit_depth: Some(16),
    channels: Some(2),
    post_commands: &[&["metaflac", "--remove-tag=WAVEFORMATEXTENSIBLE_CHANNEL_MASK"]],
    supports_cover_art: true,
};

pub static AIFF: FormatPreset = FormatPreset {
    name: "aiff",
    codec: "pcm_s16be",
    container: ".aiff",
    ffmpeg_args: &["-write_id3v2", "1"],
    sample_rate: None,
    bit_depth: None,
    channels: None,
    post_commands: &[],
    supports_cover_art: true,
};

pub static AIFF_PIONEER: FormatPreset = FormatPreset {
    name: "aiff-pioneer",
    codec: "pcm_s16be",
    container: ".aiff",
    ffmpeg_args: &["-ar", "44100", "-ac", "2", "-write_id3v2", "1"],
    sample_rate: Some(44100),
    bit_depth: Some(16),
    channels: Some(2),
    post_commands: &[],
    supports_cover_art: true,
};

pub static WAV: FormatPreset = FormatPreset {
    name: "wav",
    codec: "pcm_s16le",
    container: ".wav",
    ffmpeg_args: &["-rf64", "auto"],
    sample_rate: None,
    bit_depth: None,
    channels: None,
    post_commands: &[],
    supports_cover_art: false,
};

pub static WAV_PIONEER: FormatPreset = FormatPreset {
    name: "wav-pioneer",
    codec: "pcm_s16le",
    container: ".wav",
    ffmpeg_args: &["-ar", "44100", "-ac", "2", "-rf64", "auto"],
    sample_rate: Some(44100),
    bit_depth: Some(16),
    channels: Some(2),
    post_commands: &[],
    supports_cover_art: false,
};

/// All presets, wire-visible by name.
pub static PRESETS: &[&FormatPreset] = &[
    &MP3_320,
    &MP3_V0,
    &FLAC,
    &FLAC_PIONEER,
    &AIFF,
    &AIFF_PIONEER,
    &WAV,
    &WAV_PIONEER,
];

pub fn preset_by_name(name: &str) -> Option<&'static FormatPreset> {
    PRESETS.iter().copied().find(|p| p.name == name)
}

/// Default preset for a template extension (auto-detection).
pub fn preset_for_extension(ext: &str) -> Option<&'static FormatPreset> {
    let name = match ext.to_lowercase().as_str() {
        ".mp3" => "mp3-320",
        ".flac" => "flac",
        ".aiff" | ".aif" => "aiff",
        ".wav" => "wav",
        _ => return None,
    };
    preset_by_name(name)
}

/// Probed codec names considered lossy; upconverting them to a lossless
/// preset is refused.
pub static LOSSY_CODECS: &[&str] = &["mp3", "aac", "vorbis", "opus", "wma", "wmav2"];

/// Preset codecs considered lossless targets.
pub static LOSSLESS_CODECS: &[&str] = &["flac", "pcm_s16le", "pcm_s16be"];

/// ffprobe codec names each encoder can accept for stream copy.
pub fn codec_accepts(encoder_codec: &str, probed_codec: &str) -> bool {
    match encoder_codec {
        "libmp3lame" => probed_codec == "mp3",
        "flac" => probed_codec == "flac",
        "pcm_s16be" => matches!(probed_codec, "pcm_s16be" | "pcm_s24be"),
        "pcm_s16le" => matches!(probed_codec, "pcm_s16le" | "pcm_s24le"),
        _ => false,
    }
}

/// Stream-copy preset matching a lossy source codec, used by the
/// lossy-to-lossless guard to keep the original format.
pub fn stream_copy_preset_for(probed_codec: &str) -> Option<&'static FormatPreset> {
    match probed_codec {
        "mp3" => Some(&MP3_320),
        "flac" => Some(&FLAC),
        _ => None,
    }
}

pub fn is_lossy_codec(probed_codec: &str) -> bool {
    LOSSY_CODECS.contains(&probed_codec)
}

pub fn is_lossless_target(preset: &FormatPreset) -> bool {
    LOSSLESS_CODECS.contains(&preset.codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_eight_presets_are_registered() {
        assert_eq!(PRESETS.len(), 8);
        for name in [
            "mp3-320",
            "mp3-v0",
            "flac",
            "flac-pioneer",
            "aiff",
            "aiff-pioneer",
            "wav",
            "wav-pioneer",
        ] {
            assert!(preset_by_name(name).is_some(), "missing preset {name}");
        }
    }

    #[test]
    fn codecs_and_containers() {
        assert_eq!(MP3_320.codec, "libmp3lame");
        assert_eq!(MP3_320.container, ".mp3");
        assert_eq!(FLAC.codec, "flac");
        assert_eq!(AIFF.codec, "pcm_s16be");
        assert_eq!(WAV.codec, "pcm_s16le");
    }

    #[test]
    fn pioneer_presets_constrain_to_cd_quality() {
        for preset in [&FLAC_PIONEER, &AIFF_PIONEER, &WAV_PIONEER] {
            assert_eq!(preset.sample_rate, Some(44100));
            assert_eq!(preset.bit_depth, Some(16));
            assert_eq!(preset.channels, Some(2));
        }
    }

    #[test]
    fn flac_pioneer_strips_channel_mask_in_post() {
        assert_eq!(FLAC_PIONEER.post_commands.len(), 1);
        assert_eq!(FLAC_PIONEER.post_commands[0][0], "metaflac");
    }

    #[test]
    fn wav_presets_do_not_carry_cover_art() {
        assert!(!WAV.supports_cover_art);
        assert!(!WAV_PIONEER.supports_cover_art);
        assert!(FLAC.supports_cover_art);
    }

    #[test]
    fn extension_auto_detection() {
        assert_eq!(preset_for_extension(".mp3").unwrap().name, "mp3-320");
        assert_eq!(preset_for_extension(".FLAC").unwrap().name, "flac");
        assert_eq!(preset_for_extension(".aif").unwrap().name, "aiff");
        assert!(preset_for_extension(".ogg").is_none());
    }

    #[test]
    fn codec_equivalence_map() {
        assert!(codec_accepts("libmp3lame", "mp3"));
        assert!(codec_accepts("pcm_s16be", "pcm_s24be"));
        assert!(!codec_accepts("flac", "mp3"));
    }

    #[test]
    fn lossy_and_lossless_classification() {
        for codec in ["mp3", "aac", "vorbis", "opus", "wma"] {
            assert!(is_lossy_codec(codec), "{codec} should be lossy");
        }
        assert!(!is_lossy_codec("flac"));
        assert!(!is_lossy_codec("pcm_s16le"));
        assert!(is_lossless_target(&FLAC_PIONEER));
        assert!(!is_lossless_target(&MP3_320));
    }
}
