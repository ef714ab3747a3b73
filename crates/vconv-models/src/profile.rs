//! Output encoding profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Output profile selected by the requester.
///
/// The argv each profile contributes is the encoder's contract; the
/// transcoder itself stays an opaque external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputProfile {
    /// MP4, H.264 + AAC, standard quality
    #[default]
    Mp4H264,
    /// MKV, H.265 + AAC 96k, scaled to 480p, CRF 28
    MkvHevc480p,
}

impl OutputProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputProfile::Mp4H264 => "mp4",
            OutputProfile::MkvHevc480p => "mkv",
        }
    }

    /// File extension for the converted output.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            OutputProfile::Mp4H264 => "MP4 (H.264 + AAC)",
            OutputProfile::MkvHevc480p => "MKV (H.265 + AAC, 480p)",
        }
    }

    /// Encoder arguments placed between the input and output paths.
    pub fn output_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            OutputProfile::Mp4H264 => &[
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "-preset",
                "medium",
                "-crf",
                "23",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0?",
                "-map",
                "0:s:0?",
                "-movflags",
                "+faststart",
            ],
            OutputProfile::MkvHevc480p => &[
                "-c:v",
                "libx265",
                "-crf",
                "28",
                "-preset",
                "medium",
                "-vf",
                "scale=-2:480",
                "-c:a",
                "aac",
                "-b:a",
                "96k",
                "-map",
                "0:v:0",
                "-map",
                "0:a",
                "-map",
                "0:s?",
            ],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for OutputProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown profile name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown output profile: {0}")]
pub struct ProfileParseError(pub String);

impl FromStr for OutputProfile {
    type Err = ProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" | "mp4_h264" => Ok(OutputProfile::Mp4H264),
            "mkv" | "mkv_hevc480p" => Ok(OutputProfile::MkvHevc480p),
            other => Err(ProfileParseError(other.to_string())),
        }
    }
}
