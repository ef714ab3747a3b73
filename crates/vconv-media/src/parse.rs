//! Progress stream parsing.
//!
//! FFmpeg builds differ in how they report the output position: some emit
//! a microsecond counter (`out_time_us`), some a millisecond counter
//! (`out_time_ms`), and all emit an `HH:MM:SS.frac` timestamp. One parser
//! handles them all through an ordered set of matchers; when a line could
//! match more than one encoding the earlier variant wins.

use vconv_models::timestamp::parse_timestamp;

/// A recognized field from one progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressField {
    /// `out_time_us=<int>`, position in microseconds
    OutTimeUs(i64),
    /// `out_time_ms=<int>`, position in milliseconds
    OutTimeMs(i64),
    /// `out_time=HH:MM:SS.frac` or a stats-style `time=` token
    OutTime(f64),
    /// `progress=end`, the stream's own completion marker
    End,
}

impl ProgressField {
    /// Position in seconds, if this field carries one.
    pub fn position_secs(&self) -> Option<f64> {
        match *self {
            ProgressField::OutTimeUs(us) => Some(us as f64 / 1_000_000.0),
            ProgressField::OutTimeMs(ms) => Some(ms as f64 / 1_000.0),
            ProgressField::OutTime(secs) => Some(secs),
            ProgressField::End => None,
        }
    }
}

/// Classify one complete line of transcoder output.
///
/// Returns `None` for unrecognized lines; most output is non-progress
/// noise and that is not an error. Negative counters and `N/A` values are
/// treated as noise too. The function never retains state between calls.
pub fn classify_progress_line(line: &str) -> Option<ProgressField> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_us" => {
                return value
                    .parse::<i64>()
                    .ok()
                    .filter(|us| *us >= 0)
                    .map(ProgressField::OutTimeUs);
            }
            "out_time_ms" => {
                return value
                    .parse::<i64>()
                    .ok()
                    .filter(|ms| *ms >= 0)
                    .map(ProgressField::OutTimeMs);
            }
            "out_time" | "time" => {
                return parse_timestamp(value).ok().map(ProgressField::OutTime);
            }
            "progress" => {
                if value == "end" {
                    return Some(ProgressField::End);
                }
                return None;
            }
            _ => {}
        }
    }

    // Stats-style lines bury the timestamp mid-line: `frame=.. time=00:00:05.00 ..`
    for token in line.split_whitespace() {
        if let Some(value) = token.strip_prefix("time=") {
            return parse_timestamp(value).ok().map(ProgressField::OutTime);
        }
    }

    None
}

/// Parse one line into a position sample in seconds.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    classify_progress_line(line).and_then(|f| f.position_secs())
}
