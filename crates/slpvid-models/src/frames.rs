//! Frame arithmetic and frame/timestamp parsing.
//!
//! Replay frames are signed: the first frame of a game is [`FIRST_FRAME`],
//! a fixed offset before the match timer starts at frame zero.

use crate::error::{ModelError, ModelResult};

/// First frame index of every replay (pre-match countdown).
pub const FIRST_FRAME: i32 = -123;

/// Game frame rate.
pub const FRAMES_PER_SECOND: u32 = 60;

/// Default pre-roll rendered before a requested start frame.
pub const DEFAULT_START_PADDING_FRAMES: u32 = 120;

/// Playback start frame after pre-roll padding has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddedStart {
    /// Frame the playback binary is told to start at
    pub start_frame: i32,
    /// Seconds the encoder must trim from the start of the output
    pub cutoff_secs: f64,
}

/// Move a requested start frame back by `padding` frames.
///
/// The effective start never goes below [`FIRST_FRAME`], and the cutoff is
/// never negative, even for requested frames before the first frame.
pub fn pad_start_frame(requested: i32, padding: u32) -> PaddedStart {
    let padded = i64::from(requested) - i64::from(padding);
    let start_frame = padded.max(i64::from(FIRST_FRAME)) as i32;
    let lead_in = (i64::from(requested) - i64::from(start_frame)).max(0);

    PaddedStart {
        start_frame,
        cutoff_secs: lead_in as f64 / f64::from(FRAMES_PER_SECOND),
    }
}

/// Parse a timestamp string to total seconds.
///
/// Supports formats:
/// - `HH:MM:SS` or `HH:MM:SS.mmm`
/// - `MM:SS` or `MM:SS.mmm`
/// - `SS` or `SS.mmm`
pub fn parse_timestamp(ts: &str) -> ModelResult<f64> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(ModelError::EmptyTimestamp);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(ModelError::InvalidTimestampFormat(ts.to_string()));
    }

    const COMPONENTS: [&str; 3] = ["hours", "minutes", "seconds"];
    let offset = COMPONENTS.len() - parts.len();

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let component = COMPONENTS[offset + i];
        let value: f64 = part
            .parse()
            .map_err(|_| ModelError::InvalidTimestampValue(component, part.to_string()))?;
        if value < 0.0 || !value.is_finite() {
            return Err(ModelError::NegativeTimestamp);
        }
        total = total * 60.0 + value;
    }

    Ok(total)
}

/// Convert a replay timestamp (time since the first frame) to a frame number.
///
/// `None` when the frame does not fit in an `i32`.
pub fn timestamp_to_frame(seconds: f64) -> Option<i32> {
    let frame = (seconds.round() as i64)
        .checked_mul(i64::from(FRAMES_PER_SECOND))?
        .checked_add(i64::from(FIRST_FRAME))?;
    i32::try_from(frame).ok()
}

/// Parse user input for a start or end frame.
///
/// Plain (optionally negative) integers are frame numbers. Anything else must
/// be a timestamp, measured from the first frame of the replay.
pub fn parse_frame_input(input: &str) -> ModelResult<i32> {
    let input = input.trim();
    let digits = input.strip_prefix('-').unwrap_or(input);

    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return input
            .parse()
            .map_err(|_| ModelError::InvalidFrameInput(input.to_string()));
    }

    parse_timestamp(input)
        .ok()
        .and_then(timestamp_to_frame)
        .ok_or_else(|| ModelError::InvalidFrameInput(input.to_string()))
}

/// Format milliseconds as `MM:SS.mmm`, or `H:MM:SS.mmm` past the hour.
pub fn ms_to_timestamp(ms: u64) -> String {
    let millis = ms % 1000;
    let total_secs = ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", mins, secs, millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_start_frame_default_padding() {
        let padded = pad_start_frame(200, DEFAULT_START_PADDING_FRAMES);
        assert_eq!(padded.start_frame, 80);
        assert!((padded.cutoff_secs - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pad_start_frame_clamps_to_first_frame() {
        let padded = pad_start_frame(-100, 120);
        assert_eq!(padded.start_frame, FIRST_FRAME);
        assert!((padded.cutoff_secs - 23.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_pad_start_frame_zero_padding() {
        let padded = pad_start_frame(500, 0);
        assert_eq!(padded.start_frame, 500);
        assert_eq!(padded.cutoff_secs, 0.0);
    }

    #[test]
    fn test_pad_start_frame_cutoff_never_negative() {
        for requested in [-500, -124, -123, -1, 0, 1, 119, 120, 10_000] {
            for padding in [0, 1, 60, 120, 1000] {
                let padded = pad_start_frame(requested, padding);
                assert!(padded.start_frame >= FIRST_FRAME);
                assert!(padded.cutoff_secs >= 0.0);
                if requested >= FIRST_FRAME {
                    let expected = (requested - padded.start_frame) as f64 / 60.0;
                    assert!((padded.cutoff_secs - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("01:30:45").unwrap(), 5445.0);
        assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
        assert_eq!(parse_timestamp("90").unwrap(), 90.0);
        assert!((parse_timestamp("00:00:30.500").unwrap() - 30.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_timestamp_errors() {
        assert!(matches!(parse_timestamp(""), Err(ModelError::EmptyTimestamp)));
        assert!(matches!(
            parse_timestamp("abc"),
            Err(ModelError::InvalidTimestampValue("seconds", _))
        ));
        assert!(matches!(
            parse_timestamp("1:2:3:4"),
            Err(ModelError::InvalidTimestampFormat(_))
        ));
        assert!(matches!(parse_timestamp("-1:00"), Err(ModelError::NegativeTimestamp)));
    }

    #[test]
    fn test_parse_frame_input_numbers() {
        assert_eq!(parse_frame_input("200").unwrap(), 200);
        assert_eq!(parse_frame_input("-123").unwrap(), -123);
        assert_eq!(parse_frame_input(" 42 ").unwrap(), 42);
    }

    #[test]
    fn test_parse_frame_input_timestamps() {
        // 1 minute into the replay
        assert_eq!(parse_frame_input("01:00").unwrap(), 60 * 60 - 123);
        assert_eq!(parse_frame_input("00:00").unwrap(), FIRST_FRAME);
        // fractional seconds round to the nearest second
        assert_eq!(parse_frame_input("00:01.6").unwrap(), 2 * 60 - 123);
    }

    #[test]
    fn test_parse_frame_input_rejects_garbage() {
        assert!(matches!(
            parse_frame_input("soon"),
            Err(ModelError::InvalidFrameInput(_))
        ));
        assert!(parse_frame_input("-").is_err());
        assert!(parse_frame_input("").is_err());
    }

    #[test]
    fn test_parse_frame_input_rejects_out_of_range_timestamps() {
        for input in ["99999999.5", "9999999:00:00", "596523:14:08"] {
            assert!(matches!(
                parse_frame_input(input),
                Err(ModelError::InvalidFrameInput(_))
            ));
        }
        assert_eq!(timestamp_to_frame(1e300), None);
        assert_eq!(timestamp_to_frame(60.0), Some(60 * 60 - 123));
    }

    #[test]
    fn test_ms_to_timestamp() {
        assert_eq!(ms_to_timestamp(0), "00:00.000");
        assert_eq!(ms_to_timestamp(61_250), "01:01.250");
        assert_eq!(ms_to_timestamp(3_723_004), "1:02:03.004");
    }
}
