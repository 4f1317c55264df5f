//! Playback Dolphin user directory templates.

use std::borrow::Cow;
use std::path::Path;

use tracing::debug;

use crate::error::MediaResult;

/// A config file written into the playback user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Core settings: frame and audio dumping, no prompts
    Dolphin,
    /// Graphics settings: dump bitrate and internal resolution
    Gfx,
    /// Widescreen gecko code for NTSC 1.02
    Widescreen,
}

impl Template {
    pub fn file_name(&self) -> &'static str {
        match self {
            Template::Dolphin => "Dolphin.ini",
            Template::Gfx => "GFX.ini",
            Template::Widescreen => "GALE01.ini",
        }
    }

    fn embedded(&self) -> &'static str {
        match self {
            Template::Dolphin => include_str!("../assets/Dolphin.ini"),
            Template::Gfx => include_str!("../assets/GFX.ini"),
            Template::Widescreen => include_str!("../assets/GALE01.ini"),
        }
    }

    /// Template contents, preferring a same-named file in `asset_dir`.
    pub fn load(&self, asset_dir: Option<&Path>) -> MediaResult<Cow<'static, str>> {
        if let Some(dir) = asset_dir {
            let path = dir.join(self.file_name());
            if path.is_file() {
                debug!(path = %path.display(), "Using template override");
                return Ok(Cow::Owned(std::fs::read_to_string(path)?));
            }
        }
        Ok(Cow::Borrowed(self.embedded()))
    }
}

/// Set `key = value` in `[section]` of an INI document.
///
/// Existing keys are overwritten in place, missing keys are added at the
/// top of the section, and a missing section is appended. The document's
/// line ending style is preserved.
pub fn set_ini_value(contents: &str, section: &str, key: &str, value: &str) -> String {
    let newline = if contents.contains("\r\n") { "\r\n" } else { "\n" };
    let entry = format!("{} = {}", key, value);
    let header = format!("[{}]", section);

    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

    let section_start = lines.iter().position(|line| line.trim() == header);

    match section_start {
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| line.trim_start().starts_with('['))
                .map_or(lines.len(), |offset| start + 1 + offset);

            let existing = lines[start + 1..end].iter().position(|line| {
                line.split_once('=')
                    .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            });

            match existing {
                Some(offset) => lines[start + 1 + offset] = entry,
                None => lines.insert(start + 1, entry),
            }
        }
        None => {
            lines.push(header);
            lines.push(entry);
        }
    }

    let mut out = lines.join(newline);
    out.push_str(newline);
    out
}
