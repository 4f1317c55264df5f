//! Replay metadata reading.
//!
//! A `.slp` replay is a UBJSON object with two keys: `raw` (the event
//! stream, an optimized `uint8` array with a 32-bit length) followed by
//! `metadata`. Only the metadata block is decoded; the event stream is
//! skipped by seeking past it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// `{` `U` 3 `raw` `[` `$` `U` `#` `l`, followed by a big-endian u32 length.
const RAW_HEADER: &[u8; 11] = b"{U\x03raw[$U#l";

/// Deepest container nesting accepted in the metadata block.
const MAX_DEPTH: usize = 32;

/// Reads recorded metadata from a replay file.
pub trait ReplayMetadataReader: Send + Sync {
    /// Last frame recorded in the replay, if the replay carries one.
    fn last_frame(&self, path: &Path) -> MediaResult<Option<i32>>;
}

/// Reader for `.slp` replay files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlpMetadataReader;

impl SlpMetadataReader {
    pub fn new() -> Self {
        Self
    }

    /// Decode the metadata block of the replay at `path`.
    ///
    /// Returns an empty object when the replay has no metadata (e.g. it is
    /// still being recorded).
    pub fn read_metadata(&self, path: &Path) -> MediaResult<Value> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut file = File::open(path)?;

        let mut header = [0u8; 15];
        file.read_exact(&mut header)
            .map_err(|_| MediaError::invalid_replay("file too short for a replay header"))?;
        if &header[..RAW_HEADER.len()] != RAW_HEADER {
            return Err(MediaError::invalid_replay("missing raw event stream header"));
        }

        let raw_len = u32::from_be_bytes([header[11], header[12], header[13], header[14]]);
        file.seek(SeekFrom::Current(i64::from(raw_len)))?;

        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        debug!(raw_len, metadata_len = rest.len(), "Read replay container");

        let mut parser = Parser::new(&rest);
        loop {
            match parser.peek() {
                None | Some(b'}') => return Ok(Value::Object(Map::new())),
                Some(_) => {
                    let key = parser.key()?;
                    let value = parser.value(0)?;
                    if key == "metadata" {
                        return Ok(value);
                    }
                }
            }
        }
    }
}

impl ReplayMetadataReader for SlpMetadataReader {
    fn last_frame(&self, path: &Path) -> MediaResult<Option<i32>> {
        let metadata = self.read_metadata(path)?;
        Ok(metadata
            .get("lastFrame")
            .and_then(Value::as_i64)
            .and_then(|frame| i32::try_from(frame).ok()))
    }
}

/// Minimal UBJSON decoder producing `serde_json` values.
struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> MediaResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| MediaError::invalid_replay("truncated metadata"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> MediaResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> MediaResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn length(&mut self) -> MediaResult<usize> {
        let marker = self.byte()?;
        let len = match self.scalar(marker)? {
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
        len.and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| MediaError::invalid_replay("invalid length"))
    }

    fn string(&mut self) -> MediaResult<String> {
        let len = self.length()?;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Object keys are strings without the `S` marker.
    fn key(&mut self) -> MediaResult<String> {
        self.string()
    }

    fn value(&mut self, depth: usize) -> MediaResult<Value> {
        let mut marker = self.byte()?;
        while marker == b'N' {
            marker = self.byte()?;
        }
        self.typed(marker, depth)
    }

    fn typed(&mut self, marker: u8, depth: usize) -> MediaResult<Value> {
        match marker {
            b'[' | b'{' => {
                if depth >= MAX_DEPTH {
                    return Err(MediaError::invalid_replay("metadata nested too deeply"));
                }
                if marker == b'[' {
                    self.list(depth + 1)
                } else {
                    self.object(depth + 1)
                }
            }
            other => self.scalar(other),
        }
    }

    fn scalar(&mut self, marker: u8) -> MediaResult<Value> {
        let value = match marker {
            b'Z' => Value::Null,
            b'T' => Value::Bool(true),
            b'F' => Value::Bool(false),
            b'i' => Value::from(i8::from_be_bytes(self.array()?)),
            b'U' => Value::from(self.byte()?),
            b'I' => Value::from(i16::from_be_bytes(self.array()?)),
            b'l' => Value::from(i32::from_be_bytes(self.array()?)),
            b'L' => Value::from(i64::from_be_bytes(self.array()?)),
            b'd' => float(f64::from(f32::from_be_bytes(self.array()?))),
            b'D' => float(f64::from_be_bytes(self.array()?)),
            b'C' => Value::String(char::from(self.byte()?).to_string()),
            b'S' | b'H' => Value::String(self.string()?),
            other => {
                return Err(MediaError::invalid_replay(format!(
                    "unexpected type marker 0x{:02x}",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Optional `$type` and `#count` after a container opener.
    fn container_header(&mut self) -> MediaResult<(Option<u8>, Option<usize>)> {
        let mut element_type = None;
        if self.peek() == Some(b'$') {
            self.pos += 1;
            element_type = Some(self.byte()?);
        }

        if matches!(element_type, Some(b'Z' | b'T' | b'F' | b'N')) {
            return Err(MediaError::invalid_replay("zero-width container element type"));
        }

        let mut count = None;
        if self.peek() == Some(b'#') {
            self.pos += 1;
            let len = self.length()?;
            // Every remaining element occupies at least one byte.
            if len > self.data.len() - self.pos {
                return Err(MediaError::invalid_replay("container count exceeds data"));
            }
            count = Some(len);
        } else if element_type.is_some() {
            return Err(MediaError::invalid_replay("typed container without count"));
        }

        Ok((element_type, count))
    }

    fn element(&mut self, element_type: Option<u8>, depth: usize) -> MediaResult<Value> {
        match element_type {
            Some(marker) => self.typed(marker, depth),
            None => self.value(depth),
        }
    }

    fn list(&mut self, depth: usize) -> MediaResult<Value> {
        let (element_type, count) = self.container_header()?;
        let mut items = Vec::new();

        match count {
            Some(count) => {
                for _ in 0..count {
                    items.push(self.element(element_type, depth)?);
                }
            }
            None => loop {
                match self.peek() {
                    Some(b']') => {
                        self.pos += 1;
                        break;
                    }
                    Some(_) => items.push(self.value(depth)?),
                    None => return Err(MediaError::invalid_replay("unterminated array")),
                }
            },
        }

        Ok(Value::Array(items))
    }

    fn object(&mut self, depth: usize) -> MediaResult<Value> {
        let (element_type, count) = self.container_header()?;
        let mut map = Map::new();

        match count {
            Some(count) => {
                for _ in 0..count {
                    let key = self.key()?;
                    map.insert(key, self.element(element_type, depth)?);
                }
            }
            None => loop {
                match self.peek() {
                    Some(b'}') => {
                        self.pos += 1;
                        break;
                    }
                    Some(_) => {
                        let key = self.key()?;
                        map.insert(key, self.value(depth)?);
                    }
                    None => return Err(MediaError::invalid_replay("unterminated object")),
                }
            },
        }

        Ok(Value::Object(map))
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn key(out: &mut Vec<u8>, name: &str) {
        out.push(b'U');
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }

    fn replay_bytes(raw: &[u8], metadata: &[u8]) -> Vec<u8> {
        let mut out = RAW_HEADER.to_vec();
        out.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        out.extend_from_slice(raw);
        key(&mut out, "metadata");
        out.extend_from_slice(metadata);
        out.push(b'}');
        out
    }

    fn metadata_with_last_frame(frame: i32) -> Vec<u8> {
        let mut m = vec![b'{'];
        key(&mut m, "startAt");
        m.extend_from_slice(b"SU\x142024-01-01T00:00:00Z");
        key(&mut m, "lastFrame");
        m.push(b'l');
        m.extend_from_slice(&frame.to_be_bytes());
        key(&mut m, "players");
        m.push(b'{');
        key(&mut m, "0");
        m.push(b'{');
        key(&mut m, "characters");
        m.extend_from_slice(b"{U\x0218I\x02\x58}");
        m.push(b'}');
        m.push(b'}');
        key(&mut m, "playedOn");
        m.extend_from_slice(b"SU\x07dolphin");
        m.push(b'}');
        m
    }

    fn write_replay(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_last_frame() {
        // raw stream bytes that look like markers must be skipped, not parsed
        let raw = b"{[}]Z\x00\xff";
        let file = write_replay(&replay_bytes(raw, &metadata_with_last_frame(600)));

        let reader = SlpMetadataReader::new();
        assert_eq!(reader.last_frame(file.path()).unwrap(), Some(600));

        let metadata = reader.read_metadata(file.path()).unwrap();
        assert_eq!(metadata["playedOn"], "dolphin");
        assert_eq!(metadata["players"]["0"]["characters"]["18"], 600);
    }

    #[test]
    fn test_negative_last_frame() {
        let file = write_replay(&replay_bytes(&[], &metadata_with_last_frame(-40)));
        assert_eq!(SlpMetadataReader.last_frame(file.path()).unwrap(), Some(-40));
    }

    #[test]
    fn test_missing_last_frame() {
        let mut metadata = vec![b'{'];
        key(&mut metadata, "playedOn");
        metadata.extend_from_slice(b"SU\x07network");
        metadata.push(b'}');

        let file = write_replay(&replay_bytes(&[1, 2, 3], &metadata));
        assert_eq!(SlpMetadataReader.last_frame(file.path()).unwrap(), None);
    }

    #[test]
    fn test_replay_without_metadata_block() {
        let mut bytes = RAW_HEADER.to_vec();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        let file = write_replay(&bytes);
        assert_eq!(SlpMetadataReader.last_frame(file.path()).unwrap(), None);
    }

    #[test]
    fn test_optimized_containers() {
        let mut metadata = vec![b'{', b'#', b'U', 2];
        key(&mut metadata, "lastFrame");
        metadata.extend_from_slice(b"I\x01\x00");
        key(&mut metadata, "frames");
        metadata.extend_from_slice(b"[$i#U\x03\x01\x02\xff");

        let file = write_replay(&replay_bytes(&[], &metadata));
        let parsed = SlpMetadataReader.read_metadata(file.path()).unwrap();
        assert_eq!(parsed["lastFrame"], 256);
        assert_eq!(parsed["frames"], serde_json::json!([1, 2, -1]));
    }

    #[test]
    fn test_rejects_oversized_container_counts() {
        // zero-width elements would decode millions of nulls from a few bytes
        let mut null_run = vec![b'{'];
        key(&mut null_run, "x");
        null_run.extend_from_slice(b"[$Z#l");
        null_run.extend_from_slice(&5_000_000i32.to_be_bytes());
        null_run.push(b'}');

        let mut long_count = vec![b'{'];
        key(&mut long_count, "frames");
        long_count.extend_from_slice(b"[$i#L");
        long_count.extend_from_slice(&i64::MAX.to_be_bytes());
        long_count.extend_from_slice(b"\x01\x02");
        long_count.push(b'}');

        let mut untyped = vec![b'{', b'#', b'l'];
        untyped.extend_from_slice(&1_000_000i32.to_be_bytes());
        key(&mut untyped, "lastFrame");
        untyped.extend_from_slice(b"U\x01");

        for metadata in [null_run, long_count, untyped] {
            let file = write_replay(&replay_bytes(&[], &metadata));
            let result = SlpMetadataReader.last_frame(file.path());
            assert!(matches!(result, Err(MediaError::InvalidReplay(_))));
        }
    }

    #[test]
    fn test_rejects_non_replay() {
        let file = write_replay(b"definitely not a replay file");
        let result = SlpMetadataReader.last_frame(file.path());
        assert!(matches!(result, Err(MediaError::InvalidReplay(_))));
    }

    #[test]
    fn test_truncated_metadata() {
        let mut metadata = metadata_with_last_frame(600);
        metadata.truncate(20);
        let mut bytes = RAW_HEADER.to_vec();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        key(&mut bytes, "metadata");
        bytes.extend_from_slice(&metadata);

        let file = write_replay(&bytes);
        let result = SlpMetadataReader.last_frame(file.path());
        assert!(matches!(result, Err(MediaError::InvalidReplay(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = SlpMetadataReader.last_frame(Path::new("/no/such/replay.slp"));
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
