//! Key discovery over raw snapshot bytes.
//!
//! Snapshot entries are a tab/newline indented pseudo-JSON dump that is too
//! large and too irregular to parse as a document. Every record starts on a
//! fresh line as `CR LF TAB "<key>"`, so the scanner looks for that byte
//! sequence and reads the quoted identifier after it.

use crate::error::{ExportError, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// `\r\n\t"`: precedes every record key in a snapshot entry.
pub const DELIMITER: [u8; 4] = [0x0D, 0x0A, 0x09, 0x22];
const QUOTE: u8 = 0x22;

pub type Key = String;

/// Streaming delimiter matcher plus key accumulator.
///
/// The two halves are independent: a key runs until the next quote even if
/// delimiter bytes appear first, and those bytes still count as a match.
#[derive(Default)]
pub struct KeyScanner {
    matched: usize,
    pending: Option<Vec<u8>>,
    keys: Vec<Key>,
}

impl KeyScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if let Some(buf) = self.pending.as_mut() {
                if b == QUOTE {
                    let key = String::from_utf8_lossy(buf).into_owned();
                    self.keys.push(key);
                    self.pending = None;
                } else {
                    buf.push(b);
                }
            }

            if b == DELIMITER[self.matched] {
                self.matched += 1;
                if self.matched == DELIMITER.len() {
                    self.matched = 0;
                    self.pending = Some(Vec::new());
                }
            } else {
                // no prefix of the delimiter ends in a later delimiter byte
                self.matched = usize::from(b == DELIMITER[0]);
            }
        }
    }

    /// Keys in stream order. An unterminated trailing key is dropped.
    pub fn finish(self) -> Vec<Key> {
        if let Some(buf) = self.pending {
            debug!(len = buf.len(), "dropping unterminated trailing key");
        }
        self.keys
    }
}

pub fn extract_keys<R: Read>(mut src: R) -> Result<Vec<Key>> {
    let mut scanner = KeyScanner::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        scanner.feed(&buf[..n]);
    }
    Ok(scanner.finish())
}

/// Scan the single snapshot entry of a zip archive.
pub fn scan_archive(path: &Path) -> Result<Vec<Key>> {
    let f = File::open(path).map_err(|e| ExportError::malformed(path, e.to_string()))?;
    let mut zip =
        zip::ZipArchive::new(f).map_err(|e| ExportError::malformed(path, e.to_string()))?;
    if zip.is_empty() {
        return Err(ExportError::malformed(path, "archive has no entries"));
    }
    if zip.len() > 1 {
        warn!(
            archive = %path.display(),
            entries = zip.len(),
            "archive has more than one entry; scanning the first"
        );
    }
    let entry = zip
        .by_index(0)
        .map_err(|e| ExportError::malformed(path, format!("cannot open entry: {e}")))?;
    debug!(archive = %path.display(), entry = entry.name(), size = entry.size(), "scanning");
    extract_keys(entry).map_err(|e| match e {
        ExportError::Io(io) => ExportError::malformed(path, format!("read failed: {io}")),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(bytes: &[u8]) -> Vec<Key> {
        extract_keys(bytes).unwrap()
    }

    #[test]
    fn finds_keys_in_order() {
        let src = b"{\r\n\t\"alice\":{\"lvl\":3},\r\n\t\"bob\":{},\r\n\t\"alice\":1}";
        assert_eq!(keys(src), vec!["alice", "bob", "alice"]);
    }

    #[test]
    fn no_delimiter_is_empty() {
        assert!(keys(b"{\"a\":1,\n\t\"b\":2}").is_empty());
        assert!(keys(b"").is_empty());
    }

    #[test]
    fn partial_delimiters_do_not_match() {
        // CR CR LF TAB " still contains the delimiter after the first CR
        assert_eq!(keys(b"\r\r\n\t\"k1\"\n\t\"x\"\r\n\"y\""), vec!["k1"]);
    }

    #[test]
    fn match_across_chunk_boundaries() {
        let src = b"xx\r\n\t\"player_42\":{}\r\n\t\"p7\"";
        for split in 0..src.len() {
            let mut s = KeyScanner::new();
            s.feed(&src[..split]);
            s.feed(&src[split..]);
            assert_eq!(s.finish(), vec!["player_42", "p7"], "split at {split}");
        }
    }

    #[test]
    fn unterminated_key_runs_into_next_delimiter() {
        // the first key has no closing quote before the next record begins
        assert_eq!(keys(b"\r\n\t\"ab\r\n\t\"cd\""), vec!["ab\r\n\t", "cd"]);
        // a bare CR LF TAB without the quote is not a delimiter
        assert_eq!(keys(b"\r\n\tab\r\n\t\"cd\""), vec!["cd"]);
    }

    #[test]
    fn trailing_unterminated_key_dropped() {
        assert_eq!(keys(b"\r\n\t\"a\"\r\n\t\"tail"), vec!["a"]);
    }

    #[test]
    fn empty_key_is_reported() {
        assert_eq!(keys(b"\r\n\t\"\":1"), vec![""]);
    }
}
