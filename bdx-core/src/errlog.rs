use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Append-only failure log shared by all archive workers.
///
/// Line format: `<rfc3339 timestamp> <source tag> <message>`. The tag is
/// percent-escaped so it never contains a space.
pub struct ErrorLog {
    f: Mutex<File>,
    lines: AtomicU64,
}

impl ErrorLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            f: Mutex::new(f),
            lines: AtomicU64::new(0),
        })
    }

    /// Lines appended through this handle.
    pub fn count(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn append(&self, source: &str, message: &str) -> Result<()> {
        let ts = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        let line = format!("{ts} {} {}\n", tag_field(source), one_line(message));
        let mut f = self
            .f
            .lock()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        // whole line in one write so concurrent appends never interleave
        f.write_all(line.as_bytes())?;
        drop(f);
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn one_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

fn tag_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}
