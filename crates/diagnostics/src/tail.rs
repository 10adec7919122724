use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const DEFAULT_TAIL_BYTES: u64 = 64_000;
pub const DEFAULT_TAIL_LINES: usize = 200;

/// Read at most the last `max_bytes` of `path`, then keep at most the last `max_lines` lines.
///
/// A missing file reads as an empty string. Any other read failure is reported inline as
/// `[could not read <path>: <reason>]` so it shows up next to the other log tails.
#[must_use]
pub fn tail_text(path: &Path, max_bytes: u64, max_lines: usize) -> String {
    match read_tail_bytes(path, max_bytes) {
        Ok(Some(bytes)) => last_lines(&String::from_utf8_lossy(&bytes), max_lines),
        Ok(None) => String::new(),
        Err(err) => {
            log::debug!("tail of {} failed: {err}", path.display());
            format!("[could not read {}: {err}]", path.display())
        }
    }
}

fn read_tail_bytes(path: &Path, max_bytes: u64) -> io::Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let len = file.metadata()?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes))?;
    }
    let mut buf = Vec::with_capacity(len.min(max_bytes) as usize);
    file.take(max_bytes).read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn last_lines(text: &str, max_lines: usize) -> String {
    // Serial consoles end lines with `\r\r\n`; drop every trailing carriage return.
    let lines: Vec<&str> = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].join("\n")
}
