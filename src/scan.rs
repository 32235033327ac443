//! Sources of scanned student IDs for attendance taking.
//!
//! A scanner (QR reader, badge reader, a person typing) is anything that
//! yields one ID per scan. `LineScanSource` reads them from text, one per line.

use std::io::BufRead;

pub trait ScanSource {
    /// Next scanned ID; `None` when the source is exhausted
    fn next_scan(&mut self) -> Option<std::io::Result<String>>;
}

/// Reads IDs line by line. Blank lines and `#` comments are skipped, and a
/// line reading `done` ends the scan.
pub struct LineScanSource<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> LineScanSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }
}

impl<R: BufRead> ScanSource for LineScanSource<R> {
    fn next_scan(&mut self) -> Option<std::io::Result<String>> {
        while !self.finished {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    let id = line.trim();
                    if id.is_empty() || id.starts_with('#') {
                        continue;
                    }
                    if id.eq_ignore_ascii_case("done") {
                        self.finished = true;
                        break;
                    }
                    return Some(Ok(id.to_string()));
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Iterate a source lazily
pub fn scans<S: ScanSource>(source: &mut S) -> impl Iterator<Item = std::io::Result<String>> + '_ {
    std::iter::from_fn(move || source.next_scan())
}
