use std::path::{Path, PathBuf};

use redolink_common::Seq;
use tracing::warn;

/// Extract the redo sequence from an archived log filename by walking the
/// `log_archive_format` pattern. Tokens:
///   %s / %S  sequence number (zero filled)
///   %t / %T  thread id
///   %r       resetlogs id
///   %a       activation id
///   %d       database id
///   %h       hash ([0-9a-z]*)
/// Returns `None` (after a warning) when the name does not match; such files
/// are skipped.
pub fn sequence_from_file_name(format: &str, file: &str) -> Option<Seq> {
    let fmt: Vec<char> = format.chars().collect();
    let name: Vec<char> = file.chars().collect();
    let mut sequence: Option<u64> = None;
    let mut i = 0;
    let mut j = 0;

    while i < fmt.len() && j < name.len() {
        if fmt[i] == '%' {
            let Some(&token) = fmt.get(i + 1) else {
                warn!(file, format, "archive format ends after %");
                return None;
            };
            let mut digits = 0usize;
            match token {
                's' | 'S' | 't' | 'T' | 'r' | 'a' | 'd' => {
                    let mut number: u64 = 0;
                    while j < name.len() && name[j].is_ascii_digit() {
                        number = number * 10 + (name[j] as u64 - '0' as u64);
                        j += 1;
                        digits += 1;
                    }
                    if token == 's' || token == 'S' {
                        sequence = Some(number);
                    }
                    i += 2;
                }
                'h' => {
                    while j < name.len()
                        && (name[j].is_ascii_digit() || name[j].is_ascii_lowercase())
                    {
                        j += 1;
                        digits += 1;
                    }
                    i += 2;
                }
                other => {
                    warn!(file, format, token = %other, "unknown archive format token");
                    return None;
                }
            }
            if digits == 0 {
                warn!(file, format, position = j, "no digits where the format expects them");
                return None;
            }
        } else if fmt[i] == name[j] {
            i += 1;
            j += 1;
        } else {
            warn!(file, format, position = j, "filename diverges from archive format");
            return None;
        }
    }

    if i == fmt.len() && j == name.len() {
        sequence.map(|s| Seq(s as u32))
    } else {
        warn!(file, format, "filename shorter or longer than archive format");
        None
    }
}

/// Scan an archive directory for redo logs matching the format, ascending by
/// sequence. The queue is popped lowest-sequence first so resume after a gap
/// observes sequences in order.
pub fn scan_archive_dir(dir: &Path, format: &str) -> std::io::Result<Vec<(Seq, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(sequence) = sequence_from_file_name(format, &name) {
            found.push((sequence, entry.path()));
        }
    }
    found.sort_by_key(|(sequence, _)| *sequence);
    Ok(found)
}

/// `source:target` path prefix rewriting for redo paths that live elsewhere
/// on the replicating host than they did on the database host.
#[derive(Debug, Clone, Default)]
pub struct PathMapping {
    mappings: Vec<(String, String)>,
}

impl PathMapping {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            mappings: pairs.into_iter().collect(),
        }
    }

    pub fn add(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.mappings.push((source.into(), target.into()));
    }

    /// Apply the first matching prefix rewrite.
    pub fn apply(&self, path: &str) -> String {
        for (source, target) in &self.mappings {
            if let Some(rest) = path.strip_prefix(source.as_str()) {
                return format!("{}{}", target, rest);
            }
        }
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sequence_extraction() {
        let format = "o1_mf_%t_%s_%h_.arc";
        assert_eq!(
            sequence_from_file_name(format, "o1_mf_1_42_abc123_.arc"),
            Some(Seq(42))
        );
        assert_eq!(
            sequence_from_file_name(format, "o1_mf_1_7_x9_.arc"),
            Some(Seq(7))
        );
    }

    #[test]
    fn test_zero_filled_sequence() {
        assert_eq!(
            sequence_from_file_name("arch_%T_%S.arc", "arch_0001_0000042.arc"),
            Some(Seq(42))
        );
    }

    #[test]
    fn test_mismatch_is_skipped() {
        let format = "o1_mf_%t_%s_%h_.arc";
        assert_eq!(sequence_from_file_name(format, "redo01.log"), None);
        assert_eq!(sequence_from_file_name(format, "o1_mf_1_42_abc"), None);
        // token expects digits, finds none
        assert_eq!(sequence_from_file_name(format, "o1_mf_x_42_ab_.arc"), None);
    }

    #[test]
    fn test_scan_orders_by_sequence() {
        let dir = TempDir::new().unwrap();
        for name in ["arch_3.log", "arch_1.log", "arch_10.log", "unrelated.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = scan_archive_dir(dir.path(), "arch_%s.log").unwrap();
        let sequences: Vec<u32> = found.iter().map(|(s, _)| s.0).collect();
        assert_eq!(sequences, vec![1, 3, 10]);
    }

    #[test]
    fn test_path_mapping() {
        let mut mapping = PathMapping::default();
        mapping.add("/u01/oradata", "/mnt/redo");
        assert_eq!(
            mapping.apply("/u01/oradata/ORCL/redo01.log"),
            "/mnt/redo/ORCL/redo01.log"
        );
        assert_eq!(mapping.apply("/other/file"), "/other/file");
    }
}
