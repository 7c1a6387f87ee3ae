//! Log file tailing behind a glob allow-list.

use hostlink_core::util::clean_path;
use hostlink_core::{Error, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const MAX_LINES: i64 = 10_000;

/// Files below this size are read in one pass; larger files are tailed
/// backward in chunks.
const SMALL_FILE_BYTES: u64 = 1024 * 1024;
const CHUNK_BYTES: u64 = 4096;

/// Read the last `lines` lines of `log_path`, in file order.
///
/// Request bounds are checked before anything touches the filesystem; the
/// path must canonicalize to one of the allow-pattern expansions.
pub fn fetch_log_lines(log_path: &str, lines: i64, allowed_patterns: &[String]) -> Result<Vec<String>> {
    if lines <= 0 {
        return Err(Error::Validation("lines must be greater than 0".to_string()));
    }
    if lines > MAX_LINES {
        return Err(Error::Validation(format!("lines cannot exceed {MAX_LINES}")));
    }

    if !is_path_allowed(log_path, allowed_patterns) {
        return Err(Error::LogPathNotAllowed(log_path.to_string()));
    }

    tail_file(Path::new(log_path), lines as usize)
}

/// A requested path is allowed when its lexically cleaned form equals one
/// of the paths an allow pattern expands to.
fn is_path_allowed(requested: &str, allowed_patterns: &[String]) -> bool {
    let requested = clean_path(Path::new(requested));

    for pattern in allowed_patterns {
        let Ok(matches) = glob::glob(pattern) else {
            continue;
        };
        for entry in matches.flatten() {
            if requested == clean_path(&entry) {
                return true;
            }
        }
    }

    false
}

fn tail_file(path: &Path, n: usize) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    if size < SMALL_FILE_BYTES {
        read_all_lines(file, n)
    } else {
        read_last_lines(file, size, n)
    }
}

fn read_all_lines(file: File, n: usize) -> Result<Vec<String>> {
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let mut line = line?;
        if line.ends_with('\r') {
            line.pop();
        }
        lines.push(line);
    }
    if lines.len() > n {
        lines.drain(..lines.len() - n);
    }
    Ok(lines)
}

/// Tail a large file by reading fixed-size chunks backward from EOF,
/// splitting on newlines. The partial line at the start of the file
/// counts as a line.
fn read_last_lines(mut file: File, size: u64, n: usize) -> Result<Vec<String>> {
    let mut lines: VecDeque<String> = VecDeque::new();
    // Bytes of the line currently being assembled, collected in reverse.
    let mut current: Vec<u8> = Vec::new();
    let mut pos = size;

    'outer: while pos > 0 {
        let read_size = CHUNK_BYTES.min(pos);
        pos -= read_size;

        file.seek(SeekFrom::Start(pos))?;
        let mut buffer = vec![0u8; read_size as usize];
        file.read_exact(&mut buffer)?;

        for &byte in buffer.iter().rev() {
            match byte {
                b'\n' => {
                    if !current.is_empty() {
                        current.reverse();
                        lines.push_front(String::from_utf8_lossy(&current).into_owned());
                        current.clear();
                    }
                    if lines.len() >= n {
                        break 'outer;
                    }
                }
                b'\r' => {}
                other => current.push(other),
            }
        }
    }

    if lines.len() < n && !current.is_empty() {
        current.reverse();
        lines.push_front(String::from_utf8_lossy(&current).into_owned());
    }

    Ok(lines.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let dir = std::env::temp_dir().join(format!("hostlink-logs-{tag}-{nanos}"));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.0.join(name);
            let mut file = File::create(&path).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
            path
        }

        fn pattern(&self, glob: &str) -> Vec<String> {
            vec![self.0.join(glob).display().to_string()]
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn small_file_returns_final_lines_in_order() {
        let dir = TempDir::new("small");
        let body: String = (1..=10).map(|i| format!("L{i}\n")).collect();
        let path = dir.write("app.log", &body);

        let lines =
            fetch_log_lines(path.to_str().unwrap(), 3, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines, vec!["L8", "L9", "L10"]);
    }

    #[test]
    fn requesting_more_lines_than_exist_returns_all() {
        let dir = TempDir::new("short");
        let path = dir.write("app.log", "a\nb\n");

        let lines =
            fetch_log_lines(path.to_str().unwrap(), 100, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn line_bounds_fail_before_touching_the_filesystem() {
        // Deliberately nonexistent path: validation must reject first.
        let allowed = vec!["/nonexistent/*.log".to_string()];
        for bad in [0, -1, 10_001] {
            let err = fetch_log_lines("/nonexistent/app.log", bad, &allowed).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "lines={bad}");
        }
    }

    #[test]
    fn path_outside_allow_list_is_rejected() {
        let dir = TempDir::new("deny");
        dir.write("app.log", "x\n");
        let secret = dir.write("secret.txt", "s\n");

        let err = fetch_log_lines(secret.to_str().unwrap(), 1, &dir.pattern("*.log"))
            .unwrap_err();
        assert!(matches!(err, Error::LogPathNotAllowed(_)));
    }

    #[test]
    fn traversal_that_escapes_the_globs_is_rejected() {
        let dir = TempDir::new("traverse");
        dir.write("app.log", "x\n");
        let secret = dir.write("secret.txt", "s\n");

        let sneaky = format!(
            "{}/subdir/../{}",
            dir.0.display(),
            secret.file_name().unwrap().to_str().unwrap()
        );
        let err = fetch_log_lines(&sneaky, 1, &dir.pattern("*.log")).unwrap_err();
        assert!(matches!(err, Error::LogPathNotAllowed(_)));
    }

    #[test]
    fn cleaned_path_matching_allow_list_is_accepted() {
        let dir = TempDir::new("clean");
        dir.write("app.log", "one\ntwo\n");

        let sneaky = format!("{}/subdir/../app.log", dir.0.display());
        let lines = fetch_log_lines(&sneaky, 5, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn large_file_tail_matches_small_file_semantics() {
        let dir = TempDir::new("large");
        // ~1.4 MiB: forces the backward chunked path.
        let mut body = String::new();
        for i in 1..=20_000 {
            body.push_str(&format!("line number {i} padded {:0>50}\n", i));
        }
        assert!(body.len() as u64 > SMALL_FILE_BYTES);
        let path = dir.write("big.log", &body);

        let lines = fetch_log_lines(path.to_str().unwrap(), 4, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("line number 19997 "));
        assert!(lines[3].starts_with("line number 20000 "));
    }

    #[test]
    fn large_file_without_trailing_newline_keeps_partial_line() {
        let dir = TempDir::new("partial");
        let mut body = "start-of-file".to_string();
        for _ in 0..300_000 {
            body.push_str("\nfiller");
        }
        assert!(body.len() as u64 > SMALL_FILE_BYTES);
        let path = dir.write("partial.log", &body);

        // The file ends without a newline; its last segment still counts.
        let lines = fetch_log_lines(path.to_str().unwrap(), 2, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines, vec!["filler", "filler"]);
    }

    #[test]
    fn bof_partial_line_is_included_when_budget_allows() {
        let dir = TempDir::new("bof");
        let mut body = "first-line-without-newline-prefix".to_string();
        body.push('\n');
        let filler = format!("{}\n", "t".repeat(200));
        while (body.len() as u64) <= SMALL_FILE_BYTES {
            body.push_str(&filler);
        }
        let path = dir.write("bof.log", &body);

        let total_lines = body.lines().count() as i64;
        assert!(total_lines < MAX_LINES);
        let lines =
            fetch_log_lines(path.to_str().unwrap(), total_lines, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines.first().unwrap(), "first-line-without-newline-prefix");
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let dir = TempDir::new("crlf");
        let path = dir.write("win.log", "a\r\nb\r\nc\r\n");

        let lines = fetch_log_lines(path.to_str().unwrap(), 2, &dir.pattern("*.log")).unwrap();
        assert_eq!(lines, vec!["b", "c"]);
    }
}
