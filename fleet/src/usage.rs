// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Measurement of actual tenant resource consumption
//!
//! Disk usage is the tenant workspace's actual on-disk size; bandwidth is
//! reconstructed from the tenant's reverse-proxy access log.  Both are
//! measurements of reality, deliberately independent of what the allocator
//! *granted* — the quota monitor compares the two.

use chrono::{DateTime, FixedOffset, Utc};
use emporos_common::api::external::AlertSeverity;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Returns the total size in bytes of all regular files under `root`.
/// Symlinks are not followed.  A missing root counts as zero — a tenant
/// whose workspace is gone is consuming nothing.
pub fn directory_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

/// Sums the bytes served since `since` according to a combined-format access
/// log.  Unparseable lines are skipped rather than treated as errors: a torn
/// final line is normal for a live log file.  A missing log file counts as
/// zero bytes — the tenant has served no traffic yet.
pub fn bandwidth_since(
    log_path: &Path,
    since: DateTime<Utc>,
) -> std::io::Result<u64> {
    let file = match fs::File::open(log_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut total = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some((timestamp, bytes)) = parse_access_line(&line) {
            if timestamp >= since {
                total += bytes;
            }
        }
    }
    Ok(total)
}

/// Parses one combined-log-format line into (timestamp, bytes sent).
///
///   127.0.0.1 - - [10/Oct/2024:13:55:36 +0000] "GET / HTTP/1.1" 200 2326 ...
///
/// The byte count is the second token after the closing quote of the request
/// line; "-" (connection closed before any bytes) counts as zero.
pub fn parse_access_line(line: &str) -> Option<(DateTime<Utc>, u64)> {
    let ts_start = line.find('[')? + 1;
    let ts_end = line[ts_start..].find(']')? + ts_start;
    let timestamp = DateTime::<FixedOffset>::parse_from_str(
        &line[ts_start..ts_end],
        "%d/%b/%Y:%H:%M:%S %z",
    )
    .ok()?
    .with_timezone(&Utc);

    let req_start = line[ts_end..].find('"')? + ts_end + 1;
    let req_end = line[req_start..].find('"')? + req_start;
    let mut rest = line[req_end + 1..].split_whitespace();
    let _status = rest.next()?;
    let bytes = match rest.next()? {
        "-" => 0,
        value => value.parse().ok()?,
    };
    Some((timestamp, bytes))
}

/// Decides whether a measurement warrants an alert.  ≥90% of the ceiling is
/// critical, ≥80% a warning; both are evaluated on integer math so a huge
/// ceiling cannot overflow or lose precision in floats.
pub fn evaluate_usage(used: u64, limit: u64) -> Option<AlertSeverity> {
    if limit == 0 {
        return None;
    }
    let used = used as u128;
    let limit = limit as u128;
    if used * 10 >= limit * 9 {
        Some(AlertSeverity::Critical)
    } else if used * 10 >= limit * 8 {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_evaluate_usage_thresholds() {
        assert_eq!(evaluate_usage(0, 100), None);
        assert_eq!(evaluate_usage(79, 100), None);
        assert_eq!(evaluate_usage(80, 100), Some(AlertSeverity::Warning));
        assert_eq!(evaluate_usage(89, 100), Some(AlertSeverity::Warning));
        assert_eq!(evaluate_usage(90, 100), Some(AlertSeverity::Critical));
        assert_eq!(evaluate_usage(150, 100), Some(AlertSeverity::Critical));
        // A zero limit can't meaningfully alert.
        assert_eq!(evaluate_usage(5, 0), None);
    }

    #[test]
    fn test_parse_access_line() {
        let line = "203.0.113.9 - - [10/Oct/2024:13:55:36 +0000] \
                    \"GET /product/3 HTTP/1.1\" 200 2326 \"-\" \"curl/8.0\"";
        let (timestamp, bytes) = parse_access_line(line).unwrap();
        assert_eq!(bytes, 2326);
        assert_eq!(
            timestamp,
            Utc.with_ymd_and_hms(2024, 10, 10, 13, 55, 36).unwrap()
        );
    }

    #[test]
    fn test_parse_access_line_dash_bytes() {
        let line = "203.0.113.9 - - [10/Oct/2024:13:55:36 +0000] \
                    \"GET / HTTP/1.1\" 499 - \"-\" \"-\"";
        let (_, bytes) = parse_access_line(line).unwrap();
        assert_eq!(bytes, 0);
    }

    #[test]
    fn test_parse_access_line_garbage() {
        assert!(parse_access_line("not a log line").is_none());
        assert!(parse_access_line("").is_none());
    }

    #[test]
    fn test_bandwidth_since_filters_by_time() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(
            &path,
            "1.2.3.4 - - [01/Jan/2024:00:00:00 +0000] \"GET / HTTP/1.1\" 200 100 \"-\" \"-\"\n\
             1.2.3.4 - - [01/Mar/2024:00:00:00 +0000] \"GET / HTTP/1.1\" 200 250 \"-\" \"-\"\n\
             garbage line\n\
             1.2.3.4 - - [02/Mar/2024:00:00:00 +0000] \"GET / HTTP/1.1\" 200 50 \"-\" \"-\"\n",
        )
        .unwrap();
        let since = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let total = bandwidth_since(path.as_std_path(), since).unwrap();
        assert_eq!(total, 300);
    }

    #[test]
    fn test_directory_size_missing_root() {
        assert_eq!(
            directory_size(Path::new("/nonexistent/emporos-test")).unwrap(),
            0
        );
    }

    #[test]
    fn test_directory_size_counts_nested_files() {
        let dir = camino_tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/x"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("a/b/y"), vec![0u8; 32]).unwrap();
        assert_eq!(
            directory_size(dir.path().as_std_path()).unwrap(),
            42
        );
    }
}
