use std::path::Path;
use std::time::Duration;

/// Waits `wait` and compares file size before/after, guarding against
/// reading a log file nginx is still writing to. Returns `true` when the
/// size held steady.
///
/// Sleeps on `tokio::time::sleep` rather than `std::thread::sleep` — this
/// runs inline inside a worker's `process_file` future, and a blocking
/// sleep of up to `wait` (30s by default) would tie up a runtime worker
/// thread instead of yielding it to other files' work.
pub async fn stabilize(path: &Path, wait: Duration) -> std::io::Result<bool> {
    let before = std::fs::metadata(path)?.len();
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
    let after = std::fs::metadata(path)?.len();
    Ok(before == after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn unchanged_file_is_stable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"steady").unwrap();
        assert!(stabilize(file.path(), Duration::ZERO).await.unwrap());
    }
}
