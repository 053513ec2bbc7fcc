use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Process-wide advisory lock against two daemons running against the
/// same log root. Backed by an exclusively-created marker file — POSIX
/// `O_EXCL` semantics give us atomicity without a third-party crate.
pub struct DaemonLock {
    path: PathBuf,
}

impl DaemonLock {
    pub fn acquire(root: &Path) -> io::Result<Self> {
        let path = root.join(".etl-daemon.lock");
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("another daemon already holds {}", path.display()),
            )),
            Err(e) => Err(e),
        }
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
