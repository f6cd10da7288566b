//! PID file guard.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{Error, Result};

/// A PID file held for the process lifetime. Creation fails when the file
/// already exists (another instance, or an unclean shutdown the operator
/// should look at); the file is removed on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::config(format!(
                "PID file {} already exists",
                path.display()
            )));
        }
        let mut file = fs::File::create(&path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        writeln!(file, "{}", std::process::id())
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Ok(PidFile { path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove PID file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("foxhole-pid-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_create_write_remove() {
        let path = scratch("basic");
        {
            let pidfile = PidFile::create(&path).unwrap();
            let text = fs::read_to_string(pidfile.path()).unwrap();
            assert_eq!(text.trim().parse::<u32>().unwrap(), std::process::id());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_refused() {
        let path = scratch("dup");
        fs::write(&path, "12345\n").unwrap();
        assert!(PidFile::create(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
