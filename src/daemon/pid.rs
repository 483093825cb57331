use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub fn ensure_directories(pid_file: &Path) -> Result<()> {
    if let Some(dir) = pid_file.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    Ok(())
}

pub fn get_pid(pid_file: &Path) -> Result<Option<u32>> {
    if pid_file.exists() {
        let content = fs::read_to_string(pid_file)?;
        let pid = content
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Corrupt PID file: {:?}", pid_file))?;
        Ok(Some(pid))
    } else {
        Ok(None)
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// PID of a live daemon, cleaning up a stale file if the process is gone.
pub fn running_pid(pid_file: &Path) -> Option<u32> {
    let pid = get_pid(pid_file).ok().flatten()?;
    if process_alive(pid) {
        return Some(pid);
    }
    if let Err(e) = remove_pid_file(pid_file) {
        eprintln!("Warning: Could not remove stale PID file: {}", e);
    }
    None
}

pub fn save_pid(pid_file: &Path, pid: u32) -> Result<()> {
    ensure_directories(pid_file)?;
    fs::write(pid_file, pid.to_string()).with_context(|| format!("Failed to write PID file: {:?}", pid_file))?;
    Ok(())
}

pub fn remove_pid_file(pid_file: &Path) -> Result<()> {
    if pid_file.exists() {
        fs::remove_file(pid_file)?;
    }
    Ok(())
}

/// Remove the PID file only if it still names this process.
pub fn release_pid(pid_file: &Path) {
    if let Ok(Some(pid)) = get_pid(pid_file) {
        if pid == std::process::id() {
            let _ = remove_pid_file(pid_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_read_release() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run/fanbridge.pid");

        assert_eq!(get_pid(&pid_file).unwrap(), None);
        save_pid(&pid_file, std::process::id()).unwrap();
        assert_eq!(get_pid(&pid_file).unwrap(), Some(std::process::id()));
        assert_eq!(running_pid(&pid_file), Some(std::process::id()));

        release_pid(&pid_file);
        assert!(!pid_file.exists());
    }

    #[test]
    fn foreign_pid_is_not_released() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("fanbridge.pid");
        save_pid(&pid_file, std::process::id() + 1).unwrap();
        release_pid(&pid_file);
        assert!(pid_file.exists());
    }

    #[test]
    fn corrupt_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("fanbridge.pid");
        fs::write(&pid_file, "not-a-pid").unwrap();
        assert!(get_pid(&pid_file).is_err());
        assert_eq!(running_pid(&pid_file), None);
    }
}
