use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_DAEMON_PORT: u16 = 3434;
pub const DEFAULT_LSP_PORT: u16 = 3333;

pub const DAEMON_PORT_ENV: &str = "BUGBUDDY_DAEMON_PORT";
pub const DATA_DIR_ENV: &str = "BUGBUDDY_DIR";

/// Parse a port override, ignoring empty or invalid values.
pub fn parse_port(value: Option<&str>) -> Option<u16> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|port| *port != 0)
}

/// Get the daemon port
///
/// Priority:
/// 1. `BUGBUDDY_DAEMON_PORT` environment variable (if set and valid)
/// 2. [`DEFAULT_DAEMON_PORT`]
pub fn daemon_port() -> u16 {
    parse_port(std::env::var(DAEMON_PORT_ENV).ok().as_deref()).unwrap_or(DEFAULT_DAEMON_PORT)
}

pub fn daemon_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Get the data directory
///
/// Priority:
/// 1. `BUGBUDDY_DIR` environment variable (if set)
/// 2. `~/.bugbuddy`
/// 3. `./.bugbuddy` when no home directory is known
pub fn data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bugbuddy")
}

/// Create `path` if needed and return it.
pub fn ensure_data_dir(path: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(Some("4000")), Some(4000));
        assert_eq!(parse_port(Some(" 4000 ")), Some(4000));
        assert_eq!(parse_port(Some("")), None);
        assert_eq!(parse_port(Some("0")), None);
        assert_eq!(parse_port(Some("70000")), None);
        assert_eq!(parse_port(Some("abc")), None);
        assert_eq!(parse_port(None), None);
    }

    #[test]
    fn test_daemon_addr_is_loopback() {
        let addr = daemon_addr(DEFAULT_DAEMON_PORT);
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 3434);
    }

    #[test]
    fn test_data_dir_not_empty() {
        let path = data_dir();
        assert!(!path.as_os_str().is_empty());
    }

    #[test]
    fn test_ensure_data_dir_creates_nested() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        assert!(!nested.exists());
        let created = ensure_data_dir(&nested).unwrap();
        assert!(created.is_dir());
        ensure_data_dir(&nested).unwrap(); // Should not fail twice
    }
}
