use crate::error::{ConfigError, CoreError, WalletError};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Raw private key as read from disk. Wiped from memory on drop.
#[derive(Clone)]
pub struct RawKey(Zeroizing<String>);

impl RawKey {
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawKey(***REDACTED***)")
    }
}

#[derive(Debug)]
pub struct WalletManager {
    keys: Vec<RawKey>,
}

impl WalletManager {
    /// Reads one hex private key per line. Blank lines and `#` comments are
    /// ignored; malformed lines are skipped with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::IoError {
                path: path.display().to_string(),
                msg: e.to_string(),
            },
        })?;
        let content = Zeroizing::new(content);

        let mut keys = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match Self::normalize(trimmed, idx + 1) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("{}", e),
            }
        }

        if keys.is_empty() {
            return Err(WalletError::Empty {
                path: path.display().to_string(),
            }
            .into());
        }

        info!("Loaded {} private keys from {}", keys.len(), path.display());
        Ok(Self { keys })
    }

    fn normalize(raw: &str, line: usize) -> Result<RawKey, WalletError> {
        let hex_part = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);

        if hex_part.len() != 64 {
            return Err(WalletError::InvalidKey {
                line,
                reason: format!("expected 64 hex characters, got {}", hex_part.len()),
            });
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::InvalidKey {
                line,
                reason: "non-hex character".to_string(),
            });
        }

        Ok(RawKey(Zeroizing::new(format!("0x{}", hex_part))))
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn get(&self, index: usize) -> Result<&RawKey, WalletError> {
        self.keys.get(index).ok_or(WalletError::NotFound {
            index,
            total: self.keys.len(),
        })
    }

    pub fn keys(&self) -> &[RawKey] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_load_ignores_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# main wallets").unwrap();
        writeln!(file, "{}", KEY).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  0x{}  ", KEY).unwrap();

        let manager = WalletManager::load(file.path()).unwrap();
        assert_eq!(manager.count(), 2);
        assert_eq!(manager.get(0).unwrap().expose(), format!("0x{}", KEY));
        assert_eq!(manager.get(1).unwrap().expose(), format!("0x{}", KEY));
        assert!(manager.get(2).is_err());
    }

    #[test]
    fn test_invalid_lines_are_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deadbeef").unwrap();
        writeln!(file, "{}", KEY).unwrap();

        let manager = WalletManager::load(file.path()).unwrap();
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            WalletManager::load(file.path()),
            Err(CoreError::Wallet(WalletError::Empty { .. }))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = WalletManager::load(dir.path().join("priv.txt")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", KEY).unwrap();
        let manager = WalletManager::load(file.path()).unwrap();
        let printed = format!("{:?}", manager.get(0).unwrap());
        assert!(!printed.contains(KEY));
    }
}
