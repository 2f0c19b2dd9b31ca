use std::path::{Path, PathBuf};

use thiserror::Error;

/// CA certificate file name inside the CA root directory
pub const CA_CERT_FILENAME: &str = "rootCA.pem";
/// CA private key file name inside the CA root directory
pub const CA_KEY_FILENAME: &str = "rootCA-key.pem";

#[derive(Debug, Error)]
pub enum PathsError {
    #[error("Could not determine the CA root directory; set CAROOT or --caroot")]
    NoCaRoot,
}

/// Locate the mkcert CA root directory.
///
/// Lookup order:
/// - `CAROOT` if set and non-empty
/// - `$XDG_DATA_HOME/mkcert`
/// - the platform data directory (`~/Library/Application Support` on macOS,
///   `%LocalAppData%` on Windows, `~/.local/share` elsewhere) joined with `mkcert`
pub fn ca_root_dir() -> Result<PathBuf, PathsError> {
    if let Ok(v) = std::env::var("CAROOT")
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    let xdg = std::env::var_os("XDG_DATA_HOME").map(PathBuf::from);
    ca_root_from(xdg, platform_data_dir()).ok_or(PathsError::NoCaRoot)
}

fn ca_root_from(xdg_data_home: Option<PathBuf>, platform_dir: Option<PathBuf>) -> Option<PathBuf> {
    let base = xdg_data_home
        .filter(|p| !p.as_os_str().is_empty() && !cfg!(windows))
        .or(platform_dir)?;
    Some(base.join("mkcert"))
}

#[cfg(target_os = "windows")]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir()
}

#[cfg(target_os = "macos")]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Library").join("Application Support"))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".local").join("share"))
}

/// Paths of the CA certificate and key under `root`
pub fn ca_files(root: &Path) -> (PathBuf, PathBuf) {
    (root.join(CA_CERT_FILENAME), root.join(CA_KEY_FILENAME))
}
