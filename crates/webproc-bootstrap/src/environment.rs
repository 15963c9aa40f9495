//! One-shot environment setup for the libraries a web process loads.
//!
//! Each call exports environment variables consumed later by the cache,
//! font configuration and GIO module loaders. The calls are idempotent.
//! They mutate the process environment, so run them before spawning threads.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ConfigurationError;

pub const XDG_CACHE_HOME: &str = "XDG_CACHE_HOME";
pub const FONTCONFIG_PATH: &str = "FONTCONFIG_PATH";
pub const FONTCONFIG_FILE: &str = "FONTCONFIG_FILE";
pub const GIO_EXTRA_MODULES: &str = "GIO_EXTRA_MODULES";

const XDG_STEP: &str = "xdg cache";
const FONTCONFIG_STEP: &str = "fontconfig";
const GIO_STEP: &str = "gio extra modules";

type Result<T> = std::result::Result<T, ConfigurationError>;

/// Point the XDG cache at `path`, creating the directory if needed.
pub fn initialize_xdg(path: impl AsRef<Path>) -> Result<()> {
    let path = absolute(XDG_STEP, path.as_ref())?;
    if path.exists() && !path.is_dir() {
        return Err(ConfigurationError::NotADirectory {
            step: XDG_STEP,
            path,
        });
    }
    fs::create_dir_all(&path).map_err(|source| ConfigurationError::Io {
        step: XDG_STEP,
        path: path.clone(),
        source,
    })?;

    env::set_var(XDG_CACHE_HOME, &path);
    info!(path = %path.display(), "xdg cache configured");
    Ok(())
}

/// Point font configuration at `path`.
///
/// A directory becomes the config search path; a file is used as the config
/// file itself.
pub fn initialize_fontconfig(path: impl AsRef<Path>) -> Result<()> {
    let path = absolute(FONTCONFIG_STEP, path.as_ref())?;
    let metadata =
        fs::metadata(&path).map_err(|source| missing(FONTCONFIG_STEP, path.clone(), source))?;

    let var = if metadata.is_dir() {
        FONTCONFIG_PATH
    } else {
        FONTCONFIG_FILE
    };
    env::set_var(var, &path);
    info!(var, path = %path.display(), "fontconfig configured");
    Ok(())
}

/// Add `path` to the GIO extra modules search list.
pub fn initialize_gio_extra_modules_path(path: impl AsRef<Path>) -> Result<()> {
    let path = absolute(GIO_STEP, path.as_ref())?;
    let metadata =
        fs::metadata(&path).map_err(|source| missing(GIO_STEP, path.clone(), source))?;
    if !metadata.is_dir() {
        return Err(ConfigurationError::NotADirectory {
            step: GIO_STEP,
            path,
        });
    }

    let current = env::var_os(GIO_EXTRA_MODULES).unwrap_or_default();
    let mut entries: Vec<PathBuf> = env::split_paths(&current)
        .filter(|entry| !entry.as_os_str().is_empty())
        .collect();
    if entries.contains(&path) {
        debug!(path = %path.display(), "gio module path already registered");
        return Ok(());
    }
    entries.push(path.clone());

    let joined: OsString =
        env::join_paths(&entries).map_err(|_| ConfigurationError::InvalidPath {
            step: GIO_STEP,
            path: path.clone(),
        })?;
    env::set_var(GIO_EXTRA_MODULES, &joined);
    info!(path = %path.display(), "gio extra modules path registered");
    Ok(())
}

fn absolute(step: &'static str, path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ConfigurationError::EmptyPath { step });
    }
    std::path::absolute(path).map_err(|source| ConfigurationError::Io {
        step,
        path: path.to_path_buf(),
        source,
    })
}

fn missing(step: &'static str, path: PathBuf, source: std::io::Error) -> ConfigurationError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ConfigurationError::NotFound { step, path }
    } else {
        ConfigurationError::Io { step, path, source }
    }
}
