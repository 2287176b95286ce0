//! Host platform utility functions

use std::path::PathBuf;

/// Environment variable pointing at the root of the software checkout.
pub const ROOT_ENV_VAR: &str = "DRIVE_CTRL_ROOT";

/// Get the root directory of the software, as set in the `DRIVE_CTRL_ROOT` environment variable.
///
/// Parameter files are loaded from `<root>/params` and sessions are written under the root.
pub fn get_drive_ctrl_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(ROOT_ENV_VAR).map(PathBuf::from)
}
