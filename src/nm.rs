use std::{ffi::OsStr, path::Path, process::Command};

use anyhow::{Context, Error, bail};
use log::debug;

/// Runs `nm --demangle -n` on `program` and returns its standard output.
///
/// `nm` is the command to run, which lets cross toolchains substitute their
/// own variant (e.g. `arm-none-eabi-nm`).
pub fn symbol_listing(nm: &OsStr, program: &Path) -> Result<Vec<u8>, Error> {
    debug!("Running {} on {}", nm.to_string_lossy(), program.display());

    let output = Command::new(nm)
        .args([OsStr::new("--demangle"), OsStr::new("-n")])
        .arg(program)
        .output()
        .with_context(|| format!("Failed to run {}", nm.to_string_lossy()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {} for {}: {}",
            nm.to_string_lossy(),
            output.status,
            program.display(),
            stderr.trim()
        );
    }

    Ok(output.stdout)
}
