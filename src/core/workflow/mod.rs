//! Workflow orchestrators (C12): `up`, `down`, `setup`, `to`, `upgrade`,
//! `rotate`. Each composes the lower-level components (C5/C7/C9/C10/C11)
//! under the step runner and applies the rollback policy described in its
//! own section of the spec.

pub mod down;
pub mod migrate;
pub mod rotate;
pub mod setup;
pub mod up;
pub mod upgrade;

use crate::core::host;
use crate::error::{Error, Result};

/// Resolves which host a command should target: an explicit `-H` flag
/// beats the configured default, which errors if unset.
pub fn resolve_host(explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        host::validate(name)?;
        return Ok(name.to_string());
    }
    let global = host::load_global()?;
    global.default_host.ok_or(Error::NoDefaultHost)
}

/// `up`'s host resolution order (§4.12.1): explicit flag, then the
/// manifest's `host:` field, then the sole configured host if exactly one
/// exists, else an error.
pub fn resolve_host_for_up(explicit: Option<&str>, manifest_host: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        host::validate(name)?;
        return Ok(name.to_string());
    }
    if let Some(name) = manifest_host {
        host::validate(name)?;
        return Ok(name.to_string());
    }
    let hosts = host::list()?;
    match hosts.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(Error::NoDefaultHost),
        _ => host::load_global()?.default_host.ok_or(Error::NoDefaultHost),
    }
}
