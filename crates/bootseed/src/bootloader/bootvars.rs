//! Boot variable state machine.
//!
//! The target is either stable (`mode` empty) or trying a new kernel/OS pair
//! (`mode=trying` with `try-kernel`/`try-core` naming the candidates). A
//! successful boot promotes the candidates and returns to stable.

use crate::bootloader::Bootloader;
use crate::error::{Error, ErrorKind, Result};

pub const MODE: &str = "mode";
pub const KERNEL: &str = "kernel";
pub const CORE: &str = "core";
pub const TRY_KERNEL: &str = "try-kernel";
pub const TRY_CORE: &str = "try-core";

pub const MODE_TRYING: &str = "trying";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootState {
    Stable,
    Trying { try_kernel: String, try_core: String },
    /// Any other `mode`, left to whoever wrote it.
    Other(String),
}

pub fn read_state(bl: &dyn Bootloader) -> Result<BootState> {
    let mode = bl.get_boot_var(MODE)?;
    match mode.as_str() {
        "" => Ok(BootState::Stable),
        MODE_TRYING => Ok(BootState::Trying {
            try_kernel: bl.get_boot_var(TRY_KERNEL)?,
            try_core: bl.get_boot_var(TRY_CORE)?,
        }),
        _ => Ok(BootState::Other(mode)),
    }
}

/// First-boot selection written while bootstrapping a fresh target.
pub fn set_initial(bl: &dyn Bootloader, kernel: &str, core: &str) -> Result<()> {
    if let BootState::Trying { .. } = read_state(bl)? {
        return Err(Error::new(
            ErrorKind::BootVar,
            format!(
                "refusing to reset boot variables while {} is trying a new boot",
                bl.name()
            ),
        ));
    }
    bl.set_boot_vars(&[(KERNEL, kernel), (CORE, core), (MODE, "")])?;
    tracing::info!(bootloader = bl.name(), kernel, core, "set initial boot variables");
    Ok(())
}

/// Confirms a pending swap. Any mode other than `trying` is left untouched.
pub fn mark_boot_successful(bl: &dyn Bootloader) -> Result<()> {
    let BootState::Trying {
        try_kernel,
        try_core,
    } = read_state(bl)?
    else {
        tracing::debug!(bootloader = bl.name(), "no pending boot to confirm");
        return Ok(());
    };

    let mut vars: Vec<(&str, &str)> = Vec::with_capacity(5);
    if !try_kernel.is_empty() {
        vars.push((KERNEL, try_kernel.as_str()));
    }
    if !try_core.is_empty() {
        vars.push((CORE, try_core.as_str()));
    }
    vars.extend([(MODE, ""), (TRY_KERNEL, ""), (TRY_CORE, "")]);
    bl.set_boot_vars(&vars)?;
    tracing::info!(
        bootloader = bl.name(),
        kernel = %try_kernel,
        core = %try_core,
        "marked boot successful"
    );
    Ok(())
}
