//! Environment and working directory syscalls

use crate::error::KResult;
use crate::kernel::ProcessContext;
use std::collections::BTreeMap;

pub fn getenv(ctx: &ProcessContext, name: &str) -> KResult<Option<String>> {
    ctx.with_process(|p| p.env.get(name).map(str::to_string))
}

/// Returns whether the value was written (`overwrite == false` keeps an
/// existing value)
pub fn setenv(ctx: &ProcessContext, name: &str, value: &str, overwrite: bool) -> KResult<bool> {
    ctx.with_process_mut(|p| p.env.set(name, value, overwrite))?
}

pub fn unsetenv(ctx: &ProcessContext, name: &str) -> KResult<bool> {
    ctx.with_process_mut(|p| p.env.unset(name))
}

/// Snapshot of the whole environment
pub fn environ(ctx: &ProcessContext) -> KResult<BTreeMap<String, String>> {
    ctx.with_process(|p| p.env.to_map())
}

pub fn getcwd(ctx: &ProcessContext) -> KResult<String> {
    ctx.with_process(|p| p.cwd.clone())
}

/// Change directory; the target must be a directory the caller can enter
pub fn chdir(ctx: &ProcessContext, path: &str) -> KResult<()> {
    let target = ctx.resolve(path)?;
    ctx.kernel.vfs().chdir_target(ctx, &target)?;
    ctx.with_process_mut(|p| p.cwd = target)
}
