//! Boot sequence
//!
//! [`KernelBuilder`] creates a kernel and lays out the default image:
//!
//! ```text
//! /                 0755
//! ├── bin -> /usr/bin
//! ├── etc/profile   0755
//! ├── home/
//! ├── root/
//! ├── usr/bin/      echo cat env ls (+ the shell, if one was supplied)
//! ├── proc/         process information
//! └── dev/
//!     ├── pts/      PTY slaves appear here
//!     └── ptmx      PTY master
//! ```
//!
//! Extra files, programs and mounts registered on the builder are applied
//! after the image, in that order.

use super::connection::Connection;
use super::{Kernel, Program, ProcessContext};
use crate::config::KernelConfig;
use crate::error::KResult;
use crate::programs;
use crate::vfs::{path, Inode};
use std::rc::Rc;

/// Mode of every directory and executable in the image
const IMAGE_MODE: u32 = 0o755;

pub struct KernelBuilder {
    config: KernelConfig,
    shell: Option<Program>,
    files: Vec<(String, Vec<u8>, u32)>,
    programs: Vec<(String, Program)>,
    mounts: Vec<(String, Inode)>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            shell: None,
            files: Vec::new(),
            programs: Vec::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Program installed at the configured shell path and run behind each
    /// terminal connection
    pub fn with_shell(mut self, shell: Program) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Regular file, root-owned
    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>, mode: u32) -> Self {
        self.files.push((path.to_string(), data.into(), mode));
        self
    }

    /// Executable file backed by `program`
    pub fn with_program(mut self, path: &str, program: Program) -> Self {
        self.programs.push((path.to_string(), program));
        self
    }

    pub fn with_mount(mut self, path: &str, inode: Inode) -> Self {
        self.mounts.push((path.to_string(), inode));
        self
    }

    pub fn build(self) -> KResult<Rc<Kernel>> {
        let kernel = Kernel::new(self.config)?;
        let ctx = kernel.context();

        init_image(&ctx, self.shell)?;
        init_devices(&ctx)?;

        let vfs = kernel.vfs();
        for (path, data, mode) in self.files {
            vfs.install(&ctx, &path, Inode::file(mode, data))?;
        }
        for (path, program) in self.programs {
            vfs.install(&ctx, &path, Inode::executable(IMAGE_MODE, program))?;
        }
        for (path, inode) in self.mounts {
            vfs.mount(&ctx, &path, inode)?;
        }

        log::info!(
            "booted: {} inodes, shell {}",
            vfs.inode_count(),
            kernel.config().shell
        );
        Ok(kernel)
    }

    /// Build, then open a terminal connection to the shell
    pub fn build_with_connection(self) -> KResult<(Rc<Kernel>, Connection)> {
        let kernel = self.build()?;
        let connection = kernel.new_connection()?;
        Ok((kernel, connection))
    }
}

/// The root filesystem: directories, profile, programs and `/proc`
fn init_image(ctx: &ProcessContext, shell: Option<Program>) -> KResult<()> {
    let kernel = &ctx.kernel;
    let vfs = kernel.vfs();

    vfs.symlink(ctx, "/bin", "/usr/bin")?;
    vfs.install(ctx, "/etc", Inode::directory(IMAGE_MODE))?;
    let profile = kernel.config().profile.as_bytes().to_vec();
    vfs.install(ctx, "/etc/profile", Inode::file(IMAGE_MODE, profile))?;
    for dir in ["/home", "/root", "/usr", "/usr/bin"] {
        vfs.install(ctx, dir, Inode::directory(IMAGE_MODE))?;
    }

    for (name, program) in programs::builtins() {
        let path = path::join("/usr/bin", name);
        vfs.install(ctx, &path, Inode::executable(IMAGE_MODE, program))?;
    }
    if let Some(shell) = shell {
        let path = kernel.config().shell.clone();
        vfs.install(ctx, &path, Inode::executable(IMAGE_MODE, shell))?;
    }

    vfs.mount(ctx, "/proc", Inode::proc_root())?;
    Ok(())
}

/// `/dev` is laid out after the image so the PTY master lands in a tree
/// that already exists
fn init_devices(ctx: &ProcessContext) -> KResult<()> {
    let vfs = ctx.kernel.vfs();
    vfs.install(ctx, "/dev", Inode::directory(IMAGE_MODE))?;
    vfs.install(ctx, "/dev/pts", Inode::directory(IMAGE_MODE))?;
    vfs.mount(ctx, "/dev/ptmx", Inode::ptmx())?;
    Ok(())
}
