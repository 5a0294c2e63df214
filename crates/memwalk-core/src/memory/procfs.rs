//! # Linux Process Memory
//!
//! Reads a live process through `/proc/<pid>/mem`.
//!
//! The file is opened read-only and accessed with positioned reads, so the
//! handle carries no cursor state. Opening it needs the same permission as
//! `ptrace` attach (same user and `ptrace_scope` permitting, or `CAP_SYS_PTRACE`).
//!
//! The target keeps running. Nothing here stops it, so every traversal over a
//! live process is best-effort.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use tracing::debug;

use super::{MemoryAccessor, PointerWidth};
use crate::error::{WalkError, WalkResult};
use crate::types::Address;

/// Read-only view of a live Linux process.
#[derive(Debug)]
pub struct ProcessMemory
{
    pid: u32,
    file: File,
    pointer_width: PointerWidth,
}

impl ProcessMemory
{
    /// Open `/proc/<pid>/mem` for reading.
    ///
    /// ## Errors
    ///
    /// - `Io` with `NotFound` if the process does not exist
    /// - `Io` with `PermissionDenied` if ptrace access is refused
    pub fn open(pid: u32) -> WalkResult<Self>
    {
        let path = PathBuf::from(format!("/proc/{pid}/mem"));
        let file = File::open(&path)?;
        debug!(pid, path = %path.display(), "opened process memory");
        Ok(Self {
            pid,
            file,
            pointer_width: PointerWidth::Bits64,
        })
    }

    /// Override the target pointer width (for 32-bit processes).
    #[must_use]
    pub fn with_pointer_width(mut self, pointer_width: PointerWidth) -> Self
    {
        self.pointer_width = pointer_width;
        self
    }

    pub fn pid(&self) -> u32
    {
        self.pid
    }
}

impl MemoryAccessor for ProcessMemory
{
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>
    {
        let mut buffer = vec![0u8; len];
        if len == 0 {
            return Ok(buffer);
        }

        match self.file.read_exact_at(&mut buffer, addr.value()) {
            Ok(()) => Ok(buffer),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(WalkError::OutOfRange { address: addr, len }),
            Err(err) if matches!(err.raw_os_error(), Some(libc::EIO | libc::EFAULT)) => {
                Err(WalkError::UnmappedMemory { address: addr, len })
            }
            Err(err) => Err(WalkError::Io(err)),
        }
    }

    fn pointer_width(&self) -> PointerWidth
    {
        self.pointer_width
    }
}
