//! Stream + seek/tell/mmap over OS files.

use crate::error::{ErrorCode, Result};
use crate::fd_util::{retry_on_eintr, wait_for_fd};
use crate::stream::{ms_to_duration, Stream, StreamType};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use bitflags::bitflags;

bitflags! {
    /// Open-mode flags. Exactly one of `READ`/`WRITE` (or both) must be
    /// present; `EXECUTE` implies `READ`, `APPEND` implies `WRITE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const READ      = 0x01;
        const WRITE     = 0x02;
        const EXECUTE   = 0x04;
        const APPEND    = 0x08;
        const CREATE    = 0x10;
        const OVERWRITE = 0x20;
    }
}

bitflags! {
    /// Mapping protection/sharing flags for [`FileStream::map`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u32 {
        const READ    = 0x01;
        const WRITE   = 0x02;
        const EXECUTE = 0x04;
        const COW     = 0x08;
    }
}

const ALL_OPEN_FLAGS: u32 = 0x3F;
const ALL_MAP_FLAGS: u32 = 0x0F;

/// A stream backed by a regular file, with seek/tell/mmap.
#[derive(Debug)]
pub struct FileStream {
    fd: RawFd,
    flags: OpenFlags,
    timeout_ms: u32,
    destroyed: bool,
}

impl FileStream {
    /// Opens `path` with the given [`OpenFlags`], following
    /// `tl_file_open` in `original_source/os/src/unix/file.c`.
    pub fn open<P: AsRef<Path>>(path: P, mut flags: OpenFlags) -> Result<Self> {
        if flags.contains(OpenFlags::APPEND) {
            flags = flags | OpenFlags::WRITE;
        }
        if flags.contains(OpenFlags::EXECUTE) {
            flags = flags | OpenFlags::READ;
        }

        if (flags.bits() & !ALL_OPEN_FLAGS) != 0
            || !(flags.contains(OpenFlags::READ) || flags.contains(OpenFlags::WRITE))
        {
            return Err(ErrorCode::BadArg);
        }

        let mut of = libc::O_CLOEXEC;
        if flags.contains(OpenFlags::CREATE) {
            of |= libc::O_CREAT;
        }
        if flags.contains(OpenFlags::OVERWRITE) {
            of |= libc::O_TRUNC;
        }
        if flags.contains(OpenFlags::READ) && flags.contains(OpenFlags::WRITE) {
            of |= libc::O_RDWR;
        } else if flags.contains(OpenFlags::WRITE) {
            of |= libc::O_WRONLY;
        } else {
            of |= libc::O_RDONLY;
        }

        let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
            .map_err(|_| ErrorCode::BadArg)?;

        let fd = unsafe { libc::open(c_path.as_ptr(), of, 0o644) };
        if fd < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }

        Ok(FileStream {
            fd,
            flags,
            timeout_ms: 0,
            destroyed: false,
        })
    }

    /// Repositions the file offset.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let ret = unsafe { libc::lseek(self.fd, position as libc::off_t, libc::SEEK_SET) };
        if ret < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Returns the current file offset.
    pub fn tell(&self) -> Result<u64> {
        let ret = unsafe { libc::lseek(self.fd, 0, libc::SEEK_CUR) };
        if ret < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Ok(ret as u64)
    }

    /// Maps `count` bytes of the file starting at `offset` into memory.
    /// Writable+executable mappings the OS refuses surface as a failure
    /// here; permissions are never silently weakened.
    pub fn map(&self, offset: u64, count: usize, flags: MapFlags) -> Result<FileMapping> {
        if (flags.bits() & !ALL_MAP_FLAGS) != 0
            || !(flags.contains(MapFlags::READ)
                || flags.contains(MapFlags::WRITE)
                || flags.contains(MapFlags::EXECUTE))
        {
            return Err(ErrorCode::BadArg);
        }

        let mut prot = 0;
        if flags.contains(MapFlags::READ) {
            prot |= libc::PROT_READ;
        }
        if flags.contains(MapFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if flags.contains(MapFlags::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }

        let shared = if flags.contains(MapFlags::COW) {
            libc::MAP_PRIVATE
        } else {
            libc::MAP_SHARED
        };

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                count,
                prot,
                shared,
                self.fd,
                offset as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }

        Ok(FileMapping {
            ptr: ptr.cast(),
            len: count,
        })
    }
}

impl Stream for FileStream {
    fn stream_type(&self) -> StreamType {
        StreamType::File
    }

    fn set_timeout(&mut self, ms: u32) {
        self.timeout_ms = ms;
    }

    fn is_append_file(&self) -> bool {
        self.flags.contains(OpenFlags::APPEND)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(ErrorCode::NotSupported);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        wait_for_fd(self.fd, ms_to_duration(self.timeout_ms), false)?;
        let fd = self.fd;
        let n = retry_on_eintr(|| unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) });

        if n < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        if n == 0 {
            return Err(ErrorCode::Eof);
        }
        Ok(n as usize)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(ErrorCode::NotSupported);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let fd = self.fd;
        if self.flags.contains(OpenFlags::APPEND) {
            // Seek-end, write, seek-back: inherently racy under concurrent
            // writers on platforms without an atomic O_APPEND equivalent
            // for this code path. Documented, not hidden, per spec §9.
            let old = unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) };
            if old < 0 {
                return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
            }
            unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
            let n = retry_on_eintr(|| unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) });
            unsafe { libc::lseek(fd, old, libc::SEEK_SET) };
            if n < 0 {
                return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
            }
            return Ok(n as usize);
        }

        wait_for_fd(fd, ms_to_duration(self.timeout_ms), true)?;
        let n = retry_on_eintr(|| unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) });
        if n < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        unsafe {
            libc::close(self.fd);
        }
        Ok(())
    }

    fn raw_fd_for_splice(&self, writable: bool) -> Option<RawFd> {
        let ok = if writable {
            self.flags.contains(OpenFlags::WRITE)
        } else {
            self.flags.contains(OpenFlags::READ)
        };
        ok.then_some(self.fd)
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

/// A live window into a file's bytes, valid until [`FileMapping::destroy`].
#[derive(Debug)]
pub struct FileMapping {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is exclusively owned by this `FileMapping` and
// is not tied to the thread that created it.
unsafe impl Send for FileMapping {}

impl FileMapping {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes modified pages back and invalidates other processes' views
    /// of `[offset..offset+range)`, clamped to the mapping.
    pub fn flush(&self, offset: usize, range: usize) -> Result<()> {
        if offset >= self.len || range == 0 {
            return Ok(());
        }
        let range = range.min(self.len - offset);
        let ptr = unsafe { self.ptr.add(offset) };
        let ret = unsafe { libc::msync(ptr.cast(), range, libc::MS_SYNC | libc::MS_INVALIDATE) };
        if ret != 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn destroy(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr.cast(), self.len);
            }
            self.ptr = std::ptr::null_mut();
            self.len = 0;
        }
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        self.destroy();
    }
}
