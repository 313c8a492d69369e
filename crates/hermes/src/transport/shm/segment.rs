// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment (`shm_open` + `mmap`).
//!
//! The creator sizes and zeroes the segment; openers learn the size with
//! `fstat`. Dropping a segment unmaps it but never unlinks it: unlinking is
//! the owner's decision.

use super::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Mapped POSIX shared memory segment.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapping is shared memory whose concurrent access goes through
// atomics in the structures laid over it. The pointer itself is never
// reassigned after construction.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new segment of `size` bytes.
    ///
    /// Fails with [`ShmError::AlreadyExists`] if the name is taken, so two
    /// racing creators never clobber each other.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid NUL-terminated string
        // - O_CREAT|O_EXCL|O_RDWR with mode 0o600 is a valid flag/mode set
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Err(ShmError::AlreadyExists(name.to_string()));
            }
            return Err(ShmError::SegmentCreate(err));
        }

        // SAFETY: fd is a valid descriptor returned by shm_open above
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and closed exactly once; the half-created
            // name is removed so a retry can succeed
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::SegmentCreate(err));
        }

        let ptr = match map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                // SAFETY: c_name is valid; the segment was created by us
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        // SAFETY: ptr maps exactly `size` writable bytes that nobody else
        // can reach yet (magic is still zero)
        unsafe { ptr::write_bytes(ptr, 0, size) };

        log::debug!("[SHM] Created segment {} ({} bytes)", name, size);
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing segment and map its full current size.
    pub fn open(name: &str) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; mode is ignored without O_CREAT
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::NotFound => ShmError::NotFound(name.to_string()),
                _ => ShmError::SegmentOpen(err),
            });
        }

        // SAFETY: zeroed stat is a valid out-parameter; fd is valid
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid and st is a writable stat struct
        if unsafe { libc::fstat(fd, &mut st) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and closed once
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentOpen(err));
        }
        let size = st.st_size as usize;
        if size == 0 {
            // SAFETY: fd is valid and closed once
            unsafe { libc::close(fd) };
            return Err(ShmError::TooSmall { size, needed: 1 });
        }

        let ptr = map(fd, size)?;
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Remove a segment name. Missing segments are not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
        // SAFETY: c_name is a valid NUL-terminated string
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    /// True if a segment with this name exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };
        // SAFETY: c_name is a valid NUL-terminated string
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is valid and closed once
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Base address of the mapping.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Mapped size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Segment name (leading `/` included).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from a successful mmap and are unmapped once
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}

/// Map `size` bytes of `fd` read-write and close `fd`.
fn map(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY:
    // - null hint lets the kernel choose the address
    // - fd is a valid shm descriptor of at least `size` bytes
    // - MAP_FAILED is checked below
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    // SAFETY: the mapping keeps its own reference, fd is closed once
    unsafe { libc::close(fd) };
    if ptr == libc::MAP_FAILED {
        return Err(ShmError::Mmap(io::Error::last_os_error()));
    }
    Ok(ptr.cast::<u8>())
}

/// POSIX name rules: leading `/`, no other `/`, at most 255 bytes.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(ShmError::InvalidName(format!(
            "segment name must start with '/': {name}"
        )));
    }
    if name[1..].contains('/') {
        return Err(ShmError::InvalidName(format!(
            "segment name cannot contain '/' after prefix: {name}"
        )));
    }
    if name.len() > 255 {
        return Err(ShmError::InvalidName(format!(
            "segment name too long (max 255): {name}"
        )));
    }
    Ok(())
}
