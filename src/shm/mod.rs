//! POSIX shared memory regions
//!
//! The sample buffer lives in a named shared memory object so that an
//! external monitoring process can map it read-only and observe samples
//! without any copy. Anonymous regions back embedded and test usage.

use std::ffi::CString;
use std::io;
use std::ptr::{self, NonNull};

use thiserror::Error;

pub mod reader;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shared memory name {0:?} is not a valid C string")]
    InvalidName(String),
    #[error("Cannot map an empty region")]
    EmptyRegion,
    #[error("Could not open shared memory object {0:?}")]
    Open(String, #[source] io::Error),
    #[error("Could not size shared memory object to {0} bytes")]
    Truncate(usize, #[source] io::Error),
    #[error("Could not stat shared memory object {0:?}")]
    Stat(String, #[source] io::Error),
    #[error("Could not map {0} bytes of shared memory")]
    Map(usize, #[source] io::Error),
}

/// A fixed-size memory region shared between processes
///
/// The creating side owns the backing object and unlinks it on drop. The
/// region itself carries no synchronization: access discipline (single
/// writer, readers tolerating staleness) is the caller's contract.
pub struct ShmRegion {
    ptr: NonNull<libc::c_void>,
    len: usize,
    read_only: bool,
    /// Name of the backing object, kept by the creating side for unlinking
    owned_name: Option<CString>,
}

unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates (or reuses) a named shared memory object of `len` bytes and
    /// maps it read-write
    ///
    /// The region is zeroed before being returned. The name must start with
    /// a `/`, per `shm_open(3)`.
    pub fn create(name: &str, len: usize) -> Result<Self, Error> {
        let c_name = Self::c_name(name)?;
        if len == 0 {
            return Err(Error::EmptyRegion);
        }

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o644) };
        if fd < 0 {
            return Err(Error::Open(name.to_string(), io::Error::last_os_error()));
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let os_error = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(Error::Truncate(len, os_error));
        }

        let mapped = Self::map_fd(fd, len, libc::PROT_READ | libc::PROT_WRITE);
        unsafe { libc::close(fd) };

        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        // A reused object may hold samples from a previous run
        unsafe { ptr::write_bytes(ptr.as_ptr() as *mut u8, 0, len) };

        Ok(ShmRegion {
            ptr,
            len,
            read_only: false,
            owned_name: Some(c_name),
        })
    }

    /// Maps an existing named shared memory object read-only
    ///
    /// The length of the region is taken from the size of the object.
    pub fn open(name: &str) -> Result<Self, Error> {
        let c_name = Self::c_name(name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return Err(Error::Open(name.to_string(), io::Error::last_os_error()));
        }

        let mut stat = unsafe { std::mem::zeroed::<libc::stat>() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let os_error = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Stat(name.to_string(), os_error));
        }

        let len = stat.st_size as usize;
        if len == 0 {
            unsafe { libc::close(fd) };
            return Err(Error::EmptyRegion);
        }

        let mapped = Self::map_fd(fd, len, libc::PROT_READ);
        unsafe { libc::close(fd) };

        Ok(ShmRegion {
            ptr: mapped?,
            len,
            read_only: true,
            owned_name: None,
        })
    }

    /// Maps an anonymous shared region, visible only to this process and its
    /// forked children
    pub fn anonymous(len: usize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::EmptyRegion);
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(Error::Map(len, io::Error::last_os_error()));
        }

        Ok(ShmRegion {
            ptr: NonNull::new(addr).expect("mmap returned a null non-MAP_FAILED address"),
            len,
            read_only: false,
            owned_name: None,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }

    fn map_fd(fd: libc::c_int, len: usize, prot: libc::c_int) -> Result<NonNull<libc::c_void>, Error> {
        let addr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };

        if addr == libc::MAP_FAILED {
            return Err(Error::Map(len, io::Error::last_os_error()));
        }

        NonNull::new(addr).ok_or_else(|| Error::Map(len, io::Error::last_os_error()))
    }

    fn c_name(name: &str) -> Result<CString, Error> {
        CString::new(name).map_err(|_| Error::InvalidName(name.to_string()))
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr(), self.len);

            if let Some(name) = &self.owned_name {
                libc::shm_unlink(name.as_ptr());
            }
        }
    }
}
