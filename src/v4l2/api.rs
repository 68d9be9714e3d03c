use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::{io, path::Path};

use crate::v4l2::vidioc;

/// Number of times a transiently failing ioctl is retried.
const IOCTL_RETRY: u32 = 3;

/// A convenience wrapper around open(2).
///
/// Returns the file descriptor on success.
/// In case of errors, the last OS error will be reported, aka errno on Linux.
///
/// # Example
///
/// ```
/// use stereocam::v4l2;
///
/// let fd = v4l2::open("/dev/video0", libc::O_RDWR);
/// ```
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<std::os::raw::c_int> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), flags) };

    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// A convenience wrapper around close(2).
pub fn close(fd: std::os::raw::c_int) -> io::Result<()> {
    let ret = unsafe { libc::close(fd) };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around stat(2).
pub fn stat<P: AsRef<Path>>(path: P) -> io::Result<libc::stat> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    let ret = unsafe { libc::stat(c_path.as_ptr(), st.as_mut_ptr()) };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(unsafe { st.assume_init() })
    }
}

/// A convenience wrapper around ioctl(2).
///
/// # Safety
///
/// For maximum flexibility, argp must be a raw pointer. Thus, the entire
/// function is unsafe.
pub unsafe fn ioctl(
    fd: std::os::raw::c_int,
    request: vidioc::_IOC_TYPE,
    argp: *mut std::os::raw::c_void,
) -> io::Result<()> {
    /*
     * It turns out the libc crate (and libc itself!) defines ioctl() with
     * different, incompatible argument types on different platforms. To
     * hack around this without conditional compilation, use syscall()
     * instead as a drop-in replacement. Details:
     * https://github.com/rust-lang/libc/issues/1036
     */
    let ret = libc::syscall(libc::SYS_ioctl, fd, request, argp) as std::os::raw::c_int;

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Like [`ioctl`], but retries a bounded number of times when the call is
/// interrupted or the device reports a transient condition (EINTR, EAGAIN,
/// ETIMEDOUT).
///
/// # Safety
///
/// Same contract as [`ioctl`].
pub unsafe fn xioctl(
    fd: std::os::raw::c_int,
    request: vidioc::_IOC_TYPE,
    argp: *mut std::os::raw::c_void,
) -> io::Result<()> {
    let mut tries = IOCTL_RETRY;
    loop {
        match ioctl(fd, request, argp) {
            Err(e)
                if tries > 0
                    && matches!(
                        e.raw_os_error(),
                        Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::ETIMEDOUT)
                    ) =>
            {
                tries -= 1;
            }
            other => return other,
        }
    }
}

/// A convenience wrapper around mmap(2).
///
/// # Safety
///
/// Start must be a raw pointer. Thus, the entire function is unsafe.
pub unsafe fn mmap(
    start: *mut std::os::raw::c_void,
    length: usize,
    prot: std::os::raw::c_int,
    flags: std::os::raw::c_int,
    fd: std::os::raw::c_int,
    offset: libc::off_t,
) -> io::Result<*mut std::os::raw::c_void> {
    let ret = libc::mmap(start, length, prot, flags, fd, offset);

    if ret == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// A convenience wrapper around munmap(2).
///
/// # Safety
///
/// Start must be a raw pointer. Thus, the entire function is unsafe.
pub unsafe fn munmap(start: *mut std::os::raw::c_void, length: usize) -> io::Result<()> {
    let ret = libc::munmap(start, length);

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
