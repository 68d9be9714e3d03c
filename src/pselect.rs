use std::os::unix::io::RawFd;
use std::{io, mem, ptr, time};

#[derive(Clone, Copy)]
struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> FdSet {
        unsafe {
            let mut raw_fd_set = mem::MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(raw_fd_set.as_mut_ptr());
            FdSet(raw_fd_set.assume_init())
        }
    }

    fn set(&mut self, fd: RawFd) {
        unsafe {
            libc::FD_SET(fd, &mut self.0);
        }
    }
}

fn make_timespec(duration: time::Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

/// Wait until `fd` becomes readable or `timeout` elapses.
///
/// Returns `Ok(true)` when the descriptor is readable and `Ok(false)` on
/// timeout.
pub fn wait_readable(fd: RawFd, timeout: time::Duration) -> io::Result<bool> {
    let mut readfds = FdSet::new();
    readfds.set(fd);
    let timeout = make_timespec(timeout);

    match unsafe {
        libc::pselect(
            fd + 1,
            &mut readfds.0,
            ptr::null_mut(),
            ptr::null_mut(),
            &timeout,
            ptr::null(),
        )
    } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}
