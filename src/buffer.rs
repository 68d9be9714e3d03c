//! Kernel-shared capture buffer pool.
//!
//! The pool requests a small number of mmap buffers once at open time and
//! owns their mappings until teardown. It is never resized: buffer indices
//! handed out by the kernel stay valid for the lifetime of the pool.

use std::os::unix::io::RawFd;
use std::{io, mem, ptr, slice};

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::v4l2;
use crate::v4l2::videodev::*;
use crate::v4l2::vidioc;

/// One buffer of kernel capture memory mapped into the process.
struct MappedBuffer {
    ptr: *mut u8,
    len: usize,
}

/// A filled buffer as reported by the kernel on dequeue.
#[derive(Clone, Copy)]
pub(crate) struct Dequeued {
    pub index: u32,
    pub bytesused: u32,
    pub length: u32,
    pub timestamp: libc::timeval,
}

/// Fixed arena of mapped capture buffers.
///
/// Queue/dequeue are raw single ioctls; callers serialize them against all
/// other traffic on the shared descriptor.
pub(crate) struct BufferPool {
    fd: RawFd,
    bufs: Vec<MappedBuffer>,
}

// The mappings are exclusively owned by the pool and their contents are
// only read between a dequeue and the matching requeue, which the capture
// engine serializes under its channel lock.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Request `count` buffers from the kernel and map each of them.
    ///
    /// On any failure every buffer mapped so far is unmapped before the
    /// error is returned.
    pub fn new(fd: RawFd, count: u32) -> Result<Self> {
        let mut reqbufs: v4l2_requestbuffers = unsafe { mem::zeroed() };
        reqbufs.count = count;
        reqbufs.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        reqbufs.memory = V4L2_MEMORY_MMAP;
        unsafe {
            v4l2::xioctl(
                fd,
                vidioc::VIDIOC_REQBUFS,
                &mut reqbufs as *mut _ as *mut std::os::raw::c_void,
            )
        }
        .map_err(Error::RequestBuffers)?;

        // the kernel is free to grant fewer (or more) buffers than asked
        let granted = reqbufs.count;
        let mut bufs: Vec<MappedBuffer> = Vec::with_capacity(granted as usize);

        for index in 0..granted {
            let mut v4l2_buf: v4l2_buffer = unsafe { mem::zeroed() };
            v4l2_buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
            v4l2_buf.memory = V4L2_MEMORY_MMAP;
            v4l2_buf.index = index;

            if let Err(e) = unsafe {
                v4l2::xioctl(
                    fd,
                    vidioc::VIDIOC_QUERYBUF,
                    &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
                )
            } {
                Self::unmap_all(&mut bufs);
                return Err(Error::QueryBuffer { index, source: e });
            }

            let len = v4l2_buf.length as usize;
            let offset = unsafe { v4l2_buf.m.offset };
            match unsafe {
                v4l2::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    offset as libc::off_t,
                )
            } {
                Ok(ptr) => bufs.push(MappedBuffer {
                    ptr: ptr as *mut u8,
                    len,
                }),
                Err(e) => {
                    Self::unmap_all(&mut bufs);
                    return Err(Error::MapBuffer { index, source: e });
                }
            }
        }

        debug!(granted, "capture buffers mapped");
        Ok(BufferPool { fd, bufs })
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    /// Hand a buffer back to the kernel capture queue.
    pub fn queue(&self, index: u32) -> io::Result<()> {
        let mut v4l2_buf: v4l2_buffer = unsafe { mem::zeroed() };
        v4l2_buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        v4l2_buf.memory = V4L2_MEMORY_MMAP;
        v4l2_buf.index = index;
        unsafe {
            v4l2::ioctl(
                self.fd,
                vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    /// Take one filled buffer off the kernel capture queue.
    ///
    /// With the descriptor in non-blocking mode this fails with EAGAIN when
    /// no frame is pending; the capture loop treats that as a backoff.
    pub fn dequeue(&self) -> io::Result<Dequeued> {
        let mut v4l2_buf: v4l2_buffer = unsafe { mem::zeroed() };
        v4l2_buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        v4l2_buf.memory = V4L2_MEMORY_MMAP;
        unsafe {
            v4l2::ioctl(
                self.fd,
                vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok(Dequeued {
            index: v4l2_buf.index,
            bytesused: v4l2_buf.bytesused,
            length: v4l2_buf.length,
            timestamp: v4l2_buf.timestamp,
        })
    }

    /// Borrow the mapped bytes of buffer `index`.
    ///
    /// Only meaningful between a dequeue reporting `index` and the matching
    /// requeue.
    pub fn data(&self, index: usize) -> &[u8] {
        let buf = &self.bufs[index];
        unsafe { slice::from_raw_parts(buf.ptr, buf.len) }
    }

    fn unmap_all(bufs: &mut Vec<MappedBuffer>) {
        for buf in bufs.drain(..) {
            if let Err(e) = unsafe { v4l2::munmap(buf.ptr as *mut std::os::raw::c_void, buf.len) }
            {
                error!(error = %e, "cannot unmap capture buffer");
            }
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        Self::unmap_all(&mut self.bufs);

        // free the kernel-side allocation by requesting 0 buffers
        let mut reqbufs: v4l2_requestbuffers = unsafe { mem::zeroed() };
        reqbufs.count = 0;
        reqbufs.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        reqbufs.memory = V4L2_MEMORY_MMAP;
        if let Err(e) = unsafe {
            v4l2::xioctl(
                self.fd,
                vidioc::VIDIOC_REQBUFS,
                &mut reqbufs as *mut _ as *mut std::os::raw::c_void,
            )
        } {
            debug!(error = %e, "cannot release capture buffers");
        }
    }
}
