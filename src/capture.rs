//! Device open, grab thread and frame delivery.
//!
//! One background thread per open device continuously dequeues filled
//! kernel buffers and copies them into a single double-buffered output
//! slot. Callers poll the slot; a frame that is never collected is simply
//! overwritten by the next one. Two locks coordinate everything: the frame
//! lock guarding the output slot and the channel lock serializing every
//! ioctl issued against the shared descriptor.

use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{io, mem};

use tracing::{debug, error, info, trace, warn};

use crate::buffer::BufferPool;
use crate::capability::{Capabilities, Flags};
use crate::error::{Error, Result};
use crate::format::{negotiate_fps, CaptureFormat, Resolution};
use crate::model::{self, CameraModel};
use crate::pselect;
use crate::v4l2;
use crate::v4l2::videodev::*;
use crate::v4l2::vidioc;

/// Highest device index probed when scanning for a camera.
const DEVICE_SCAN_MAX: usize = 64;

/// Capture buffers requested from the kernel.
const BUFFER_COUNT: u32 = 4;

/// Ceiling on the per-iteration readiness wait; also bounds shutdown
/// latency, since the stop flag is checked once per iteration.
const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Backoff after an empty or invalid dequeue.
const DEQUEUE_BACKOFF: Duration = Duration::from_micros(200);

/// Poll interval of [`VideoCapture::last_frame`].
const FRAME_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Requested capture configuration.
#[derive(Debug, Clone, Copy)]
pub struct CaptureParams {
    pub resolution: Resolution,
    pub fps: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        CaptureParams {
            resolution: Resolution::Hd2k,
            fps: 15,
        }
    }
}

/// The output frame slot shared between the grab thread and callers.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Kernel capture time relative to the acquisition-start epoch
    /// recorded at open, in nanoseconds.
    pub timestamp_ns: u64,
    /// Increments once per captured frame.
    pub frame_id: u64,
    data: Vec<u8>,
}

impl Frame {
    fn new(format: CaptureFormat) -> Self {
        Frame {
            width: format.width,
            height: format.height,
            channels: format.channels,
            timestamp_ns: 0,
            frame_id: 0,
            // sized once; the slot is reused for every capture
            data: vec![0; format.frame_size()],
        }
    }

    /// Interleaved side-by-side pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Read access to the output slot, holding the frame lock while alive.
pub struct FrameGuard<'a> {
    guard: MutexGuard<'a, Frame>,
}

impl Deref for FrameGuard<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.guard
    }
}

/// Serialization point for every transaction on the shared descriptor.
pub(crate) struct Channel {
    fd: RawFd,
    lock: Mutex<()>,
}

impl Channel {
    fn new(fd: RawFd) -> Self {
        Channel {
            fd,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the descriptor; closed when the shared state is released.
struct Handle {
    fd: RawFd,
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = v4l2::close(self.fd) {
            error!(error = %e, "cannot close device");
        }
    }
}

/// State shared with the grab thread.
///
/// Field order matters for teardown: the buffer pool must release its
/// mappings while the descriptor in `handle` is still open.
struct Shared {
    channel: Channel,
    pool: BufferPool,
    frame: Mutex<Frame>,
    new_frame: AtomicBool,
    stop: AtomicBool,
    initialized: AtomicBool,
    /// CLOCK_MONOTONIC at acquisition start, microseconds.
    epoch_us: u64,
    handle: Handle,
}

/// An open stereo camera.
///
/// Dropping the handle (or calling [`VideoCapture::close`]) switches the
/// LED off, stops the grab thread, disables streaming, unmaps every
/// capture buffer and closes the descriptor, in that order.
pub struct VideoCapture {
    shared: Arc<Shared>,
    grab_thread: Option<JoinHandle<()>>,
    model: CameraModel,
    path: PathBuf,
    format: CaptureFormat,
    shut_down: bool,
}

impl VideoCapture {
    /// Open the first node that identifies as a supported camera.
    ///
    /// Nodes are probed in index order; nodes that are not ours are
    /// skipped silently, other failures are logged and skipped.
    pub fn open(params: CaptureParams) -> Result<VideoCapture> {
        for index in 0..DEVICE_SCAN_MAX {
            match VideoCapture::open_index(params, index) {
                Ok(cap) => return Ok(cap),
                Err(Error::NotOurDevice) => continue,
                Err(e) => {
                    debug!(index, error = %e, "skipping device");
                    continue;
                }
            }
        }

        Err(Error::NoDevice)
    }

    /// Open `/dev/video<index>`.
    pub fn open_index(params: CaptureParams, index: usize) -> Result<VideoCapture> {
        let model = model::identify_supported(index)?;

        let path = PathBuf::from(format!("/dev/video{}", index));
        debug!(path = %path.display(), "opening device");

        let st = v4l2::stat(&path).map_err(|e| Error::Identify {
            path: path.clone(),
            source: e,
        })?;
        if st.st_mode & libc::S_IFMT != libc::S_IFCHR {
            return Err(Error::NotCharDevice { path });
        }

        let fps = negotiate_fps(params.resolution, params.fps);
        let width = params.resolution.capture_width();
        let height = params.resolution.capture_height();

        // reads are non blocking
        let fd = v4l2::open(&path, libc::O_RDWR | libc::O_NONBLOCK).map_err(|e| Error::Open {
            path: path.clone(),
            source: e,
        })?;
        // closes the descriptor on any failure below
        let handle = Handle { fd };

        let caps = query_caps(fd).map_err(|e| Error::QueryCaps {
            path: path.clone(),
            source: e,
        })?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE | Flags::STREAMING) {
            return Err(Error::NotACaptureDevice { path });
        }
        debug!(driver = %caps.driver, card = %caps.card, "device capabilities");

        let granted = set_format(fd, width, height).map_err(|e| Error::SetFormat {
            path: path.clone(),
            source: e,
        })?;
        // a partial or best-effort format is never accepted
        if granted.width != width || granted.height != height {
            return Err(Error::FormatMismatch {
                requested_width: width,
                requested_height: height,
                granted_width: granted.width,
                granted_height: granted.height,
            });
        }
        let format = CaptureFormat {
            width: granted.width,
            height: granted.height,
            channels: granted.bytesperline / granted.width,
            fps,
        };

        if let Err(e) = set_framerate(fd, fps) {
            error!(error = %e, "cannot set the camera framerate");
        }

        let pool = BufferPool::new(fd, BUFFER_COUNT)?;

        // acquisition-start epoch for frame timestamps
        let epoch_us = monotonic_us();

        for buf in 0..pool.len() as u32 {
            pool.queue(buf).map_err(|e| Error::QueueBuffer {
                index: buf,
                source: e,
            })?;
        }

        // recording hint for the pipeline; refusal is not fatal
        let mut priority = V4L2_PRIORITY_RECORD;
        if let Err(e) = unsafe {
            v4l2::xioctl(
                fd,
                vidioc::VIDIOC_S_PRIORITY,
                &mut priority as *mut _ as *mut std::os::raw::c_void,
            )
        } {
            warn!(error = %e, "cannot raise stream priority");
        }

        stream_on(fd).map_err(Error::StreamOn)?;

        let shared = Arc::new(Shared {
            channel: Channel::new(fd),
            pool,
            frame: Mutex::new(Frame::new(format)),
            new_frame: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            epoch_us,
            handle,
        });

        let grab_shared = Arc::clone(&shared);
        let grab_thread = thread::Builder::new()
            .name("stereocam-grab".into())
            .spawn(move || grab_loop(grab_shared))?;

        let cap = VideoCapture {
            shared,
            grab_thread: Some(grab_thread),
            model,
            path,
            format,
            shut_down: false,
        };
        cap.shared.initialized.store(true, Ordering::Release);

        info!(
            path = %cap.path.display(),
            %format,
            model = ?cap.model,
            version = VideoCapture::version(),
            "device opened"
        );

        // recording indication; failure does not invalidate the open
        if let Err(e) = cap.set_led(true) {
            debug!(error = %e, "cannot switch on the LED");
        }

        Ok(cap)
    }

    /// Model of the open camera.
    pub fn model(&self) -> CameraModel {
        self.model
    }

    /// Path of the open device node.
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    /// Format granted at open time.
    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Driver version.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.shared.channel
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// Wait for a fresh frame, polling the new-data flag at a fixed
    /// interval, and return `None` when `timeout` elapses first.
    ///
    /// The guard borrows the single output slot and holds the frame lock
    /// while alive. Collection is at-most-once: the flag is cleared on
    /// return, and an uncollected frame is overwritten by the next capture.
    pub fn last_frame(&self, timeout: Duration) -> Option<FrameGuard<'_>> {
        let mut polls_left = (timeout.as_micros() / FRAME_POLL_INTERVAL.as_micros()).max(1);
        while !self.shared.new_frame.load(Ordering::Acquire) {
            if polls_left == 0 {
                return None;
            }
            polls_left -= 1;
            thread::sleep(FRAME_POLL_INTERVAL);
        }

        let guard = self
            .shared
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.new_frame.store(false, Ordering::Release);
        Some(FrameGuard { guard })
    }

    /// Stop capture and release the device.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        // switch the recording indication off while the channel is still up
        if let Err(e) = self.set_led(false) {
            debug!(error = %e, "cannot switch off the LED");
        }

        self.shared.initialized.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
        if let Some(thread) = self.grab_thread.take() {
            if thread.join().is_err() {
                error!("grab thread panicked");
            }
        }

        {
            let _guard = self.shared.channel.lock();
            if let Err(e) = stream_off(self.shared.channel.fd()) {
                debug!(error = %e, "cannot stop streaming");
            }
        }

        debug!(path = %self.path.display(), "device closed");
        // buffer mappings and the descriptor are released when the last
        // reference to the shared state drops, after the joined thread
    }
}

impl Drop for VideoCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn query_caps(fd: RawFd) -> io::Result<Capabilities> {
    unsafe {
        let mut v4l2_caps: v4l2_capability = mem::zeroed();
        v4l2::xioctl(
            fd,
            vidioc::VIDIOC_QUERYCAP,
            &mut v4l2_caps as *mut _ as *mut std::os::raw::c_void,
        )?;
        Ok(Capabilities::from(v4l2_caps))
    }
}

fn set_format(fd: RawFd, width: u32, height: u32) -> io::Result<v4l2_pix_format> {
    unsafe {
        let mut v4l2_fmt: v4l2_format = mem::zeroed();
        v4l2_fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        v4l2_fmt.fmt.pix.pixelformat = V4L2_PIX_FMT_YUYV;
        v4l2_fmt.fmt.pix.field = V4L2_FIELD_ANY;
        v4l2_fmt.fmt.pix.width = width;
        v4l2_fmt.fmt.pix.height = height;
        v4l2::xioctl(
            fd,
            vidioc::VIDIOC_S_FMT,
            &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
        )?;
        Ok(v4l2_fmt.fmt.pix)
    }
}

fn set_framerate(fd: RawFd, fps: u32) -> io::Result<()> {
    unsafe {
        let mut v4l2_parm: v4l2_streamparm = mem::zeroed();
        v4l2_parm.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        v4l2_parm.parm.capture.capturemode = V4L2_CAP_TIMEPERFRAME;
        v4l2_parm.parm.capture.timeperframe = v4l2_fract {
            numerator: 1,
            denominator: fps,
        };
        v4l2::xioctl(
            fd,
            vidioc::VIDIOC_S_PARM,
            &mut v4l2_parm as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

fn stream_on(fd: RawFd) -> io::Result<()> {
    let mut typ = V4L2_BUF_TYPE_VIDEO_CAPTURE as std::os::raw::c_int;
    unsafe {
        v4l2::xioctl(
            fd,
            vidioc::VIDIOC_STREAMON,
            &mut typ as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

fn stream_off(fd: RawFd) -> io::Result<()> {
    let mut typ = V4L2_BUF_TYPE_VIDEO_CAPTURE as std::os::raw::c_int;
    unsafe {
        v4l2::xioctl(
            fd,
            vidioc::VIDIOC_STREAMOFF,
            &mut typ as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

fn monotonic_us() -> u64 {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
    }
    (now.tv_sec as u64) * 1_000_000 + (now.tv_nsec as u64) / 1000
}

/// Kernel capture time relative to the acquisition-start epoch, in
/// nanoseconds. Saturates instead of wrapping for timestamps that predate
/// the epoch.
fn frame_timestamp_ns(tv: libc::timeval, epoch_us: u64) -> u64 {
    let us = (tv.tv_sec as u64)
        .saturating_mul(1_000_000)
        .saturating_add(tv.tv_usec as u64);
    us.saturating_sub(epoch_us).saturating_mul(1000)
}

/// Body of the grab thread.
///
/// Nothing in here terminates the loop except the stop flag: empty and
/// invalid dequeues back off briefly and retry.
fn grab_loop(shared: Arc<Shared>) {
    let fd = shared.channel.fd();

    while !shared.stop.load(Ordering::Acquire) {
        match pselect::wait_readable(fd, READINESS_TIMEOUT) {
            Ok(true) => {}
            // timed out; re-check the stop flag
            Ok(false) => continue,
            Err(e) => {
                debug!(error = %e, "readiness wait failed");
                thread::sleep(DEQUEUE_BACKOFF);
                continue;
            }
        }

        let dequeued = {
            let _guard = shared.channel.lock();
            shared.pool.dequeue()
        };
        let buf = match dequeued {
            Ok(buf) => buf,
            Err(e) => {
                // no filled buffer yet (EAGAIN and friends)
                trace!(error = %e, "dequeue failed");
                thread::sleep(DEQUEUE_BACKOFF);
                continue;
            }
        };

        let index = buf.index as usize;
        if buf.bytesused == buf.length && index < shared.pool.len() {
            let src = shared.pool.data(index);
            let timestamp_ns = frame_timestamp_ns(buf.timestamp, shared.epoch_us);

            {
                let mut frame = shared
                    .frame
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if frame.data.len() == src.len() {
                    frame.frame_id += 1;
                    frame.timestamp_ns = timestamp_ns;
                    frame.data.copy_from_slice(src);
                    shared.new_frame.store(true, Ordering::Release);
                } else {
                    warn!(buffer = index, "buffer length does not match the frame slot");
                }
            }

            let _guard = shared.channel.lock();
            if let Err(e) = shared.pool.queue(buf.index) {
                warn!(buffer = index, error = %e, "cannot requeue buffer");
            }
        } else {
            // short or out-of-range dequeue: hand the buffer back and retry
            if index < shared.pool.len() {
                let _guard = shared.channel.lock();
                if let Err(e) = shared.pool.queue(buf.index) {
                    warn!(buffer = index, error = %e, "cannot requeue buffer");
                }
            }
            thread::sleep(DEQUEUE_BACKOFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_storage_matches_format() {
        let format = CaptureFormat {
            width: 4416,
            height: 1242,
            channels: 2,
            fps: 15,
        };
        let frame = Frame::new(format);
        assert_eq!(frame.data().len(), 4416 * 1242 * 2);
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.timestamp_ns, 0);
    }

    #[test]
    fn timestamps_are_epoch_relative_nanoseconds() {
        let tv = libc::timeval {
            tv_sec: 10,
            tv_usec: 500,
        };
        // epoch 2 seconds after boot
        assert_eq!(frame_timestamp_ns(tv, 2_000_000), 8_000_500_000);
    }

    #[test]
    fn timestamps_before_the_epoch_saturate_to_zero() {
        let tv = libc::timeval {
            tv_sec: 1,
            tv_usec: 0,
        };
        assert_eq!(frame_timestamp_ns(tv, 5_000_000), 0);
    }

    #[test]
    fn default_params_use_the_top_tier() {
        let params = CaptureParams::default();
        assert_eq!(params.resolution, Resolution::Hd2k);
        assert_eq!(params.fps, 15);
    }
}
