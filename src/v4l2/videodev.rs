//! Carried copies of the kernel UAPI structures used by this driver.
//!
//! The driver talks to a fixed device class, so instead of generating
//! bindings at build time we carry the handful of `videodev2.h` /
//! `uvcvideo.h` definitions it actually needs. Field order, padding and
//! alignment must match the kernel ABI exactly: the ioctl request codes in
//! [`super::vidioc`] encode `size_of` of these types.

#![allow(non_camel_case_types)]

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_PRIORITY_RECORD: u32 = 3;

/// Capture parameter flag: the driver honors `timeperframe`.
pub const V4L2_CAP_TIMEPERFRAME: u32 = 0x1000;

pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// Packed 4:2:2 YUV, two bytes per pixel.
pub const V4L2_PIX_FMT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    // The kernel union contains pointer-bearing members (v4l2_window), so
    // it is 8-byte aligned on 64-bit targets even though we never use them.
    _align: [u64; 25],
}

#[repr(C)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub fd: i32,
}

#[repr(C)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_captureparm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_streamparm_parm {
    pub capture: v4l2_captureparm,
    pub raw_data: [u8; 200],
}

#[repr(C)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: v4l2_streamparm_parm,
}

#[repr(C)]
pub struct v4l2_queryctrl {
    pub id: u32,
    pub type_: u32,
    pub name: [u8; 32],
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
pub struct v4l2_control {
    pub id: u32,
    pub value: i32,
}

/// UVC extension-unit control query, `linux/uvcvideo.h`.
///
/// `data` points at a caller-owned buffer of at least `size` bytes which the
/// kernel reads (SET) or writes (GET) during the ioctl.
#[repr(C)]
pub struct uvc_xu_control_query {
    pub unit: u8,
    pub selector: u8,
    pub query: u8,
    pub size: u16,
    pub data: *mut u8,
}

/// UVC control-transfer request codes, `linux/usb/video.h`.
pub const UVC_SET_CUR: u8 = 0x01;
pub const UVC_GET_CUR: u8 = 0x81;
pub const UVC_GET_LEN: u8 = 0x85;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    // The ioctl request codes encode these sizes; a mismatch makes every
    // call fail with ENOTTY.
    #[test]
    fn abi_sizes() {
        assert_eq!(mem::size_of::<v4l2_capability>(), 104);
        assert_eq!(mem::size_of::<v4l2_format>(), 208);
        assert_eq!(mem::size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(mem::size_of::<v4l2_buffer>(), 88);
        assert_eq!(mem::size_of::<v4l2_streamparm>(), 204);
        assert_eq!(mem::size_of::<v4l2_queryctrl>(), 68);
        assert_eq!(mem::size_of::<v4l2_control>(), 8);
        assert_eq!(mem::size_of::<uvc_xu_control_query>(), 16);
    }

    #[test]
    fn yuyv_fourcc() {
        assert_eq!(V4L2_PIX_FMT_YUYV, 0x5659_5559);
    }
}
