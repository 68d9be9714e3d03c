//! Vendor extension-unit protocol and the GPIO/LED facade built on it.
//!
//! Every exchange starts with a GET_LEN query against the fixed unit id and
//! selector: the negotiated payload size depends on the USB link (384 bytes
//! on USB3, 64 on USB2). The command is then written with SET_CUR and,
//! when a read-back is requested, fetched with GET_CUR at the same size
//! after a short settle delay.

use std::{io, thread, time::Duration};

use thiserror::Error;

use crate::capture::{Channel, VideoCapture};
use crate::v4l2;
use crate::v4l2::videodev::{uvc_xu_control_query, UVC_GET_CUR, UVC_GET_LEN, UVC_SET_CUR};
use crate::v4l2::vidioc;

pub(crate) const XU_UNIT_ID: u8 = 0x04;
pub(crate) const XU_SELECTOR: u8 = 0x02;

/// Absolute cap on vendor payloads. Larger requests are rejected before any
/// device access.
pub const XU_MAX_PAYLOAD: usize = 384;

const TASK_SET: u8 = 0x50;
const TASK_GET: u8 = 0x51;

const GPIO_SET_DIRECTION: u8 = 0x10;
const GPIO_SET_VALUE: u8 = 0x12;
const GPIO_GET_VALUE: u8 = 0x13;

/// Offset of the value byte in a GPIO read response frame.
const GPIO_VALUE_OFFSET: usize = 17;

/// GPIO line wired to the recording LED.
const LED_GPIO_LINE: u8 = 2;

const GPIO_DIR_OUTPUT: u8 = 0x00;
const GPIO_DIR_INPUT: u8 = 0x01;

/// Settle delays observed between the SET and an optional GET. Requests
/// marked safe give the firmware more time.
const SETTLE_SAFE: Duration = Duration::from_millis(2);
const SETTLE_FAST: Duration = Duration::from_micros(300);

/// Device-reported control-transfer failures, mapped from errno.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    #[error("extension unit or control not found")]
    NotFound,
    #[error("buffer size does not match control size")]
    SizeMismatch,
    #[error("invalid request code")]
    InvalidRequest,
    #[error("request not supported by control")]
    NotSupported,
    #[error("control transfer failed with os error {0}")]
    Other(i32),
}

impl TransferError {
    fn from_io(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ENOENT) => TransferError::NotFound,
            Some(libc::ENOBUFS) => TransferError::SizeMismatch,
            Some(libc::EINVAL) => TransferError::InvalidRequest,
            Some(libc::EBADRQC) => TransferError::NotSupported,
            Some(code) => TransferError::Other(code),
            None => TransferError::Other(0),
        }
    }
}

/// Vendor protocol failures.
#[derive(Debug, Error)]
pub enum XuError {
    #[error("vendor request exceeds the {XU_MAX_PAYLOAD} byte payload cap")]
    Oversized,

    #[error("device is not initialized")]
    Uninitialized,

    #[error("payload length query failed: {0}")]
    LengthQuery(io::Error),

    #[error("vendor write failed: {0}")]
    Set(TransferError),

    #[error("vendor read failed: {0}")]
    Get(TransferError),
}

/// Checks applied before a vendor request may touch the device.
fn precheck(payload_len: usize, initialized: bool) -> Result<(), XuError> {
    if payload_len > XU_MAX_PAYLOAD {
        return Err(XuError::Oversized);
    }
    if !initialized {
        return Err(XuError::Uninitialized);
    }
    Ok(())
}

/// One UVCIOC_CTRL_QUERY ioctl against the fixed unit/selector.
fn query(fd: std::os::raw::c_int, kind: u8, size: u16, data: *mut u8) -> io::Result<()> {
    let mut xu_query = uvc_xu_control_query {
        unit: XU_UNIT_ID,
        selector: XU_SELECTOR,
        query: kind,
        size,
        data,
    };
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::UVCIOC_CTRL_QUERY,
            &mut xu_query as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

/// Run a full length-negotiated vendor exchange.
///
/// The channel stays locked for the whole exchange; exchanges are short and
/// infrequent compared to capture traffic.
pub(crate) fn vendor_control(
    channel: &Channel,
    payload: &mut [u8],
    read_back: bool,
    safe: bool,
) -> Result<(), XuError> {
    let _guard = channel.lock();

    let mut len_bytes = [0u8; 2];
    query(channel.fd(), UVC_GET_LEN, 2, len_bytes.as_mut_ptr()).map_err(XuError::LengthQuery)?;
    let negotiated = usize::from(u16::from_le_bytes(len_bytes)).min(XU_MAX_PAYLOAD);

    // Stage the caller's command in a scratch frame covering the negotiated
    // size, so a 64-byte command can be sent on a 384-byte link and back.
    let mut frame = [0u8; XU_MAX_PAYLOAD];
    let staged = payload.len().min(negotiated);
    frame[..staged].copy_from_slice(&payload[..staged]);

    if let Err(e) = query(channel.fd(), UVC_SET_CUR, negotiated as u16, frame.as_mut_ptr()) {
        return Err(XuError::Set(TransferError::from_io(&e)));
    }

    thread::sleep(if safe { SETTLE_SAFE } else { SETTLE_FAST });

    if read_back {
        if let Err(e) = query(channel.fd(), UVC_GET_CUR, negotiated as u16, frame.as_mut_ptr()) {
            return Err(XuError::Get(TransferError::from_io(&e)));
        }
        payload[..staged].copy_from_slice(&frame[..staged]);
    }

    Ok(())
}

fn gpio_set_direction_frame(line: u8, direction: u8) -> [u8; 64] {
    let mut frame = [0u8; 64];
    frame[0] = TASK_SET;
    frame[1] = GPIO_SET_DIRECTION;
    frame[2] = line;
    frame[3] = direction;
    frame
}

fn gpio_set_value_frame(line: u8, value: u8) -> [u8; 64] {
    let mut frame = [0u8; 64];
    frame[0] = TASK_SET;
    frame[1] = GPIO_SET_VALUE;
    frame[2] = line;
    frame[3] = value;
    frame
}

fn gpio_get_value_frame(line: u8) -> [u8; XU_MAX_PAYLOAD] {
    let mut frame = [0u8; XU_MAX_PAYLOAD];
    frame[0] = TASK_GET;
    frame[1] = GPIO_GET_VALUE;
    frame[2] = line;
    frame
}

impl VideoCapture {
    fn xu_control(&self, payload: &mut [u8], read_back: bool, safe: bool) -> Result<(), XuError> {
        precheck(payload.len(), self.is_initialized())?;
        vendor_control(self.channel(), payload, read_back, safe)
    }

    fn gpio_set_direction(&self, line: u8, direction: u8) -> Result<(), XuError> {
        let mut frame = gpio_set_direction_frame(line, direction);
        self.xu_control(&mut frame, false, false)
    }

    fn gpio_set_value(&self, line: u8, value: u8) -> Result<(), XuError> {
        let mut frame = gpio_set_value_frame(line, value);
        self.xu_control(&mut frame, false, false)
    }

    fn gpio_get_value(&self, line: u8) -> Result<u8, XuError> {
        let mut frame = gpio_get_value_frame(line);
        self.xu_control(&mut frame, true, false)?;
        Ok(frame[GPIO_VALUE_OFFSET])
    }

    /// Switch the recording LED on or off.
    pub fn set_led(&self, on: bool) -> Result<(), XuError> {
        self.gpio_set_direction(LED_GPIO_LINE, GPIO_DIR_OUTPUT)?;
        self.gpio_set_value(LED_GPIO_LINE, on as u8)
    }

    /// Read the current LED state.
    pub fn led(&self) -> Result<bool, XuError> {
        self.gpio_set_direction(LED_GPIO_LINE, GPIO_DIR_INPUT)?;
        Ok(self.gpio_get_value(LED_GPIO_LINE)? != 0)
    }

    /// Invert the LED and return the new state. The write is only issued
    /// when the read succeeded.
    pub fn toggle_led(&self) -> Result<bool, XuError> {
        let lit = self.led()?;
        let next = !lit;
        self.set_led(next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frames_use_fixed_offsets() {
        let dir = gpio_set_direction_frame(2, GPIO_DIR_INPUT);
        assert_eq!(&dir[..4], &[TASK_SET, 0x10, 2, 0x01]);
        assert!(dir[4..].iter().all(|&b| b == 0));

        let set = gpio_set_value_frame(4, 1);
        assert_eq!(&set[..4], &[TASK_SET, 0x12, 4, 1]);

        let get = gpio_get_value_frame(2);
        assert_eq!(&get[..3], &[TASK_GET, 0x13, 2]);
        assert_eq!(get.len(), XU_MAX_PAYLOAD);
    }

    #[test]
    fn oversized_requests_are_rejected_before_device_access() {
        assert!(matches!(
            precheck(XU_MAX_PAYLOAD + 1, true),
            Err(XuError::Oversized)
        ));
        // the size check fires even when the device state check would too
        assert!(matches!(
            precheck(XU_MAX_PAYLOAD + 1, false),
            Err(XuError::Oversized)
        ));
        assert!(matches!(precheck(64, false), Err(XuError::Uninitialized)));
        assert!(precheck(XU_MAX_PAYLOAD, true).is_ok());
    }

    #[test]
    fn errno_maps_onto_the_fixed_taxonomy() {
        let cases = [
            (libc::ENOENT, TransferError::NotFound),
            (libc::ENOBUFS, TransferError::SizeMismatch),
            (libc::EINVAL, TransferError::InvalidRequest),
            (libc::EBADRQC, TransferError::NotSupported),
        ];
        for (errno, expected) in cases {
            let e = io::Error::from_raw_os_error(errno);
            assert_eq!(TransferError::from_io(&e), expected);
        }

        let e = io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(TransferError::from_io(&e), TransferError::Other(libc::EIO));
    }
}
