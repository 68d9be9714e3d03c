//! Generic image control settings.
//!
//! Thin wrappers around one primitive: query the control descriptor, clamp,
//! write. Descriptors are never cached; every accessor round-trips to the
//! device. Out-of-range writes and failed queries degrade to no-ops, so
//! these calls never fail loudly.

use std::mem;

use tracing::debug;

use crate::capture::VideoCapture;
use crate::v4l2;
use crate::v4l2::videodev::{v4l2_control, v4l2_queryctrl};
use crate::v4l2::vidioc;

const CID_BASE: u32 = 0x0098_0900;

pub const BRIGHTNESS: u32 = CID_BASE;
pub const CONTRAST: u32 = CID_BASE + 1;
pub const SATURATION: u32 = CID_BASE + 2;
pub const HUE: u32 = CID_BASE + 3;
pub const AUTO_WHITE_BALANCE: u32 = CID_BASE + 12;
pub const GAMMA: u32 = CID_BASE + 16;
pub const GAIN: u32 = CID_BASE + 19;
pub const WHITE_BALANCE_TEMPERATURE: u32 = CID_BASE + 26;
pub const SHARPNESS: u32 = CID_BASE + 27;

// The sensor applies gamma in a far narrower band than the control reports.
const GAMMA_MIN: i32 = 1;
const GAMMA_MAX: i32 = 9;

// Acceptance band applied when the descriptor query fails.
const FALLBACK_MIN: i32 = 0;
const FALLBACK_MAX: i32 = 6500;

/// Control descriptor as reported by the device.
#[derive(Debug, Clone, Copy)]
pub struct Description {
    pub id: u32,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default: i32,
}

impl From<&v4l2_queryctrl> for Description {
    fn from(ctrl: &v4l2_queryctrl) -> Self {
        Description {
            id: ctrl.id,
            minimum: ctrl.minimum,
            maximum: ctrl.maximum,
            step: ctrl.step,
            default: ctrl.default_value,
        }
    }
}

/// Acceptance band for a write to `id`.
fn effective_bounds(id: u32, desc: Option<&Description>) -> (i32, i32) {
    match desc {
        Some(_) if id == GAMMA => (GAMMA_MIN, GAMMA_MAX),
        Some(d) => (d.minimum, d.maximum),
        None => (FALLBACK_MIN, FALLBACK_MAX),
    }
}

macro_rules! control_accessors {
    ($get:ident, $set:ident, $reset:ident, $id:expr, $what:literal) => {
        #[doc = concat!("Current ", $what, " value.")]
        pub fn $get(&self) -> Option<i32> {
            self.control($id)
        }

        #[doc = concat!("Set the ", $what, ". Out-of-range values are ignored.")]
        pub fn $set(&self, value: i32) {
            self.set_control($id, value);
        }

        #[doc = concat!("Restore the ", $what, " to its device default.")]
        pub fn $reset(&self) {
            self.reset_control($id);
        }
    };
}

impl VideoCapture {
    /// Query a control descriptor from the device.
    pub fn query_control(&self, id: u32) -> Option<Description> {
        let _guard = self.channel().lock();

        let mut v4l2_ctrl: v4l2_queryctrl = unsafe { mem::zeroed() };
        v4l2_ctrl.id = id;
        unsafe {
            v4l2::ioctl(
                self.channel().fd(),
                vidioc::VIDIOC_QUERYCTRL,
                &mut v4l2_ctrl as *mut _ as *mut std::os::raw::c_void,
            )
        }
        .ok()?;

        Some(Description::from(&v4l2_ctrl))
    }

    /// Current value of a control, or `None` when the control does not
    /// exist or the read fails.
    pub fn control(&self, id: u32) -> Option<i32> {
        self.query_control(id)?;

        let _guard = self.channel().lock();
        let mut v4l2_ctrl = v4l2_control { id, value: 0 };
        unsafe {
            v4l2::ioctl(
                self.channel().fd(),
                vidioc::VIDIOC_G_CTRL,
                &mut v4l2_ctrl as *mut _ as *mut std::os::raw::c_void,
            )
        }
        .ok()?;

        Some(v4l2_ctrl.value)
    }

    /// Write a control value. Values outside the control's acceptance band
    /// are silently ignored, leaving the device state unchanged.
    pub fn set_control(&self, id: u32, value: i32) {
        let desc = self.query_control(id);
        let (min, max) = effective_bounds(id, desc.as_ref());
        if value < min || value > max {
            debug!(id, value, min, max, "control value out of range, ignored");
            return;
        }

        self.write_control(id, value);
    }

    /// Restore a control to the default reported by its descriptor.
    pub fn reset_control(&self, id: u32) {
        let Some(desc) = self.query_control(id) else {
            return;
        };
        self.write_control(id, desc.default);
    }

    fn write_control(&self, id: u32, value: i32) {
        let _guard = self.channel().lock();
        let mut v4l2_ctrl = v4l2_control { id, value };
        if let Err(e) = unsafe {
            v4l2::ioctl(
                self.channel().fd(),
                vidioc::VIDIOC_S_CTRL,
                &mut v4l2_ctrl as *mut _ as *mut std::os::raw::c_void,
            )
        } {
            debug!(id, value, error = %e, "cannot write control");
        }
    }

    control_accessors!(brightness, set_brightness, reset_brightness, BRIGHTNESS, "brightness");
    control_accessors!(contrast, set_contrast, reset_contrast, CONTRAST, "contrast");
    control_accessors!(saturation, set_saturation, reset_saturation, SATURATION, "saturation");
    control_accessors!(hue, set_hue, reset_hue, HUE, "hue");
    control_accessors!(sharpness, set_sharpness, reset_sharpness, SHARPNESS, "sharpness");
    control_accessors!(gamma, set_gamma, reset_gamma, GAMMA, "gamma");
    control_accessors!(gain, set_gain, reset_gain, GAIN, "gain");

    /// Current manual white balance temperature.
    pub fn white_balance(&self) -> Option<i32> {
        self.control(WHITE_BALANCE_TEMPERATURE)
    }

    /// Set a manual white balance temperature.
    ///
    /// Manual and automatic white balance are mutually exclusive on this
    /// device, so auto mode is switched off first when it is active.
    pub fn set_white_balance(&self, value: i32) {
        if self.auto_white_balance() {
            self.set_auto_white_balance(false);
        }
        self.set_control(WHITE_BALANCE_TEMPERATURE, value);
    }

    /// Reset white balance by re-enabling automatic mode.
    pub fn reset_white_balance(&self) {
        self.set_auto_white_balance(true);
    }

    /// Whether automatic white balance is active.
    pub fn auto_white_balance(&self) -> bool {
        self.control(AUTO_WHITE_BALANCE).unwrap_or(0) != 0
    }

    /// Switch automatic white balance on or off.
    pub fn set_auto_white_balance(&self, active: bool) {
        self.set_control(AUTO_WHITE_BALANCE, active as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: u32, minimum: i32, maximum: i32) -> Description {
        Description {
            id,
            minimum,
            maximum,
            step: 1,
            default: minimum,
        }
    }

    #[test]
    fn bounds_follow_the_descriptor() {
        let d = desc(BRIGHTNESS, 0, 8);
        assert_eq!(effective_bounds(BRIGHTNESS, Some(&d)), (0, 8));
    }

    #[test]
    fn gamma_band_overrides_the_descriptor() {
        let d = desc(GAMMA, 0, 1000);
        assert_eq!(effective_bounds(GAMMA, Some(&d)), (GAMMA_MIN, GAMMA_MAX));
    }

    #[test]
    fn failed_queries_fall_back_to_the_wide_band() {
        assert_eq!(effective_bounds(BRIGHTNESS, None), (FALLBACK_MIN, FALLBACK_MAX));
        // the gamma override only applies to a successfully queried control
        assert_eq!(effective_bounds(GAMMA, None), (FALLBACK_MIN, FALLBACK_MAX));
    }

    #[test]
    fn descriptor_mirrors_the_raw_struct() {
        let mut raw: v4l2_queryctrl = unsafe { mem::zeroed() };
        raw.id = CONTRAST;
        raw.minimum = -3;
        raw.maximum = 12;
        raw.step = 3;
        raw.default_value = 6;

        let d = Description::from(&raw);
        assert_eq!(d.id, CONTRAST);
        assert_eq!(d.minimum, -3);
        assert_eq!(d.maximum, 12);
        assert_eq!(d.step, 3);
        assert_eq!(d.default, 6);
    }
}
