//! User-space capture driver for USB stereo cameras exposed as
//! Video4Linux nodes.
//!
//! The driver identifies the camera by its USB vendor/product signature,
//! negotiates a resolution/frame-rate pair, maps a small pool of kernel
//! capture buffers and harvests frames on a background thread into a
//! single double-buffered output slot. On top of the capture path it
//! speaks the camera's vendor extension-unit protocol, used for GPIO
//! access (the recording LED) and exposes the usual image controls
//! (brightness, contrast, white balance, ...).
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use stereocam::{CaptureParams, Resolution, VideoCapture};
//!
//! fn main() -> stereocam::Result<()> {
//!     let cam = VideoCapture::open(CaptureParams {
//!         resolution: Resolution::Hd720,
//!         fps: 30,
//!     })?;
//!
//!     if let Some(frame) = cam.last_frame(Duration::from_millis(500)) {
//!         println!("frame {} ({} bytes)", frame.frame_id, frame.data().len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod v4l2;

mod capability;
pub use capability::Capabilities;

mod error;
pub use error::{Error, Result};

mod model;
pub use model::CameraModel;

mod format;
pub use format::{negotiate_fps, CaptureFormat, Resolution};

pub mod control;

mod buffer;
mod pselect;

mod xu;
pub use xu::{TransferError, XuError, XU_MAX_PAYLOAD};

mod capture;
pub use capture::{CaptureParams, Frame, FrameGuard, VideoCapture};
