//! Camera model identification.
//!
//! A video node is ours when its sysfs modalias carries our USB vendor id
//! and one of the known product ids. Identification never opens the
//! character device itself, so probing foreign nodes is side-effect free.

use std::fs;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// USB vendor id shared by every camera generation.
pub const USB_VENDOR_ID: u16 = 0x2b03;

const USB_PROD_LEGACY_STEREO: u16 = 0xf580;
const USB_PROD_LEGACY_MINI: u16 = 0xf680;
const USB_PROD_STEREO: u16 = 0xf582;
const USB_PROD_MINI: u16 = 0xf682;
const USB_PROD_STEREO2: u16 = 0xf780;

/// Camera model, derived once from the USB vendor/product signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    /// First-generation stereo camera. Firmware not supported.
    LegacyStereo,
    /// First-generation compact camera. Firmware not supported.
    LegacyMini,
    /// Current stereo camera.
    Stereo,
    /// Current compact stereo camera.
    Mini,
    /// Current second-generation stereo camera.
    Stereo2,
}

impl CameraModel {
    /// Classify a USB vendor/product pair. `None` means "not our device".
    pub fn from_usb_id(vendor: u16, product: u16) -> Option<Self> {
        if vendor != USB_VENDOR_ID {
            return None;
        }

        match product {
            USB_PROD_LEGACY_STEREO => Some(CameraModel::LegacyStereo),
            USB_PROD_LEGACY_MINI => Some(CameraModel::LegacyMini),
            USB_PROD_STEREO => Some(CameraModel::Stereo),
            USB_PROD_MINI => Some(CameraModel::Mini),
            USB_PROD_STEREO2 => Some(CameraModel::Stereo2),
            _ => None,
        }
    }

    /// Whether this driver can stream from the model. Legacy firmware
    /// generations are recognized but rejected at open time.
    pub fn is_supported(self) -> bool {
        !matches!(self, CameraModel::LegacyStereo | CameraModel::LegacyMini)
    }
}

/// Parse a `usb:vXXXXpYYYY...` modalias into (vendor, product).
///
/// The ids sit at fixed character offsets; anything that does not match the
/// shape is rejected.
fn parse_modalias(modalias: &str) -> Option<(u16, u16)> {
    let bytes = modalias.as_bytes();
    if bytes.len() < 14 || !modalias.starts_with("usb:v") || bytes[9] != b'p' {
        return None;
    }

    let vendor = u16::from_str_radix(modalias.get(5..9)?, 16).ok()?;
    let product = u16::from_str_radix(modalias.get(10..14)?, 16).ok()?;
    Some((vendor, product))
}

/// Identify the camera model behind `/dev/video<index>`.
///
/// Returns [`Error::NotOurDevice`] for nodes that are not one of our
/// cameras, including nodes with no readable or parseable modalias.
pub fn identify(index: usize) -> Result<CameraModel> {
    let path = format!("/sys/class/video4linux/video{}/device/modalias", index);

    let modalias = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            debug!(path = %path, error = %e, "no modalias attribute");
            return Err(Error::NotOurDevice);
        }
    };
    // sysfs attributes are newline terminated
    let modalias = modalias.trim();

    let Some((vendor, product)) = parse_modalias(modalias) else {
        debug!(path = %path, modalias, "malformed modalias");
        return Err(Error::NotOurDevice);
    };

    match CameraModel::from_usb_id(vendor, product) {
        Some(model) => {
            debug!(index, ?model, vendor, product, "identified camera");
            Ok(model)
        }
        None => {
            debug!(index, vendor, product, "not a stereo camera");
            Err(Error::NotOurDevice)
        }
    }
}

/// Like [`identify`], but additionally rejects models whose firmware this
/// driver cannot drive.
pub(crate) fn identify_supported(index: usize) -> Result<CameraModel> {
    let model = identify(index)?;
    if !model.is_supported() {
        warn!(index, ?model, "camera firmware is not supported");
        return Err(Error::UnsupportedFirmware);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wellformed_modalias() {
        assert_eq!(
            parse_modalias("usb:v2B03pF582d0100dcEFdsc02dp01ic0Eisc01ip00in00"),
            Some((0x2b03, 0xf582))
        );
    }

    #[test]
    fn rejects_malformed_modalias() {
        // wrong bus
        assert_eq!(parse_modalias("pci:v00008086d00001616"), None);
        // too short
        assert_eq!(parse_modalias("usb:v2B03p"), None);
        // product marker missing at the fixed offset
        assert_eq!(parse_modalias("usb:v2B03xF582"), None);
        // non-hex id
        assert_eq!(parse_modalias("usb:vZZZZpF582"), None);
    }

    #[test]
    fn unknown_ids_are_not_ours() {
        assert_eq!(CameraModel::from_usb_id(0x046d, 0x082d), None);
        // right vendor, unknown product
        assert_eq!(CameraModel::from_usb_id(USB_VENDOR_ID, 0x0001), None);
    }

    #[test]
    fn legacy_models_are_recognized_but_unsupported() {
        let legacy = CameraModel::from_usb_id(USB_VENDOR_ID, 0xf580).unwrap();
        assert_eq!(legacy, CameraModel::LegacyStereo);
        assert!(!legacy.is_supported());

        let mini = CameraModel::from_usb_id(USB_VENDOR_ID, 0xf680).unwrap();
        assert_eq!(mini, CameraModel::LegacyMini);
        assert!(!mini.is_supported());
    }

    #[test]
    fn current_models_are_supported() {
        for (pid, model) in [
            (0xf582, CameraModel::Stereo),
            (0xf682, CameraModel::Mini),
            (0xf780, CameraModel::Stereo2),
        ] {
            let m = CameraModel::from_usb_id(USB_VENDOR_ID, pid).unwrap();
            assert_eq!(m, model);
            assert!(m.is_supported());
        }
    }
}
