use std::fmt;

use crate::v4l2::videodev::v4l2_capability;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE     = 0x00000001;
        const VIDEO_OUTPUT      = 0x00000002;
        const VIDEO_OVERLAY     = 0x00000004;
        const META_CAPTURE      = 0x00800000;
        const READ_WRITE        = 0x01000000;
        const ASYNC_IO          = 0x02000000;
        const STREAMING         = 0x04000000;
        const DEVICE_CAPS       = 0x80000000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Device capabilities
#[derive(Debug)]
pub struct Capabilities {
    /// Driver name, e.g. uvcvideo for USB video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capability flags
    pub capabilities: Flags,
}

fn c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl From<v4l2_capability> for Capabilities {
    fn from(cap: v4l2_capability) -> Self {
        // device_caps is only valid when the driver advertises it
        let flags = if cap.capabilities & Flags::DEVICE_CAPS.bits() != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };

        Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus: c_string(&cap.bus_info),
            version: (
                ((cap.version >> 16) & 0xff) as u8,
                ((cap.version >> 8) & 0xff) as u8,
                (cap.version & 0xff) as u8,
            ),
            capabilities: Flags::from(flags),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilites : {}", self.capabilities)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_raw_capability() {
        let mut raw: v4l2_capability = unsafe { std::mem::zeroed() };
        raw.driver[..8].copy_from_slice(b"uvcvideo");
        raw.card[..6].copy_from_slice(b"Stereo");
        raw.bus_info[..3].copy_from_slice(b"usb");
        raw.version = (5 << 16) | (15 << 8) | 2;
        raw.capabilities = Flags::DEVICE_CAPS.bits() | 0x8520_0001;
        raw.device_caps = Flags::VIDEO_CAPTURE.bits() | Flags::STREAMING.bits();

        let caps = Capabilities::from(raw);
        assert_eq!(caps.driver, "uvcvideo");
        assert_eq!(caps.card, "Stereo");
        assert_eq!(caps.bus, "usb");
        assert_eq!(caps.version, (5, 15, 2));
        assert!(caps.capabilities.contains(Flags::VIDEO_CAPTURE | Flags::STREAMING));
        assert!(!caps.capabilities.contains(Flags::VIDEO_OUTPUT));
    }
}
