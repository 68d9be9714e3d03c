//! Capture format negotiation.
//!
//! Each resolution tier supports a fixed set of frame rates. A request for
//! an unsupported rate is substituted with the nearest supported one; the
//! thresholds are device policy and are kept as literals.

use std::fmt;

use tracing::warn;

/// Resolution tier of a single eye. The transmitted image packs both eyes
/// side by side, so the negotiated capture width is twice the tier width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 672x376 per eye
    Vga,
    /// 1280x720 per eye
    Hd720,
    /// 1920x1080 per eye
    Hd1080,
    /// 2208x1242 per eye
    Hd2k,
}

impl Resolution {
    /// Single-eye size in pixels.
    pub const fn size(self) -> (u32, u32) {
        match self {
            Resolution::Vga => (672, 376),
            Resolution::Hd720 => (1280, 720),
            Resolution::Hd1080 => (1920, 1080),
            Resolution::Hd2k => (2208, 1242),
        }
    }

    /// Width of the side-by-side stereo image.
    pub const fn capture_width(self) -> u32 {
        self.size().0 * 2
    }

    /// Height of the side-by-side stereo image.
    pub const fn capture_height(self) -> u32 {
        self.size().1
    }

    /// Frame rates the device advertises for this tier.
    pub const fn supported_rates(self) -> &'static [u32] {
        match self {
            Resolution::Vga => &[15, 30, 60, 100],
            Resolution::Hd720 => &[15, 30, 60],
            Resolution::Hd1080 => &[15, 30],
            Resolution::Hd2k => &[15],
        }
    }

    const fn max_rate(self) -> u32 {
        match self {
            Resolution::Vga => 100,
            Resolution::Hd720 => 60,
            Resolution::Hd1080 => 30,
            Resolution::Hd2k => 15,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.size();
        write!(f, "{}x{}", w, h)
    }
}

/// Map a requested frame rate onto the tier's supported set.
///
/// Exact matches pass through. Anything else picks the nearest rate using
/// fixed thresholds (≤22 → 15, <45 → 30, <80 → 60, else 100) and clamps to
/// the tier ceiling.
pub fn negotiate_fps(resolution: Resolution, requested: u32) -> u32 {
    if resolution.supported_rates().contains(&requested) {
        return requested;
    }

    let nearest = if requested <= 22 {
        15
    } else if requested < 45 {
        30
    } else if requested < 80 {
        60
    } else {
        100
    };
    let granted = nearest.min(resolution.max_rate());

    warn!(
        %resolution,
        requested,
        granted,
        "frame rate not supported for the chosen resolution, using the best value"
    );
    granted
}

/// The format granted by the kernel at open time.
///
/// `width` covers both eyes of the side-by-side pair. The channel count is
/// derived from the granted line stride and is fixed for the lifetime of
/// the device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub fps: u32,
}

impl CaptureFormat {
    /// Size in bytes of one interleaved frame.
    pub const fn frame_size(&self) -> usize {
        (self.width * self.height * self.channels) as usize
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rates_pass_through() {
        for res in [
            Resolution::Vga,
            Resolution::Hd720,
            Resolution::Hd1080,
            Resolution::Hd2k,
        ] {
            for &fps in res.supported_rates() {
                assert_eq!(negotiate_fps(res, fps), fps);
            }
        }
    }

    #[test]
    fn hd2k_always_falls_back_to_fifteen() {
        assert_eq!(negotiate_fps(Resolution::Hd2k, 30), 15);
        assert_eq!(negotiate_fps(Resolution::Hd2k, 60), 15);
        assert_eq!(negotiate_fps(Resolution::Hd2k, 100), 15);
    }

    #[test]
    fn hd1080_clamps_to_thirty() {
        assert_eq!(negotiate_fps(Resolution::Hd1080, 22), 15);
        assert_eq!(negotiate_fps(Resolution::Hd1080, 44), 30);
        assert_eq!(negotiate_fps(Resolution::Hd1080, 60), 30);
        assert_eq!(negotiate_fps(Resolution::Hd1080, 100), 30);
    }

    #[test]
    fn hd720_substitutions() {
        assert_eq!(negotiate_fps(Resolution::Hd720, 10), 15);
        assert_eq!(negotiate_fps(Resolution::Hd720, 22), 15);
        assert_eq!(negotiate_fps(Resolution::Hd720, 44), 30);
        // 45 sits on the threshold and rounds up
        assert_eq!(negotiate_fps(Resolution::Hd720, 45), 60);
        assert_eq!(negotiate_fps(Resolution::Hd720, 70), 60);
        assert_eq!(negotiate_fps(Resolution::Hd720, 100), 60);
    }

    #[test]
    fn vga_reaches_the_top_tier() {
        assert_eq!(negotiate_fps(Resolution::Vga, 70), 60);
        assert_eq!(negotiate_fps(Resolution::Vga, 80), 100);
        assert_eq!(negotiate_fps(Resolution::Vga, 240), 100);
    }

    #[test]
    fn frame_size_matches_dimensions() {
        let fmt = CaptureFormat {
            width: 2560,
            height: 720,
            channels: 2,
            fps: 30,
        };
        assert_eq!(fmt.frame_size(), 2560 * 720 * 2);
    }
}
