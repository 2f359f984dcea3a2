//! Line timing arithmetic
//!
//! HMAX counts 72 MHz clocks per line, VMAX counts lines per frame and SHR is
//! the line at which the shutter opens. Exposure is measured in lines.
//!
//! `shr(exposure_lines(shr)) == shr` holds exactly when the exposure offset is
//! a multiple of HMAX. Otherwise the offset leaves a fractional line that
//! `exposure_lines` rounds down and `shr` rounds up, so the round trip lands
//! one line above the starting SHR.

pub const BASE_CLOCK_HZ: u64 = 72_000_000;

/// Lines between the last shutter line and the end of the frame
pub const SHR_MARGIN: u64 = 4;

pub const SHR_MAXIMUM: u64 = 0xFFFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Must not be zero
    pub hmax: u32,
    pub vmax: u32,
    pub svr: u32,
    /// Exposure offset in 72 MHz clocks
    pub offset: u32,
}

impl Timing {
    fn frame_lines(&self) -> i64 {
        self.vmax as i64 * (self.svr as i64 + 1)
    }

    pub fn exposure_lines(&self, shr: u32) -> u32 {
        let hmax = self.hmax as i64;
        let clocks = (self.frame_lines() - shr as i64) * hmax + self.offset as i64;
        (clocks / hmax).clamp(0, u32::MAX as i64) as u32
    }

    pub fn shr(&self, exposure: u32) -> u32 {
        let hmax = self.hmax as i64;
        let lines = (exposure as i64 * hmax - self.offset as i64).div_euclid(hmax);
        (self.frame_lines() - lines).clamp(0, u32::MAX as i64) as u32
    }

    pub fn shr_maximum(&self) -> u32 {
        (self.frame_lines() - SHR_MARGIN as i64).clamp(0, SHR_MAXIMUM as i64) as u32
    }

    /// Returns (minimum, maximum) exposure in lines
    ///
    /// The longest exposure opens the shutter at `min_shr`.
    pub fn exposure_limits(&self, min_shr: u32) -> (u32, u32) {
        (
            self.exposure_lines(self.shr_maximum()),
            self.exposure_lines(min_shr),
        )
    }

    /// SHR for `exposure`, bounded to the register's valid range
    pub fn clamped_shr(&self, exposure: u32, min_shr: u32) -> u32 {
        self.shr(exposure)
            .clamp(min_shr, self.shr_maximum().max(min_shr))
    }
}

pub fn pixel_rate(width: u32, min_hmax: u32) -> u64 {
    width as u64 * BASE_CLOCK_HZ / min_hmax as u64
}

pub fn hmax_from_hblank(width: u32, hblank: u32, pixel_rate: u64) -> u64 {
    (width as u64 + hblank as u64) * BASE_CLOCK_HZ / pixel_rate
}

/// Smallest blanking whose line length covers `hmax` clocks
pub fn hblank_from_hmax(width: u32, hmax: u64, pixel_rate: u64) -> u64 {
    (hmax * pixel_rate)
        .div_ceil(BASE_CLOCK_HZ)
        .saturating_sub(width as u64)
}

/// Largest blanking whose line length stays within `hmax` clocks
pub fn hblank_ceiling(width: u32, hmax: u64, pixel_rate: u64) -> u64 {
    (hmax * pixel_rate / BASE_CLOCK_HZ).saturating_sub(width as u64)
}
