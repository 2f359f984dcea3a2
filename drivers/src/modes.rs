use crate::registers;
use crate::types;

/// Readout mode selection registers (MDSEL1 to MDSEL4) and mode-specific extras
#[derive(Debug, Copy, Clone)]
pub struct ReadoutPreset {
    pub mdsel: [u8; 4],
    pub extra: &'static registers::Sequence,
}

/// Readout configuration and its framing limits
///
/// HMAX values are counted in 72 MHz clocks, VMAX values in lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode<Id> {
    pub id: Id,
    pub bits_per_pixel: u8,
    pub width: u32,
    pub height: u32,
    pub min_hmax: u32,
    pub min_vmax: u32,
    pub default_hmax: u32,
    pub default_vmax: u32,
    pub min_shr: u32,
    pub horizontal_ob: u32,
    pub vertical_ob: u32,
    /// Analog crop in native pixel coordinates
    pub crop: types::Rect,
    /// Effective lines read out before binning
    pub veff: u32,
    pub vst: u32,
    pub vct: u32,
    pub hbin_ratio: u32,
    pub vbin_ratio: u32,
}

/// Pixel array geometry shared by every mode of a sensor
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PixelArray {
    pub native_width: u32,
    pub native_height: u32,
    pub active: types::Rect,
}

impl PixelArray {
    pub fn selection<Id>(&self, target: types::Selection, mode: &Mode<Id>) -> types::Rect {
        match target {
            types::Selection::Crop => mode.crop,
            types::Selection::NativeSize => {
                types::Rect::new(0, 0, self.native_width, self.native_height)
            }
            types::Selection::CropDefault | types::Selection::CropBounds => self.active,
        }
    }
}

/// Catalog consistency checks, meant to run in a `const` context
///
/// A failure is a bug in the catalog, so it aborts compilation.
pub const fn validate_catalog<Id>(array: &PixelArray, catalog: &[Mode<Id>]) {
    assert!(!catalog.is_empty(), "empty mode catalog");
    let mut index = 0;
    while index < catalog.len() {
        let mode = &catalog[index];
        assert!(
            array.active.contains(&mode.crop),
            "mode crop outside the active area"
        );
        assert!(mode.width > 0 && mode.height > 0, "empty mode");
        assert!(mode.min_hmax > 0, "zero line length");
        assert!(
            mode.min_hmax <= mode.default_hmax && mode.default_hmax <= 0xFFFF,
            "default HMAX outside its range"
        );
        assert!(
            mode.min_vmax <= mode.default_vmax && mode.default_vmax <= 0xFFFF,
            "default VMAX outside its range"
        );
        assert!(mode.height < mode.min_vmax, "frame shorter than its lines");
        assert!(
            mode.hbin_ratio > 0 && mode.vbin_ratio > 0,
            "zero binning ratio"
        );
        index += 1;
    }
}

/// Pixel codes come in groups of four ordered {no flip, hflip, vflip, both}
pub const fn validate_codes(codes: &[types::PixelCode]) {
    assert!(
        !codes.is_empty() && codes.len() % 4 == 0,
        "pixel codes must come in groups of 4"
    );
}

/// Mode whose size is closest to the request
///
/// The distance is `|w - W| + |h - H|` and the first mode wins ties.
pub fn find_nearest<Id>(catalog: &[Mode<Id>], width: u32, height: u32) -> Option<&Mode<Id>> {
    let mut nearest: Option<(u64, &Mode<Id>)> = None;
    for mode in catalog {
        let distance = mode.width.abs_diff(width) as u64 + mode.height.abs_diff(height) as u64;
        if nearest.map_or(true, |(best, _)| distance < best) {
            nearest = Some((distance, mode));
        }
    }
    nearest.map(|(_, mode)| mode)
}

/// Code for the current flips, in the group of `code`
///
/// Unknown codes fall back to the first group.
pub fn format_code(
    codes: &[types::PixelCode],
    code: types::PixelCode,
    hflip: bool,
    vflip: bool,
) -> types::PixelCode {
    let base = codes
        .iter()
        .position(|candidate| *candidate == code)
        .map_or(0, |index| index / 4 * 4);
    codes[base + (((vflip as usize) << 1) | hflip as usize)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelCode;

    const CODES: [PixelCode; 8] = [
        PixelCode::Srggb12,
        PixelCode::Sgrbg12,
        PixelCode::Sgbrg12,
        PixelCode::Sbggr12,
        PixelCode::Srggb10,
        PixelCode::Sgrbg10,
        PixelCode::Sgbrg10,
        PixelCode::Sbggr10,
    ];

    fn mode(id: u8, width: u32, height: u32) -> Mode<u8> {
        Mode {
            id,
            bits_per_pixel: 12,
            width,
            height,
            min_hmax: 100,
            min_vmax: height + 10,
            default_hmax: 100,
            default_vmax: height + 10,
            min_shr: 10,
            horizontal_ob: 0,
            vertical_ob: 0,
            crop: types::Rect::new(0, 0, width, height),
            veff: height,
            vst: 0,
            vct: 0,
            hbin_ratio: 1,
            vbin_ratio: 1,
        }
    }

    #[test]
    fn nearest_mode() {
        let catalog = [mode(0, 5568, 3664), mode(2, 2784, 1832), mode(3, 1856, 1220)];
        assert_eq!(find_nearest(&catalog, 5000, 3000).map(|mode| mode.id), Some(0));
        assert_eq!(find_nearest(&catalog, 1920, 1080).map(|mode| mode.id), Some(3));
        assert_eq!(find_nearest(&catalog, 2784, 1832).map(|mode| mode.id), Some(2));
        assert_eq!(find_nearest(&catalog, 0, 0).map(|mode| mode.id), Some(3));
        assert!(find_nearest::<u8>(&[], 100, 100).is_none());
    }

    #[test]
    fn nearest_mode_ties_keep_the_first_entry() {
        let catalog = [mode(0, 100, 100), mode(1, 120, 80), mode(2, 80, 120)];
        assert_eq!(find_nearest(&catalog, 110, 90).map(|mode| mode.id), Some(0));
        assert_eq!(find_nearest(&catalog, 90, 110).map(|mode| mode.id), Some(0));
    }

    #[test]
    fn flipped_codes() {
        validate_codes(&CODES);
        assert_eq!(
            format_code(&CODES, PixelCode::Srggb12, false, false),
            PixelCode::Srggb12
        );
        assert_eq!(
            format_code(&CODES, PixelCode::Srggb12, true, false),
            PixelCode::Sgrbg12
        );
        assert_eq!(
            format_code(&CODES, PixelCode::Sgrbg12, false, true),
            PixelCode::Sgbrg12
        );
        assert_eq!(
            format_code(&CODES, PixelCode::Sbggr10, true, true),
            PixelCode::Sbggr10
        );
        assert_eq!(
            format_code(&CODES, PixelCode::Sgbrg10, false, false),
            PixelCode::Srggb10
        );
        assert_eq!(
            format_code(&CODES, PixelCode::SensorData, true, false),
            PixelCode::Sgrbg12
        );
    }

    #[test]
    fn selections() {
        let array = PixelArray {
            native_width: 5592,
            native_height: 3710,
            active: types::Rect::new(108, 40, 5472, 3648),
        };
        let mut full = mode(0, 5568, 3664);
        full.crop = types::Rect::new(108, 40, 5472, 3648);
        validate_catalog(&array, std::slice::from_ref(&full));
        assert_eq!(
            array.selection(types::Selection::Crop, &full),
            types::Rect::new(108, 40, 5472, 3648)
        );
        assert_eq!(
            array.selection(types::Selection::NativeSize, &full),
            types::Rect::new(0, 0, 5592, 3710)
        );
        assert_eq!(
            array.selection(types::Selection::CropBounds, &full),
            array.active
        );
    }

    #[test]
    #[should_panic]
    fn crop_outside_the_active_area() {
        let array = PixelArray {
            native_width: 5592,
            native_height: 3710,
            active: types::Rect::new(108, 40, 5472, 3648),
        };
        validate_catalog(&array, &[mode(0, 5568, 3664)]);
    }
}
