use crate::bus;
use crate::controls::{Control, Controls, Range, TestPattern};
use crate::device;
use crate::error::Error;
use crate::link;
use crate::modes;
use crate::properties;
use crate::registers::{self, Batch, RegisterToken};
use crate::timing;
use crate::types;

registers::register! { STANDBY, 0x3000, 1 }
registers::register! { CHIP_ID, 0x3000, 1 }
registers::register! { CLAMP, 0x3001, 1 }
registers::register! { PLSTMG08, 0x3003, 1 }
registers::register! { MDSEL1, 0x3004, 1 }
registers::register! { MDSEL2, 0x3005, 1 }
registers::register! { MDSEL3, 0x3006, 1 }
registers::register! { MDSEL4, 0x3007, 1 }
registers::register! { SVR, 0x3009, 2, little }
registers::register! { HTRIMMING, 0x300B, 1 }
registers::register! { VWINPOS, 0x300F, 2, little }
registers::register! { VWIDCUT, 0x3011, 2, little }
registers::register! { MDSEL7, 0x3013, 2, little }
registers::register! { TCLKPOST, 0x3018, 1 }
registers::register! { THSPREPARE, 0x301A, 1 }
registers::register! { THSZERO, 0x301C, 1 }
registers::register! { THSTRAIL, 0x301E, 1 }
registers::register! { TCLKTRAIL, 0x3020, 1 }
registers::register! { TCLKPREPARE, 0x3022, 1 }
registers::register! { TCLKZERO, 0x3024, 2, little }
registers::register! { TLPX, 0x3026, 1 }
registers::register! { THSEXIT, 0x3028, 1 }
registers::register! { TCLKPRE, 0x302A, 1 }
registers::register! { Y_OUT_SIZE, 0x302F, 2, little }
registers::register! { WRITE_VSIZE, 0x3031, 2, little }
registers::register! { OB_SIZE_V, 0x3033, 1 }
registers::register! { HMAX, 0x3036, 2, little }
registers::register! { VMAX, 0x3038, 3, little }
registers::register! { SHR, 0x303B, 2, little }
registers::register! { ANALOG_GAIN, 0x3042, 2, little }
registers::register! { DIGITAL_GAIN, 0x3044, 1 }
registers::register! { HTRIMMING_START, 0x3058, 2, little }
registers::register! { HTRIMMING_END, 0x305A, 2, little }
registers::register! { MDSEL18, 0x30F6, 2, little }
registers::register! { SYSMODE, 0x3104, 1 }
registers::register! { XMSTA, 0x3105, 1 }
registers::register! { SYNCDRV, 0x3107, 1 }
registers::register! { TPG_CTRL, 0x3156, 1 }
registers::register! { TPG_PAT, 0x3157, 1 }
registers::register! { STBPL, 0x320B, 1 }
registers::register! { PLSTMG02, 0x36AA, 1 }
registers::register! { PLRD1, 0x36C1, 1 }
registers::register! { PLRD2, 0x36C2, 2, little }
registers::register! { UNKNOWN_36C5, 0x36C5, 1 }
registers::register! { PLRD3, 0x36F7, 1 }
registers::register! { PLRD4, 0x36F8, 1 }
registers::register! { EBD_X_OUT_SIZE, 0x3A54, 2, little }
registers::register! { UNKNOWN_3AC4, 0x3AC4, 1 }

pub const STANDBY_ACTIVE: u64 = 0;
pub const STANDBY_STANDBY: u64 = 1 << 0;
pub const STANDBY_STBLOGIC: u64 = 1 << 1;
pub const STANDBY_STBDV: u64 = 1 << 3;
pub const CLAMP_CLPSQRST: u64 = 1 << 4;
pub const PLSTMG08_VALUE: u64 = 0x77;
pub const PLSTMG02_VALUE: u64 = 0x00;
pub const MDSEL3_VCROP_EN: u64 = 1 << 5;
pub const MDSEL4_VCROP_EN: u64 = (1 << 4) | (1 << 6);
pub const HTRIMMING_MDVREV: u64 = 1 << 0;
pub const HTRIMMING_EN: u64 = 1 << 4;
pub const SYNCDRV_XHS_XVS: u64 = 0xA2;
pub const TPG_CTRL_CLKEN: u64 = 1 << 0;
pub const TPG_CTRL_PATEN: u64 = 1 << 4;
pub const STBPL_NORMAL: u64 = 0x00;
pub const CHIP_ID_VALUE: u64 = 0x0B;

pub const ANALOG_GAIN_MAXIMUM: i64 = 1957;
pub const DIGITAL_GAIN_MAXIMUM: i64 = 3;
pub const DEFAULT_EXPOSURE: i64 = 1000;
pub const DATA_LANES: u8 = 4;
pub const METADATA_LINE_WIDTH: u32 = 16384;
pub const METADATA_LINES: u32 = 1;
const RESET_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModeId {
    Mode0,
    Mode1,
    Mode1A,
    Mode1S,
    Mode2,
    Mode2A,
    Mode3,
    Mode4,
    Mode5,
    Mode6,
}

const MODE1S_EXTRA: &registers::Sequence = &[(MDSEL7, 0x01), (MDSEL18, 0x04)];

impl ModeId {
    pub const fn readout(self) -> modes::ReadoutPreset {
        let (mdsel, extra): ([u8; 4], &'static registers::Sequence) = match self {
            ModeId::Mode0 => ([0x04, 0x03, 0x10, 0x00], &[]),
            ModeId::Mode1 => ([0x04, 0x01, 0x00, 0x00], &[]),
            ModeId::Mode1A => ([0x04, 0x01, 0x20, 0x50], &[]),
            ModeId::Mode1S => ([0x04, 0x41, 0x20, 0x50], MODE1S_EXTRA),
            ModeId::Mode2 => ([0x0d, 0x11, 0x50, 0x00], &[]),
            ModeId::Mode2A => ([0x0d, 0x11, 0x70, 0x50], &[]),
            ModeId::Mode3 => ([0x1e, 0x18, 0x10, 0x00], &[]),
            ModeId::Mode4 => ([0x29, 0x18, 0x30, 0x50], &[]),
            ModeId::Mode5 => ([0x2d, 0x18, 0x10, 0x00], &[]),
            ModeId::Mode6 => ([0x18, 0x21, 0x00, 0x09], &[]),
        };
        modes::ReadoutPreset { mdsel, extra }
    }

    /// Shutter offset in 72 MHz clocks
    pub const fn exposure_offset(self) -> u32 {
        match self {
            ModeId::Mode0 => 209,
            _ => 157,
        }
    }
}

pub type Mode = modes::Mode<ModeId>;

const ACTIVE_AREA: types::Rect = types::Rect::new(108, 40, 5472, 3648);

pub const PIXEL_ARRAY: modes::PixelArray = modes::PixelArray {
    native_width: 5592,
    native_height: 3710,
    active: ACTIVE_AREA,
};

pub const MODES_12_BIT: [Mode; 3] = [
    Mode {
        id: ModeId::Mode0,
        bits_per_pixel: 12,
        width: 5568,
        height: 3664,
        min_hmax: 887,
        min_vmax: 3793,
        default_hmax: 900,
        default_vmax: 4000,
        min_shr: 11,
        horizontal_ob: 96,
        vertical_ob: 16,
        crop: ACTIVE_AREA,
        veff: 3694,
        vst: 0,
        vct: 0,
        hbin_ratio: 1,
        vbin_ratio: 1,
    },
    Mode {
        id: ModeId::Mode2,
        bits_per_pixel: 12,
        width: 2784,
        height: 1832,
        min_hmax: 362,
        min_vmax: 3840,
        default_hmax: 375,
        default_vmax: 3840,
        min_shr: 12,
        horizontal_ob: 48,
        vertical_ob: 8,
        crop: ACTIVE_AREA,
        veff: 1824,
        vst: 0,
        vct: 0,
        hbin_ratio: 2,
        vbin_ratio: 2,
    },
    Mode {
        id: ModeId::Mode3,
        bits_per_pixel: 12,
        width: 1856,
        height: 1220,
        min_hmax: 284,
        min_vmax: 4200,
        default_hmax: 285,
        default_vmax: 4200,
        min_shr: 16,
        horizontal_ob: 32,
        vertical_ob: 4,
        crop: ACTIVE_AREA,
        veff: 1234,
        vst: 0,
        vct: 0,
        hbin_ratio: 3,
        vbin_ratio: 3,
    },
];

pub const MODES_10_BIT: [Mode; 1] = [Mode {
    id: ModeId::Mode1,
    bits_per_pixel: 10,
    width: 5568,
    height: 3664,
    min_hmax: 745,
    min_vmax: 3793,
    default_hmax: 750,
    default_vmax: 3840,
    min_shr: 10,
    horizontal_ob: 96,
    vertical_ob: 16,
    crop: ACTIVE_AREA,
    veff: 3694,
    vst: 0,
    vct: 0,
    hbin_ratio: 1,
    vbin_ratio: 1,
}];

/// Bayer codes in groups of {no flip, hflip, vflip, both}
pub const CODES: [types::PixelCode; 8] = [
    types::PixelCode::Srggb12,
    types::PixelCode::Sgrbg12,
    types::PixelCode::Sgbrg12,
    types::PixelCode::Sbggr12,
    types::PixelCode::Srggb10,
    types::PixelCode::Sgrbg10,
    types::PixelCode::Sgbrg10,
    types::PixelCode::Sbggr10,
];

const _: () = modes::validate_catalog(&PIXEL_ARRAY, &MODES_12_BIT);
const _: () = modes::validate_catalog(&PIXEL_ARRAY, &MODES_10_BIT);
const _: () = modes::validate_codes(&CODES);

pub fn catalog(code: types::PixelCode) -> &'static [Mode] {
    match code.bits_per_pixel() {
        10 => &MODES_10_BIT,
        _ => &MODES_12_BIT,
    }
}

pub static INPUT_FREQUENCIES: [link::InputFrequency; 4] = [
    link::InputFrequency {
        external_clock_hz: 6_000_000,
        registers: &[(PLRD1, 0x00), (PLRD2, 0x00f0), (PLRD3, 0x00), (PLRD4, 0xc0)],
    },
    link::InputFrequency {
        external_clock_hz: 12_000_000,
        registers: &[(PLRD1, 0x01), (PLRD2, 0x00f0), (PLRD3, 0x01), (PLRD4, 0xc0)],
    },
    link::InputFrequency {
        external_clock_hz: 18_000_000,
        registers: &[(PLRD1, 0x01), (PLRD2, 0x00a0), (PLRD3, 0x01), (PLRD4, 0x80)],
    },
    link::InputFrequency {
        external_clock_hz: 24_000_000,
        registers: &[(PLRD1, 0x02), (PLRD2, 0x00f0), (PLRD3, 0x02), (PLRD4, 0xc0)],
    },
];

/// MIPI timings, 720 MHz (1440 Mbps per lane) first
pub static LINK_FREQUENCIES: [link::LinkFrequency; 2] = [
    link::LinkFrequency {
        link_frequency_hz: 720_000_000,
        registers: &[
            (UNKNOWN_36C5, 0x00),
            (UNKNOWN_3AC4, 0x00),
            (STBPL, STBPL_NORMAL),
            (TCLKPOST, 0xa7),
            (THSPREPARE, 0x6f),
            (THSZERO, 0x9f),
            (THSTRAIL, 0x5f),
            (TCLKTRAIL, 0x5f),
            (TCLKPREPARE, 0x6f),
            (TCLKZERO, 0x017f),
            (TLPX, 0x4f),
            (THSEXIT, 0x47),
            (TCLKPRE, 0x07),
            (SYSMODE, 0x02),
        ],
    },
    link::LinkFrequency {
        link_frequency_hz: 360_000_000,
        registers: &[
            (UNKNOWN_36C5, 0x01),
            (UNKNOWN_3AC4, 0x01),
            (STBPL, STBPL_NORMAL),
            (TCLKPOST, 0x77),
            (THSPREPARE, 0x37),
            (THSZERO, 0x67),
            (THSTRAIL, 0x37),
            (TCLKTRAIL, 0x37),
            (TCLKPREPARE, 0x37),
            (TCLKZERO, 0xdf),
            (TLPX, 0x2f),
            (THSEXIT, 0x47),
            (TCLKPRE, 0x0f),
            (SYSMODE, 0x02),
        ],
    },
];

const fn test_pattern_register(pattern: TestPattern) -> u64 {
    match pattern {
        TestPattern::Disabled | TestPattern::All000 => 0x00,
        TestPattern::AllFff => 0x01,
        TestPattern::All555 => 0x02,
        TestPattern::AllAaa => 0x03,
        TestPattern::HorizontalColorBars => 0x0a,
        TestPattern::VerticalColorBars => 0x0b,
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub exposure: u32,
    pub analog_gain: u16,
    pub digital_gain: u8,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub test_pattern: TestPattern,
    /// None selects the mode's default line length
    pub horizontal_blanking: Option<u32>,
    /// None selects the mode's default frame length
    pub vertical_blanking: Option<u32>,
}

pub const PROPERTIES: properties::Sensor<Configuration> = properties::Sensor::<Configuration> {
    name: "Sony IMX283",
    native_width: PIXEL_ARRAY.native_width,
    native_height: PIXEL_ARRAY.native_height,
    default_configuration: Configuration {
        exposure: DEFAULT_EXPOSURE as u32,
        analog_gain: 0,
        digital_gain: 0,
        horizontal_flip: false,
        vertical_flip: false,
        test_pattern: TestPattern::Disabled,
        horizontal_blanking: None,
        vertical_blanking: None,
    },
};

fn sensor_timing(controls: &Controls, mode: &Mode) -> timing::Timing {
    timing::Timing {
        hmax: controls.hmax,
        vmax: controls.vmax,
        svr: 0,
        offset: mode.id.exposure_offset(),
    }
}

/// Register writes that apply the current value of `control`
///
/// Timing controls also rewrite SHR since the shutter line depends on both
/// HMAX and VMAX.
pub fn control_writes(
    control: Control,
    controls: &Controls,
    mode: &Mode,
) -> Vec<(RegisterToken, u64)> {
    let value = controls.value(control);
    let shr = || {
        let exposure = controls.value(Control::Exposure).clamp(0, u32::MAX as i64) as u32;
        (
            SHR,
            sensor_timing(controls, mode).clamped_shr(exposure, mode.min_shr) as u64,
        )
    };
    match control {
        Control::PixelRate | Control::LinkFrequency | Control::HorizontalFlip => Vec::new(),
        Control::HorizontalBlanking => vec![(HMAX, controls.hmax as u64), shr()],
        Control::VerticalBlanking => vec![(VMAX, controls.vmax as u64), shr()],
        Control::Exposure => vec![shr()],
        Control::AnalogGain => vec![(ANALOG_GAIN, value as u64)],
        Control::DigitalGain => vec![(DIGITAL_GAIN, value as u64)],
        Control::VerticalFlip => vec![(
            HTRIMMING,
            if value != 0 {
                HTRIMMING_EN | HTRIMMING_MDVREV
            } else {
                HTRIMMING_EN
            },
        )],
        Control::TestPattern => match TestPattern::from_index(value) {
            Ok(TestPattern::Disabled) | Err(_) => vec![(TPG_CTRL, 0)],
            Ok(pattern) => vec![
                (TPG_PAT, test_pattern_register(pattern)),
                (TPG_CTRL, TPG_CTRL_CLKEN | TPG_CTRL_PATEN),
            ],
        },
    }
}

fn initial_ranges(link: &link::LinkFrequency) -> [Range; 10] {
    let link_frequency = link.link_frequency_hz as i64;
    [
        Range::new(0, 0, 1, 0),
        Range::new(link_frequency, link_frequency, 1, link_frequency),
        Range::new(0, 0xFFFF, 1, 0),
        Range::new(0, 0xFFFF, 1, 0),
        Range::new(0, 0xFFFF, 1, DEFAULT_EXPOSURE),
        Range::new(0, ANALOG_GAIN_MAXIMUM, 1, 0),
        Range::new(0, DIGITAL_GAIN_MAXIMUM, 1, 0),
        Range::boolean(false),
        Range::boolean(false),
        Range::new(0, TestPattern::ALL.len() as i64 - 1, 1, 0),
    ]
}

fn step<B: bus::Bus>(
    bus: &mut B,
    name: &str,
    build: impl FnOnce(&mut Batch<'_, B>),
) -> Result<(), Error> {
    log::debug!("{name}");
    let mut batch = Batch::new(bus);
    build(&mut batch);
    batch.finish().map_err(|error| {
        log::error!("{name} failed ({error})");
        error
    })
}

struct Inner<B, P> {
    bus: B,
    power: P,
    powered: bool,
    stream: device::StreamState,
    mode: &'static Mode,
    code: types::PixelCode,
    controls: Controls,
    configuration: Configuration,
    input: &'static link::InputFrequency,
    link: &'static link::LinkFrequency,
}

impl<B: bus::Bus, P: device::Power> Inner<B, P> {
    fn power_on(&mut self) -> Result<(), Error> {
        if self.powered {
            return Ok(());
        }
        self.power.power_on().map_err(|error| {
            log::error!("powering on failed ({error})");
            error
        })?;
        std::thread::sleep(RESET_DELAY);
        self.powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), Error> {
        if !self.powered {
            return Ok(());
        }
        self.power.power_off()?;
        self.powered = false;
        Ok(())
    }

    fn identify(&mut self) -> Result<(), Error> {
        let id = registers::read(&mut self.bus, CHIP_ID)?;
        if id != CHIP_ID_VALUE {
            log::error!("unexpected chip id {id:#04X}");
            return Err(Error::NoMatch(format!(
                "chip id {id:#04X} (expected {CHIP_ID_VALUE:#04X})"
            )));
        }
        Ok(())
    }

    fn timing(&self) -> timing::Timing {
        sensor_timing(&self.controls, self.mode)
    }

    fn pixel_rate(&self) -> u64 {
        self.controls.value(Control::PixelRate) as u64
    }

    fn update_exposure_range(&mut self) {
        let (minimum, maximum) = self.timing().exposure_limits(self.mode.min_shr);
        let (minimum, maximum) = (minimum as i64, maximum as i64);
        self.controls.modify_range(
            Control::Exposure,
            Range::new(
                minimum,
                maximum,
                1,
                DEFAULT_EXPOSURE.min(maximum).max(minimum),
            ),
        );
    }

    /// Resets the framing controls to the limits of `mode`
    fn apply_mode(&mut self, mode: &'static Mode, code: types::PixelCode) {
        self.mode = mode;
        self.code = code;
        let pixel_rate = timing::pixel_rate(mode.width, mode.min_hmax);
        self.controls.modify_range(
            Control::PixelRate,
            Range::new(
                pixel_rate as i64,
                pixel_rate as i64,
                1,
                pixel_rate as i64,
            ),
        );

        let height = mode.height as i64;
        let vblank_default = mode.default_vmax as i64 - height;
        self.controls.modify_range(
            Control::VerticalBlanking,
            Range::new(
                mode.min_vmax as i64 - height,
                0xFFFF - height,
                1,
                vblank_default,
            ),
        );
        let vblank = self.controls.set(Control::VerticalBlanking, vblank_default);
        self.controls.vmax = (height + vblank) as u32;

        let hblank_default =
            timing::hblank_from_hmax(mode.width, mode.default_hmax as u64, pixel_rate) as i64;
        self.controls.modify_range(
            Control::HorizontalBlanking,
            Range::new(
                timing::hblank_from_hmax(mode.width, mode.min_hmax as u64, pixel_rate) as i64,
                timing::hblank_ceiling(mode.width, 0xFFFF, pixel_rate) as i64,
                1,
                hblank_default,
            ),
        );
        let hblank = self.controls.set(Control::HorizontalBlanking, hblank_default);
        self.controls.hmax = timing::hmax_from_hblank(mode.width, hblank as u32, pixel_rate) as u32;

        self.update_exposure_range();
        log::debug!(
            "mode {:?} ({}x{}, {} pixels/s)",
            mode.id,
            mode.width,
            mode.height,
            pixel_rate
        );
    }

    /// Stores a control value and the framing state derived from it
    fn hold(&mut self, control: Control, value: i64) -> i64 {
        let value = self.controls.set(control, value);
        match control {
            Control::HorizontalBlanking => {
                self.controls.hmax =
                    timing::hmax_from_hblank(self.mode.width, value as u32, self.pixel_rate())
                        .min(0xFFFF) as u32;
                self.update_exposure_range();
            }
            Control::VerticalBlanking => {
                self.controls.vmax = (self.mode.height as i64 + value) as u32;
                self.update_exposure_range();
            }
            _ => (),
        }
        value
    }

    fn set_control(&mut self, control: Control, value: i64) -> Result<i64, Error> {
        if control.is_read_only() {
            return Err(Error::InvalidArgument(format!("{control} is read-only")));
        }
        if self.controls.is_grabbed(control) {
            return Err(Error::Busy(control.to_string()));
        }
        if control == Control::TestPattern {
            TestPattern::from_index(value)?;
        }
        let previous = self.controls.clone();
        let value = self.hold(control, value);
        if self.powered {
            if let Err(error) = registers::write_sequence(
                &mut self.bus,
                &control_writes(control, &self.controls, self.mode),
            ) {
                self.controls = previous;
                return Err(error);
            }
        } else {
            log::debug!("{control} held at {value}");
        }
        Ok(value)
    }

    fn update_configuration(
        &mut self,
        previous: Option<&Configuration>,
        configuration: &Configuration,
    ) -> Result<(), Error> {
        macro_rules! update_control {
            ($field:ident, $control:expr, $value:expr) => {
                if previous.map_or(true, |previous| previous.$field != configuration.$field) {
                    let value = $value;
                    self.set_control($control, value)?;
                }
            };
        }
        update_control!(
            horizontal_blanking,
            Control::HorizontalBlanking,
            match configuration.horizontal_blanking {
                Some(hblank) => hblank as i64,
                None => self.controls.range(Control::HorizontalBlanking).default,
            }
        );
        update_control!(
            vertical_blanking,
            Control::VerticalBlanking,
            match configuration.vertical_blanking {
                Some(vblank) => vblank as i64,
                None => self.controls.range(Control::VerticalBlanking).default,
            }
        );
        update_control!(exposure, Control::Exposure, configuration.exposure as i64);
        update_control!(
            analog_gain,
            Control::AnalogGain,
            configuration.analog_gain as i64
        );
        update_control!(
            digital_gain,
            Control::DigitalGain,
            configuration.digital_gain as i64
        );
        update_control!(
            horizontal_flip,
            Control::HorizontalFlip,
            configuration.horizontal_flip as i64
        );
        update_control!(
            vertical_flip,
            Control::VerticalFlip,
            configuration.vertical_flip as i64
        );
        update_control!(
            test_pattern,
            Control::TestPattern,
            configuration.test_pattern.index()
        );
        Ok(())
    }

    fn resolve(
        &self,
        code: types::PixelCode,
        width: u32,
        height: u32,
    ) -> Result<(&'static Mode, types::PixelCode), Error> {
        let (hflip, vflip) = self.controls.flips();
        let code = modes::format_code(&CODES, code, hflip, vflip);
        let mode = modes::find_nearest(catalog(code), width, height)
            .ok_or_else(|| Error::NoMatch(format!("no mode for {code:?}")))?;
        Ok((mode, code))
    }

    fn format(&self) -> types::FrameFormat {
        let (hflip, vflip) = self.controls.flips();
        types::FrameFormat {
            code: modes::format_code(&CODES, self.code, hflip, vflip),
            width: self.mode.width,
            height: self.mode.height,
            colorspace: types::Colorspace::Raw,
        }
    }

    /// Full register programming for the current mode, then held controls
    fn program(&mut self) -> Result<(), Error> {
        let mode = self.mode;
        let readout = mode.id.readout();
        let input = self.input;
        let link = self.link;
        let (_, vflip) = self.controls.flips();

        step(&mut self.bus, "PLL and MIPI setup", |batch| {
            batch
                .write(STANDBY, STANDBY_STBLOGIC | STANDBY_STBDV)
                .sequence(input.registers)
                .write(PLSTMG08, PLSTMG08_VALUE)
                .write(PLSTMG02, PLSTMG02_VALUE)
                .write(STBPL, STBPL_NORMAL)
                .sequence(link.registers);
        })?;
        step(&mut self.bus, "standby exit", |batch| {
            batch
                .delay(std::time::Duration::from_millis(1))
                .write(STANDBY, STANDBY_ACTIVE)
                .delay(std::time::Duration::from_millis(19));
        })?;
        step(&mut self.bus, "clamp and sync", |batch| {
            batch
                .write(CLAMP, CLAMP_CLPSQRST)
                .write(XMSTA, 0)
                .write(SYNCDRV, SYNCDRV_XHS_XVS);
        })?;
        step(&mut self.bus, "readout mode", |batch| {
            batch
                .write(MDSEL1, readout.mdsel[0] as u64)
                .write(MDSEL2, readout.mdsel[1] as u64)
                .write(MDSEL3, readout.mdsel[2] as u64 | MDSEL3_VCROP_EN)
                .write(MDSEL4, readout.mdsel[3] as u64 | MDSEL4_VCROP_EN)
                .sequence(readout.extra);
        })?;

        let vbin = mode.vbin_ratio as i64;
        let y_out_size = mode.crop.height as i64 / vbin;
        let vwidcut = (mode.veff as i64 - y_out_size) / 2 + mode.vct as i64;
        let top = mode.crop.top as i64 / vbin;
        let vwinpos = (if vflip { -top / 2 } else { top / 2 }) + mode.vst as i64;
        step(&mut self.bus, "window", |batch| {
            batch
                .write(SVR, 0)
                .write(Y_OUT_SIZE, y_out_size as u64)
                .write(WRITE_VSIZE, (y_out_size + mode.vertical_ob as i64) as u64)
                .write(VWIDCUT, vwidcut as u64)
                .write(VWINPOS, vwinpos as u64)
                .write(OB_SIZE_V, mode.vertical_ob as u64)
                .write(HTRIMMING_START, mode.crop.left as u64)
                .write(HTRIMMING_END, mode.crop.right() as u64);
        })?;

        let default_timing = timing::Timing {
            hmax: mode.default_hmax,
            vmax: mode.default_vmax,
            svr: 0,
            offset: mode.id.exposure_offset(),
        };
        let shr = default_timing.clamped_shr(DEFAULT_EXPOSURE as u32, mode.min_shr);
        step(&mut self.bus, "default timing", |batch| {
            batch
                .write(HMAX, mode.default_hmax as u64)
                .write(VMAX, mode.default_vmax as u64)
                .write(SHR, shr as u64)
                .write(EBD_X_OUT_SIZE, 0);
        })?;

        let writes: Vec<(RegisterToken, u64)> = self
            .controls
            .iter()
            .flat_map(|(control, _)| control_writes(control, &self.controls, mode))
            .collect();
        step(&mut self.bus, "control replay", |batch| {
            batch.sequence(&writes);
        })
    }

    fn start(&mut self) -> Result<device::Transition, Error> {
        if self.stream == device::StreamState::Active {
            return Ok(device::Transition::AlreadyInState);
        }
        self.power_on()?;
        self.program()?;
        self.stream = device::StreamState::Active;
        self.controls.grab(true);
        log::debug!("streaming");
        Ok(device::Transition::Done)
    }

    fn stop(&mut self) -> Result<device::Transition, Error> {
        if self.stream == device::StreamState::Standby {
            return Ok(device::Transition::AlreadyInState);
        }
        let result = if self.powered {
            registers::write(&mut self.bus, STANDBY, STANDBY_STANDBY)
        } else {
            Ok(())
        };
        self.stream = device::StreamState::Standby;
        self.controls.grab(false);
        match result {
            Ok(()) => {
                log::debug!("standby");
                Ok(device::Transition::Done)
            }
            Err(error) => {
                log::warn!("entering standby failed ({error})");
                Err(error)
            }
        }
    }

    fn suspend(&mut self) -> Result<(), Error> {
        if self.stream == device::StreamState::Active && self.powered {
            if let Err(error) = registers::write(&mut self.bus, STANDBY, STANDBY_STANDBY) {
                log::warn!("entering standby before suspend failed ({error})");
            }
        }
        self.power_off()
    }

    fn resume(&mut self) -> Result<(), Error> {
        self.power_on()?;
        if self.stream == device::StreamState::Active {
            if let Err(error) = self.program() {
                let _ = registers::write(&mut self.bus, STANDBY, STANDBY_STANDBY);
                self.stream = device::StreamState::Standby;
                self.controls.grab(false);
                return Err(error);
            }
        }
        Ok(())
    }
}

pub struct Device<B: bus::Bus, P: device::Power> {
    inner: std::sync::Mutex<Inner<B, P>>,
}

impl<B: bus::Bus, P: device::Power> Device<B, P> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<B, P>> {
        self.inner.lock().expect("mutex is not poisoned")
    }
}

impl<B: bus::Bus, P: device::Power> device::Sensor for Device<B, P> {
    type Bus = B;

    type Power = P;

    type Configuration = Configuration;

    fn open(
        bus: Self::Bus,
        power: Self::Power,
        firmware: &device::Firmware,
        configuration: Self::Configuration,
    ) -> Result<Self, Error> {
        if firmware.data_lanes != DATA_LANES {
            return Err(Error::InvalidArgument(format!(
                "{} data lanes given, only {DATA_LANES} are supported",
                firmware.data_lanes
            )));
        }
        let input = link::select_input_frequency(&INPUT_FREQUENCIES, firmware.external_clock_hz)?;
        let (_, link) = link::select_link_frequency(&LINK_FREQUENCIES, &firmware.link_frequencies)?;
        log::debug!(
            "{} Hz external clock, {} Hz link frequency",
            input.external_clock_hz,
            link.link_frequency_hz
        );
        let mode: &'static Mode = &catalog(CODES[0])[0];
        let mut inner = Inner {
            bus,
            power,
            powered: false,
            stream: device::StreamState::Standby,
            mode,
            code: CODES[0],
            controls: Controls::new(initial_ranges(link)),
            configuration: configuration.clone(),
            input,
            link,
        };
        inner.power_on()?;
        if let Err(error) = inner.identify() {
            let _ = inner.power_off();
            return Err(error);
        }
        inner.power_off()?;
        inner.apply_mode(mode, CODES[0]);
        inner.update_configuration(None, &configuration)?;
        Ok(Device {
            inner: std::sync::Mutex::new(inner),
        })
    }

    fn update_configuration(&self, configuration: Self::Configuration) -> Result<(), Error> {
        let mut inner = self.lock();
        let previous = inner.configuration.clone();
        inner.update_configuration(Some(&previous), &configuration)?;
        inner.configuration = configuration;
        Ok(())
    }

    fn format(&self) -> types::FrameFormat {
        self.lock().format()
    }

    fn try_format(
        &self,
        code: types::PixelCode,
        width: u32,
        height: u32,
    ) -> Result<types::FrameFormat, Error> {
        let (mode, code) = self.lock().resolve(code, width, height)?;
        Ok(types::FrameFormat {
            code,
            width: mode.width,
            height: mode.height,
            colorspace: types::Colorspace::Raw,
        })
    }

    fn set_format(
        &self,
        code: types::PixelCode,
        width: u32,
        height: u32,
    ) -> Result<types::FrameFormat, Error> {
        let mut inner = self.lock();
        if inner.stream == device::StreamState::Active {
            return Err(Error::Busy("format".to_owned()));
        }
        let (mode, code) = inner.resolve(code, width, height)?;
        if std::ptr::eq(mode, inner.mode) {
            inner.code = code;
        } else {
            inner.apply_mode(mode, code);
        }
        Ok(inner.format())
    }

    fn enumerate_codes(&self, index: usize) -> Result<types::PixelCode, Error> {
        let (hflip, vflip) = self.lock().controls.flips();
        CODES
            .chunks(4)
            .nth(index)
            .map(|group| modes::format_code(&CODES, group[0], hflip, vflip))
            .ok_or_else(|| Error::InvalidArgument(format!("no pixel code at index {index}")))
    }

    fn enumerate_frame_sizes(
        &self,
        code: types::PixelCode,
        index: usize,
    ) -> Result<(u32, u32), Error> {
        let (hflip, vflip) = self.lock().controls.flips();
        if modes::format_code(&CODES, code, hflip, vflip) != code {
            return Err(Error::InvalidArgument(format!(
                "{code:?} does not match the current flips"
            )));
        }
        catalog(code)
            .get(index)
            .map(|mode| (mode.width, mode.height))
            .ok_or_else(|| Error::InvalidArgument(format!("no frame size at index {index}")))
    }

    fn selection(&self, target: types::Selection) -> types::Rect {
        PIXEL_ARRAY.selection(target, self.lock().mode)
    }

    fn metadata_format(&self) -> types::FrameFormat {
        types::FrameFormat {
            code: types::PixelCode::SensorData,
            width: METADATA_LINE_WIDTH,
            height: METADATA_LINES,
            colorspace: types::Colorspace::Raw,
        }
    }

    fn control(&self, control: Control) -> i64 {
        self.lock().controls.value(control)
    }

    fn control_range(&self, control: Control) -> Range {
        self.lock().controls.range(control)
    }

    fn set_control(&self, control: Control, value: i64) -> Result<i64, Error> {
        self.lock().set_control(control, value)
    }

    fn start(&self) -> Result<device::Transition, Error> {
        self.lock().start()
    }

    fn stop(&self) -> Result<device::Transition, Error> {
        self.lock().stop()
    }

    fn stream_state(&self) -> device::StreamState {
        self.lock().stream
    }

    fn is_powered(&self) -> bool {
        self.lock().powered
    }

    fn power_on(&self) -> Result<(), Error> {
        self.lock().power_on()
    }

    fn power_off(&self) -> Result<(), Error> {
        self.lock().power_off()
    }

    fn suspend(&self) -> Result<(), Error> {
        self.lock().suspend()
    }

    fn resume(&self) -> Result<(), Error> {
        self.lock().resume()
    }
}

impl<B: bus::Bus, P: device::Power> Drop for Device<B, P> {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = inner.stop();
        let _ = inner.power_off();
    }
}
