use crate::bus;
use crate::controls;
use crate::error::Error;
use crate::types;

/// Power rails, clock and reset line of a sensor
pub trait Power {
    fn power_on(&mut self) -> Result<(), Error>;

    fn power_off(&mut self) -> Result<(), Error>;
}

/// Board description provided by the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    pub external_clock_hz: u32,
    pub link_frequencies: Vec<u64>,
    pub data_lanes: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Standby,
    Active,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Done,
    AlreadyInState,
}

pub trait Sensor: Sized {
    type Bus: bus::Bus;
    type Power: Power;
    type Configuration;

    fn open(
        bus: Self::Bus,
        power: Self::Power,
        firmware: &Firmware,
        configuration: Self::Configuration,
    ) -> Result<Self, Error>;

    fn update_configuration(&self, configuration: Self::Configuration) -> Result<(), Error>;

    fn format(&self) -> types::FrameFormat;

    /// Resolves a request to the nearest supported format without applying it
    fn try_format(
        &self,
        code: types::PixelCode,
        width: u32,
        height: u32,
    ) -> Result<types::FrameFormat, Error>;

    fn set_format(
        &self,
        code: types::PixelCode,
        width: u32,
        height: u32,
    ) -> Result<types::FrameFormat, Error>;

    fn enumerate_codes(&self, index: usize) -> Result<types::PixelCode, Error>;

    fn enumerate_frame_sizes(
        &self,
        code: types::PixelCode,
        index: usize,
    ) -> Result<(u32, u32), Error>;

    fn selection(&self, target: types::Selection) -> types::Rect;

    fn metadata_format(&self) -> types::FrameFormat;

    fn control(&self, control: controls::Control) -> i64;

    fn control_range(&self, control: controls::Control) -> controls::Range;

    /// Returns the value actually stored after clamping
    fn set_control(&self, control: controls::Control, value: i64) -> Result<i64, Error>;

    fn start(&self) -> Result<Transition, Error>;

    fn stop(&self) -> Result<Transition, Error>;

    fn stream_state(&self) -> StreamState;

    fn is_powered(&self) -> bool;

    fn power_on(&self) -> Result<(), Error>;

    fn power_off(&self) -> Result<(), Error>;

    fn suspend(&self) -> Result<(), Error>;

    fn resume(&self) -> Result<(), Error>;
}
