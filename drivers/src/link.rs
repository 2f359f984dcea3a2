use crate::error::Error;
use crate::registers;

/// PLL input settings for one external clock frequency
#[derive(Debug)]
pub struct InputFrequency {
    pub external_clock_hz: u32,
    pub registers: &'static registers::Sequence,
}

/// MIPI timing settings for one link frequency
#[derive(Debug)]
pub struct LinkFrequency {
    pub link_frequency_hz: u64,
    pub registers: &'static registers::Sequence,
}

pub fn select_input_frequency(
    profiles: &'static [InputFrequency],
    external_clock_hz: u32,
) -> Result<&'static InputFrequency, Error> {
    profiles
        .iter()
        .find(|profile| profile.external_clock_hz == external_clock_hz)
        .ok_or(Error::UnsupportedClock(external_clock_hz))
}

/// Bit `j` is set when the driver's frequency `j` is listed by the firmware
///
/// Only the first 64 driver frequencies are considered.
pub fn link_frequencies_to_bitmap(firmware: &[u64], driver: &[u64]) -> Result<u64, Error> {
    if firmware.is_empty() {
        return Err(Error::NoData);
    }
    let bitmap = driver
        .iter()
        .take(64)
        .enumerate()
        .filter(|(_, frequency)| firmware.contains(frequency))
        .fold(0u64, |bitmap, (index, _)| bitmap | (1u64 << index));
    if bitmap == 0 {
        return Err(Error::NoMatch(format!(
            "none of the firmware link frequencies {firmware:?} are supported"
        )));
    }
    Ok(bitmap)
}

/// Profile of the lowest supported frequency index listed by the firmware
pub fn select_link_frequency(
    profiles: &'static [LinkFrequency],
    firmware: &[u64],
) -> Result<(usize, &'static LinkFrequency), Error> {
    let driver: Vec<u64> = profiles
        .iter()
        .map(|profile| profile.link_frequency_hz)
        .collect();
    let index = link_frequencies_to_bitmap(firmware, &driver)?.trailing_zeros() as usize;
    Ok((index, &profiles[index]))
}
