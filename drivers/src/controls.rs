use crate::error::Error;

/// Controls exposed by the sensor, in the order they are replayed at stream start
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Control {
    PixelRate,
    LinkFrequency,
    HorizontalBlanking,
    VerticalBlanking,
    Exposure,
    AnalogGain,
    DigitalGain,
    HorizontalFlip,
    VerticalFlip,
    TestPattern,
}

impl Control {
    pub const ALL: [Control; 10] = [
        Control::PixelRate,
        Control::LinkFrequency,
        Control::HorizontalBlanking,
        Control::VerticalBlanking,
        Control::Exposure,
        Control::AnalogGain,
        Control::DigitalGain,
        Control::HorizontalFlip,
        Control::VerticalFlip,
        Control::TestPattern,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Control::PixelRate => "Pixel Rate",
            Control::LinkFrequency => "Link Frequency",
            Control::HorizontalBlanking => "Horizontal Blanking",
            Control::VerticalBlanking => "Vertical Blanking",
            Control::Exposure => "Exposure",
            Control::AnalogGain => "Analogue Gain",
            Control::DigitalGain => "Digital Gain",
            Control::HorizontalFlip => "Horizontal Flip",
            Control::VerticalFlip => "Vertical Flip",
            Control::TestPattern => "Test Pattern",
        }
    }

    pub const fn is_read_only(self) -> bool {
        matches!(self, Control::PixelRate | Control::LinkFrequency)
    }

    /// Controls that cannot change while frames are streaming
    pub const fn is_grabbed_while_streaming(self) -> bool {
        matches!(self, Control::HorizontalFlip | Control::VerticalFlip)
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TestPattern {
    Disabled,
    All000,
    AllFff,
    All555,
    AllAaa,
    HorizontalColorBars,
    VerticalColorBars,
}

impl TestPattern {
    pub const ALL: [TestPattern; 7] = [
        TestPattern::Disabled,
        TestPattern::All000,
        TestPattern::AllFff,
        TestPattern::All555,
        TestPattern::AllAaa,
        TestPattern::HorizontalColorBars,
        TestPattern::VerticalColorBars,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            TestPattern::Disabled => "Disabled",
            TestPattern::All000 => "All 000h",
            TestPattern::AllFff => "All FFFh",
            TestPattern::All555 => "All 555h",
            TestPattern::AllAaa => "All AAAh",
            TestPattern::HorizontalColorBars => "Horizontal color bars",
            TestPattern::VerticalColorBars => "Vertical color bars",
        }
    }

    pub const fn index(self) -> i64 {
        self as i64
    }

    pub fn from_index(index: i64) -> Result<Self, Error> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "test pattern {index} is outside the menu [0, {}]",
                    Self::ALL.len() - 1
                ))
            })
    }

    pub fn menu() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(|pattern| pattern.name())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Range {
    pub minimum: i64,
    pub maximum: i64,
    pub step: u64,
    pub default: i64,
}

impl Range {
    pub const fn new(minimum: i64, maximum: i64, step: u64, default: i64) -> Self {
        Self {
            minimum,
            maximum,
            step,
            default,
        }
    }

    pub const fn boolean(default: bool) -> Self {
        Self::new(0, 1, 1, default as i64)
    }

    /// Rounds to the nearest step above the minimum and clamps to the range
    pub fn clamp(&self, value: i64) -> i64 {
        let value = value.clamp(self.minimum, self.maximum.max(self.minimum));
        if self.step <= 1 {
            return value;
        }
        let step = self.step as i64;
        let stepped = self.minimum + (value - self.minimum + step / 2) / step * step;
        if stepped > self.maximum {
            stepped - step
        } else {
            stepped
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Entry {
    range: Range,
    value: i64,
}

/// Current value and range of every control
///
/// `hmax` and `vmax` mirror the blanking controls in sensor units. Values
/// are held here while the sensor is unpowered and replayed at stream start.
#[derive(Debug, Clone)]
pub struct Controls {
    entries: [Entry; 10],
    grabbed: bool,
    pub hmax: u32,
    pub vmax: u32,
}

impl Controls {
    /// Every control starts at its range's default
    pub fn new(ranges: [Range; 10]) -> Self {
        Self {
            entries: ranges.map(|range| Entry {
                range,
                value: range.default,
            }),
            grabbed: false,
            hmax: 0,
            vmax: 0,
        }
    }

    pub fn value(&self, control: Control) -> i64 {
        self.entries[control as usize].value
    }

    pub fn range(&self, control: Control) -> Range {
        self.entries[control as usize].range
    }

    /// Stores the value clamped to the control's range and returns it
    pub fn set(&mut self, control: Control, value: i64) -> i64 {
        let entry = &mut self.entries[control as usize];
        entry.value = entry.range.clamp(value);
        entry.value
    }

    /// Replaces the range and clamps the stored value into it
    ///
    /// Returns the new value when clamping changed it.
    pub fn modify_range(&mut self, control: Control, range: Range) -> Option<i64> {
        let entry = &mut self.entries[control as usize];
        entry.range = range;
        let value = range.clamp(entry.value);
        if value == entry.value {
            None
        } else {
            entry.value = value;
            Some(value)
        }
    }

    pub fn grab(&mut self, grabbed: bool) {
        self.grabbed = grabbed;
    }

    pub fn is_grabbed(&self, control: Control) -> bool {
        self.grabbed && control.is_grabbed_while_streaming()
    }

    pub fn flips(&self) -> (bool, bool) {
        (
            self.value(Control::HorizontalFlip) != 0,
            self.value(Control::VerticalFlip) != 0,
        )
    }

    /// (control, value) pairs in replay order
    pub fn iter(&self) -> impl Iterator<Item = (Control, i64)> + '_ {
        Control::ALL
            .iter()
            .map(move |control| (*control, self.value(*control)))
    }
}
