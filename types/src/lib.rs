#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub const fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub const fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub const fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Media bus pixel codes (values match the Linux media bus format identifiers)
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelCode {
    Sbggr10 = 0x3007,
    Sgrbg10 = 0x300a,
    Sgbrg10 = 0x300e,
    Srggb10 = 0x300f,
    Sbggr12 = 0x3008,
    Sgbrg12 = 0x3010,
    Sgrbg12 = 0x3011,
    Srggb12 = 0x3012,
    SensorData = 0x7002,
}

impl PixelCode {
    pub const fn bits_per_pixel(self) -> u8 {
        match self {
            Self::Sbggr10 | Self::Sgrbg10 | Self::Sgbrg10 | Self::Srggb10 => 10,
            Self::Sbggr12 | Self::Sgbrg12 | Self::Sgrbg12 | Self::Srggb12 => 12,
            Self::SensorData => 8,
        }
    }

    pub const fn is_bayer(self) -> bool {
        !matches!(self, Self::SensorData)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Colorspace {
    Raw,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub code: PixelCode,
    pub width: u32,
    pub height: u32,
    pub colorspace: Colorspace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Analog crop of the active mode
    Crop,
    /// Full pixel array, including dummy pixels
    NativeSize,
    CropDefault,
    CropBounds,
}
