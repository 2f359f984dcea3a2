//! Register codec
//!
//! Addresses are always transmitted as two big-endian bytes. Value bytes are
//! big-endian unless the register is tagged little-endian. Reads are always
//! interpreted as big-endian, whatever the tag.

use crate::bus;
use crate::error::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Endianness {
    Big,
    Little,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegisterToken {
    address: u16,
    width: u8,
    endianness: Endianness,
}

impl RegisterToken {
    pub const fn new(address: u16, width: u8, endianness: Endianness) -> Self {
        assert!(width >= 1 && width <= 8, "register width must be in [1, 8]");
        Self {
            address,
            width,
            endianness,
        }
    }

    pub fn try_new(address: u32, width: u32, endianness: Endianness) -> Result<Self, Error> {
        if !(1..=8).contains(&width) {
            return Err(Error::InvalidArgument(format!(
                "register width {width} is outside [1, 8]"
            )));
        }
        let address = u16::try_from(address).map_err(|_| {
            Error::InvalidArgument(format!("register address {address:#X} is wider than 16 bits"))
        })?;
        Ok(Self {
            address,
            width: width as u8,
            endianness,
        })
    }

    pub const fn address(&self) -> u16 {
        self.address
    }

    pub const fn width(&self) -> usize {
        self.width as usize
    }

    pub const fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Largest value that fits in the register
    pub const fn maximum(&self) -> u64 {
        if self.width == 8 {
            u64::MAX
        } else {
            (1u64 << (self.width as u32 * 8)) - 1
        }
    }
}

macro_rules! register {
    ($name:ident, $address:literal, $width:literal) => {
        pub const $name: $crate::registers::RegisterToken = $crate::registers::RegisterToken::new(
            $address,
            $width,
            $crate::registers::Endianness::Big,
        );
    };
    ($name:ident, $address:literal, $width:literal, little) => {
        pub const $name: $crate::registers::RegisterToken = $crate::registers::RegisterToken::new(
            $address,
            $width,
            $crate::registers::Endianness::Little,
        );
    };
}

pub(crate) use register;

/// Serializes a write transaction (address followed by value bytes)
///
/// Bits above the register width are dropped.
pub fn encode(token: RegisterToken, value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + token.width());
    bytes.extend_from_slice(&token.address.to_be_bytes());
    let value_bytes = value.to_be_bytes();
    let value_bytes = &value_bytes[8 - token.width()..];
    match token.endianness {
        Endianness::Big => bytes.extend_from_slice(value_bytes),
        Endianness::Little => bytes.extend(value_bytes.iter().rev()),
    }
    bytes
}

/// Parses the value bytes of a write transaction produced by [`encode`]
pub fn decode(token: RegisterToken, bytes: &[u8]) -> Result<u64, Error> {
    if bytes.len() != token.width() {
        return Err(Error::InvalidArgument(format!(
            "register {:#06X} is {} bytes wide ({} bytes given)",
            token.address,
            token.width(),
            bytes.len()
        )));
    }
    let accumulate = |value: u64, byte: &u8| (value << 8) | *byte as u64;
    Ok(match token.endianness {
        Endianness::Big => bytes.iter().fold(0, accumulate),
        Endianness::Little => bytes.iter().rev().fold(0, accumulate),
    })
}

pub fn read<B: bus::Bus + ?Sized>(bus: &mut B, token: RegisterToken) -> Result<u64, Error> {
    let mut buffer = [0u8; 8];
    let buffer = &mut buffer[..token.width()];
    bus.write_read(&token.address.to_be_bytes(), buffer)
        .map_err(|source| {
            log::error!("reading register {:#06X} failed ({source})", token.address);
            Error::Io {
                address: token.address,
                source,
            }
        })?;
    Ok(buffer
        .iter()
        .fold(0u64, |value, byte| (value << 8) | *byte as u64))
}

pub fn write<B: bus::Bus + ?Sized>(
    bus: &mut B,
    token: RegisterToken,
    value: u64,
) -> Result<(), Error> {
    log::trace!("{:#06X} <- {:#X}", token.address, value & token.maximum());
    bus.write(&encode(token, value)).map_err(|source| {
        log::error!("writing register {:#06X} failed ({source})", token.address);
        Error::Io {
            address: token.address,
            source,
        }
    })
}

pub type Sequence = [(RegisterToken, u64)];

/// Writes registers in order and stops at the first failure
///
/// Registers written before the failure are left as they are.
pub fn write_sequence<B: bus::Bus + ?Sized>(bus: &mut B, sequence: &Sequence) -> Result<(), Error> {
    sequence
        .iter()
        .try_for_each(|(token, value)| write(bus, *token, *value))
}

/// Chain of writes sharing one error slot
///
/// Once a write fails, every later write and delay in the batch is skipped
/// and [`Batch::finish`] returns the first error.
pub struct Batch<'a, B: bus::Bus + ?Sized> {
    bus: &'a mut B,
    error: Option<Error>,
}

impl<'a, B: bus::Bus + ?Sized> Batch<'a, B> {
    pub fn new(bus: &'a mut B) -> Self {
        Self { bus, error: None }
    }

    pub fn write(&mut self, token: RegisterToken, value: u64) -> &mut Self {
        if self.error.is_none() {
            if let Err(error) = write(&mut *self.bus, token, value) {
                self.error = Some(error);
            }
        }
        self
    }

    pub fn sequence(&mut self, sequence: &Sequence) -> &mut Self {
        if self.error.is_none() {
            if let Err(error) = write_sequence(&mut *self.bus, sequence) {
                self.error = Some(error);
            }
        }
        self
    }

    pub fn delay(&mut self, duration: std::time::Duration) -> &mut Self {
        if self.error.is_none() {
            std::thread::sleep(duration);
        }
        self
    }

    pub fn finish(self) -> Result<(), Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
