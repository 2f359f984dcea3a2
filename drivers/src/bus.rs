pub mod recorder;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("the device did not acknowledge the transfer")]
    Nack,

    #[error("short transfer ({requested} bytes requested, {transferred} bytes transferred)")]
    Short {
        requested: usize,
        transferred: usize,
    },

    #[error("transfer timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Serial register bus shared by the whole sensor
///
/// Implementations move raw bytes only, register addressing and value
/// serialization belong to [`crate::registers`]. Transfers are blocking and
/// must not be retried by the caller.
pub trait Bus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Writes `bytes` then reads `buffer.len()` bytes in a single transaction
    fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Error>;
}
