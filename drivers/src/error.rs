use crate::bus;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transfer to register {address:#06X} failed ({source})")]
    Io {
        address: u16,
        #[source]
        source: bus::Error,
    },

    #[error("no link frequencies were specified in firmware")]
    NoData,

    #[error("no match: {0}")]
    NoMatch(String),

    #[error("external clock frequency not supported ({0} Hz)")]
    UnsupportedClock(u32),

    #[error("{0} cannot change while the sensor is streaming")]
    Busy(String),

    #[error("power sequencing failed ({0})")]
    Power(String),

    #[error("configuration for {configuration:?} is not compatible with device {device:?}")]
    UpdateMismatch {
        configuration: String,
        device: String,
    },
}
