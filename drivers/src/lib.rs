pub mod bus;
pub mod controls;
pub mod device;
pub mod devices;
pub mod error;
pub mod link;
pub mod modes;
pub mod properties;
pub mod registers;
pub mod timing;

pub use crate::controls::Control;
pub use crate::device::Firmware;
pub use crate::device::Sensor;
pub use crate::devices::open;
pub use crate::devices::sony_imx283;
pub use crate::devices::Configuration;
pub use crate::devices::Device;
pub use crate::devices::Properties;
pub use crate::devices::Type;
pub use crate::error::Error;

pub use bincode;
pub use sensor_types as types;
