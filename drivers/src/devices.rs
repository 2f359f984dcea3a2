use crate::bus;
use crate::controls;
use crate::device;
use crate::device::Sensor;
use crate::error::Error;
use crate::types;

macro_rules! register {
    ($($module:ident),+) => {
        paste::paste! {
            $(
                pub mod $module;
            )+

            #[derive(Debug, Copy, Clone, PartialEq, Eq)]
            pub enum Type {
                $(
                    [<$module:camel>],
                )+
            }

            impl std::fmt::Display for Type {
                fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self {
                        $(
                            Self::[<$module:camel>] => write!(formatter, stringify!($module)),
                        )+
                    }
                }
            }

            impl Type {
                pub fn name(self) -> &'static str  {
                    match self {
                        $(
                            Type::[<$module:camel>] => $module::PROPERTIES.name,
                        )+
                    }
                }
            }

            #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
            #[serde(tag = "type", content = "configuration")]
            pub enum Configuration {
                $(
                    #[serde(rename = "" $module)]
                    [<$module:camel>]($module::Configuration),
                )+
            }

            impl Configuration {
                pub fn deserialize_bincode(
                    device_type: Type,
                    data: &[u8]
                ) -> bincode::Result<Configuration> {
                    match device_type {
                        $(
                            Type::[<$module:camel>] => Ok(
                                Configuration::[<$module:camel>](bincode::deserialize(data)?)
                            ),
                        )+
                    }
                }

                pub fn serialize_bincode(&self) -> bincode::Result<Vec<u8>> {
                    match self {
                        $(
                            Configuration::[<$module:camel>](configuration) => bincode::serialize(configuration),
                        )+
                    }
                }

                pub fn device_type(&self) -> Type {
                    match self {
                        $(
                            Configuration::[<$module:camel>](_) => Type::[<$module:camel>],
                        )+
                    }
                }

                pub fn type_name(&self) -> &'static str {
                    self.device_type().name()
                }
            }

            pub enum Device<B: bus::Bus, P: device::Power> {
                $(
                    [<$module:camel>]($module::Device<B, P>),
                )+
            }

            /// Opens a sensor on `bus`
            ///
            /// Without a configuration the sensor starts from its default one.
            pub fn open<B: bus::Bus, P: device::Power>(
                device_type: Type,
                bus: B,
                power: P,
                firmware: &device::Firmware,
                configuration: Option<Configuration>,
            ) -> Result<Device<B, P>, Error>
            {
                match device_type {
                    $(
                        Type::[<$module:camel>] => {
                            let configuration = match configuration {
                                Some(Configuration::[<$module:camel>](configuration)) => configuration,
                                #[allow(unreachable_patterns)]
                                Some(configuration) => return Err(Error::UpdateMismatch {
                                    configuration: configuration.type_name().to_owned(),
                                    device: $module::PROPERTIES.name.to_owned(),
                                }),
                                None => $module::PROPERTIES.default_configuration.clone(),
                            };
                            $module::Device::open(bus, power, firmware, configuration)
                                .map(Device::[<$module:camel>])
                        }
                    )+
                }
            }

            #[derive(Debug, serde::Serialize)]
            pub enum Properties {
                $(
                    #[serde(rename = "" $module)]
                    [<$module:camel>](crate::properties::Sensor<$module::Configuration>),
                )+
            }

            impl<B: bus::Bus, P: device::Power> Device<B, P> {
                pub fn device_type(&self) -> Type {
                    match self {
                        $(
                            Self::[<$module:camel>](_) => Type::[<$module:camel>],
                        )+
                    }
                }

                pub fn properties(&self) -> Properties {
                    match self {
                        $(
                            Self::[<$module:camel>](_) => Properties::[<$module:camel>]($module::PROPERTIES),
                        )+
                    }
                }

                pub fn name(&self) -> &'static str {
                    self.device_type().name()
                }

                pub fn update_configuration(&self, configuration: Configuration) -> Result<(), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => match configuration {
                                Configuration::[<$module:camel>](configuration) => {
                                    device.update_configuration(configuration)
                                },
                                #[allow(unreachable_patterns)]
                                configuration => Err(Error::UpdateMismatch {
                                    configuration: configuration.type_name().to_owned(),
                                    device: $module::PROPERTIES.name.to_owned(),
                                })
                            },
                        )+
                    }
                }

                pub fn format(&self) -> types::FrameFormat {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.format(),
                        )+
                    }
                }

                pub fn try_format(
                    &self,
                    code: types::PixelCode,
                    width: u32,
                    height: u32,
                ) -> Result<types::FrameFormat, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.try_format(code, width, height),
                        )+
                    }
                }

                pub fn set_format(
                    &self,
                    code: types::PixelCode,
                    width: u32,
                    height: u32,
                ) -> Result<types::FrameFormat, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.set_format(code, width, height),
                        )+
                    }
                }

                pub fn enumerate_codes(&self, index: usize) -> Result<types::PixelCode, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.enumerate_codes(index),
                        )+
                    }
                }

                pub fn enumerate_frame_sizes(
                    &self,
                    code: types::PixelCode,
                    index: usize,
                ) -> Result<(u32, u32), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.enumerate_frame_sizes(code, index),
                        )+
                    }
                }

                pub fn selection(&self, target: types::Selection) -> types::Rect {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.selection(target),
                        )+
                    }
                }

                pub fn metadata_format(&self) -> types::FrameFormat {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.metadata_format(),
                        )+
                    }
                }

                pub fn control(&self, control: controls::Control) -> i64 {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.control(control),
                        )+
                    }
                }

                pub fn control_range(&self, control: controls::Control) -> controls::Range {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.control_range(control),
                        )+
                    }
                }

                pub fn set_control(&self, control: controls::Control, value: i64) -> Result<i64, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.set_control(control, value),
                        )+
                    }
                }

                pub fn start(&self) -> Result<device::Transition, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.start(),
                        )+
                    }
                }

                pub fn stop(&self) -> Result<device::Transition, Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.stop(),
                        )+
                    }
                }

                pub fn stream_state(&self) -> device::StreamState {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.stream_state(),
                        )+
                    }
                }

                pub fn is_powered(&self) -> bool {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.is_powered(),
                        )+
                    }
                }

                pub fn power_on(&self) -> Result<(), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.power_on(),
                        )+
                    }
                }

                pub fn power_off(&self) -> Result<(), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.power_off(),
                        )+
                    }
                }

                pub fn suspend(&self) -> Result<(), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.suspend(),
                        )+
                    }
                }

                pub fn resume(&self) -> Result<(), Error> {
                    match self {
                        $(
                            Self::[<$module:camel>](device) => device.resume(),
                        )+
                    }
                }
            }

            #[derive(Debug, PartialEq, Eq)]
            pub struct ParseTypeError {
                on: String
            }

            impl std::fmt::Display for ParseTypeError {
                fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    write!(formatter, "unknown device type \"{}\"", self.on)
                }
            }

            impl std::error::Error for ParseTypeError {}

            impl std::str::FromStr for Type {
                type Err = ParseTypeError;

                fn from_str(string: &str) -> Result<Self, Self::Err> {
                    match string {
                        $(
                            stringify!($module) => paste::paste! {Ok(Self::[<$module:camel>])},
                        )+
                        _ => Err(Self::Err {on: string.to_owned()}),
                    }
                }
            }
        }
    };
}

register! { sony_imx283 }
