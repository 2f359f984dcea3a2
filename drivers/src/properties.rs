#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Sensor<Configuration> {
    pub name: &'static str,
    pub native_width: u32,
    pub native_height: u32,
    pub default_configuration: Configuration,
}
