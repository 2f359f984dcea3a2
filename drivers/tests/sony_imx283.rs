use sensor_drivers::bus;
use sensor_drivers::bus::recorder::{Recorder, Supply};
use sensor_drivers::device::{StreamState, Transition};
use sensor_drivers::sony_imx283;
use sensor_drivers::types::{PixelCode, Rect, Selection};
use sensor_drivers::{Configuration, Control, Device, Error, Firmware, Type};

fn firmware() -> Firmware {
    Firmware {
        external_clock_hz: 24_000_000,
        link_frequencies: vec![720_000_000, 360_000_000],
        data_lanes: 4,
    }
}

fn recorder() -> Recorder {
    let recorder = Recorder::new();
    recorder.set_memory(0x3000, &[0x0B]);
    recorder
}

fn open_with(
    configuration: Option<Configuration>,
) -> Result<(Device<Recorder, Supply>, Recorder, Supply), Error> {
    let recorder = recorder();
    let supply = Supply::new();
    let device = sensor_drivers::open(
        Type::SonyImx283,
        recorder.clone(),
        supply.clone(),
        &firmware(),
        configuration,
    )?;
    recorder.clear();
    Ok((device, recorder, supply))
}

fn open() -> (Device<Recorder, Supply>, Recorder, Supply) {
    open_with(None).unwrap()
}

fn last_write(recorder: &Recorder, address: u16) -> Option<Vec<u8>> {
    recorder
        .writes()
        .into_iter()
        .rev()
        .find(|(written, _)| *written == address)
        .map(|(_, payload)| payload)
}

#[test]
fn open_identifies_the_chip_and_powers_off() {
    let recorder = recorder();
    let supply = Supply::new();
    let device = sensor_drivers::open(
        Type::SonyImx283,
        recorder.clone(),
        supply.clone(),
        &firmware(),
        None,
    )
    .unwrap();
    assert_eq!(
        recorder.transactions(),
        vec![bus::recorder::Transaction::Read {
            address: 0x3000,
            length: 1
        }]
    );
    assert_eq!(supply.power_ons(), 1);
    assert_eq!(supply.power_offs(), 1);
    assert!(!device.is_powered());
    assert_eq!(device.stream_state(), StreamState::Standby);
    assert_eq!(device.name(), "Sony IMX283");
}

#[test]
fn open_rejects_an_unknown_chip() {
    let recorder = Recorder::new();
    recorder.set_memory(0x3000, &[0x0A]);
    let supply = Supply::new();
    let result = sensor_drivers::open(
        Type::SonyImx283,
        recorder,
        supply.clone(),
        &firmware(),
        None,
    );
    assert!(matches!(result, Err(Error::NoMatch(_))));
    assert!(!supply.is_powered());
}

#[test]
fn open_reports_bus_failures() {
    let recorder = recorder();
    recorder.fail_reads_from(0x3000);
    let result = sensor_drivers::open(
        Type::SonyImx283,
        recorder,
        Supply::new(),
        &firmware(),
        None,
    );
    assert_eq!(
        result.err(),
        Some(Error::Io {
            address: 0x3000,
            source: bus::Error::Nack
        })
    );
}

#[test]
fn open_rejects_unsupported_clocks() {
    let supply = Supply::new();
    let result = sensor_drivers::open(
        Type::SonyImx283,
        recorder(),
        supply.clone(),
        &Firmware {
            external_clock_hz: 27_000_000,
            ..firmware()
        },
        None,
    );
    assert_eq!(result.err(), Some(Error::UnsupportedClock(27_000_000)));
    assert_eq!(supply.power_ons(), 0);
}

#[test]
fn open_requires_four_data_lanes() {
    let result = sensor_drivers::open(
        Type::SonyImx283,
        recorder(),
        Supply::new(),
        &Firmware {
            data_lanes: 2,
            ..firmware()
        },
        None,
    );
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn open_negotiates_the_link_frequency() {
    let open_with_frequencies = |link_frequencies: Vec<u64>| {
        sensor_drivers::open(
            Type::SonyImx283,
            recorder(),
            Supply::new(),
            &Firmware {
                link_frequencies,
                ..firmware()
            },
            None,
        )
    };
    assert_eq!(open_with_frequencies(Vec::new()).err(), Some(Error::NoData));
    assert!(matches!(
        open_with_frequencies(vec![900_000_000]),
        Err(Error::NoMatch(_))
    ));
    let device = open_with_frequencies(vec![360_000_000]).unwrap();
    assert_eq!(device.control(Control::LinkFrequency), 360_000_000);
    let device = open_with_frequencies(vec![360_000_000, 720_000_000]).unwrap();
    assert_eq!(device.control(Control::LinkFrequency), 720_000_000);
}

#[test]
fn slow_link_frequency_timings() {
    let recorder = recorder();
    let device = sensor_drivers::open(
        Type::SonyImx283,
        recorder.clone(),
        Supply::new(),
        &Firmware {
            external_clock_hz: 6_000_000,
            link_frequencies: vec![360_000_000],
            data_lanes: 4,
        },
        None,
    )
    .unwrap();
    device.start().unwrap();
    assert_eq!(last_write(&recorder, 0x36C1), Some(vec![0x00]));
    assert_eq!(last_write(&recorder, 0x36C5), Some(vec![0x01]));
    assert_eq!(last_write(&recorder, 0x3018), Some(vec![0x77]));
    assert_eq!(last_write(&recorder, 0x3024), Some(vec![0xdf, 0x00]));
}

#[test]
fn default_format() {
    let (device, _, _) = open();
    let format = device.format();
    assert_eq!(format.code, PixelCode::Srggb12);
    assert_eq!((format.width, format.height), (5568, 3664));
    assert_eq!(device.control(Control::PixelRate), 451_968_432);
    assert_eq!(device.control(Control::HorizontalBlanking), 82);
    assert_eq!(device.control(Control::VerticalBlanking), 336);
    assert_eq!(device.control(Control::Exposure), 1000);
    let range = device.control_range(Control::Exposure);
    assert_eq!((range.minimum, range.maximum), (4, 3989));
}

#[test]
fn formats_resolve_to_the_nearest_mode() {
    let (device, _, _) = open();
    let format = device.try_format(PixelCode::Srggb12, 5000, 3000).unwrap();
    assert_eq!((format.width, format.height), (5568, 3664));
    let format = device.try_format(PixelCode::Srggb12, 1920, 1080).unwrap();
    assert_eq!((format.width, format.height), (1856, 1220));
    assert_eq!(device.format().width, 5568);

    let format = device.set_format(PixelCode::Sbggr10, 1, 1).unwrap();
    assert_eq!(format.code, PixelCode::Srggb10);
    assert_eq!((format.width, format.height), (5568, 3664));
    assert_eq!(device.control(Control::PixelRate), 538_115_436);
    assert_eq!(device.control(Control::HorizontalBlanking), 38);

    let format = device.set_format(PixelCode::Sgrbg12, 2784, 1832).unwrap();
    assert_eq!(format.code, PixelCode::Srggb12);
    assert_eq!(device.control(Control::VerticalBlanking), 3840 - 1832);
    let range = device.control_range(Control::VerticalBlanking);
    assert_eq!((range.minimum, range.maximum), (3840 - 1832, 0xFFFF - 1832));
}

#[test]
fn reselecting_the_current_mode_keeps_the_framing() {
    let (device, _, _) = open();
    device.set_control(Control::VerticalBlanking, 1000).unwrap();
    device.set_control(Control::Exposure, 4000).unwrap();
    let format = device.set_format(PixelCode::Sbggr12, 5568, 3664).unwrap();
    assert_eq!(format.code, PixelCode::Srggb12);
    assert_eq!(device.control(Control::VerticalBlanking), 1000);
    assert_eq!(device.control(Control::Exposure), 4000);
    assert_eq!(device.control_range(Control::Exposure).maximum, 4664 - 11);

    device.set_format(PixelCode::Srggb12, 2784, 1832).unwrap();
    assert_eq!(device.control(Control::VerticalBlanking), 3840 - 1832);
}

#[test]
fn exposure_limits_stay_ordered() {
    let (device, _, _) = open();
    for (code, width, height) in [
        (PixelCode::Srggb12, 5568, 3664),
        (PixelCode::Srggb12, 2784, 1832),
        (PixelCode::Srggb12, 1856, 1220),
        (PixelCode::Srggb10, 5568, 3664),
    ] {
        device.set_format(code, width, height).unwrap();
        let vblank = device.control_range(Control::VerticalBlanking);
        for value in [vblank.minimum, vblank.default, 10_000, vblank.maximum] {
            device.set_control(Control::VerticalBlanking, value).unwrap();
            let exposure = device.control_range(Control::Exposure);
            assert!(exposure.minimum <= exposure.maximum);
            let current = device.control(Control::Exposure);
            assert!(exposure.minimum <= current && current <= exposure.maximum);
        }
    }
}

#[test]
fn vertical_blanking_shrinks_the_exposure() {
    let (device, _, _) = open();
    device.set_control(Control::Exposure, 3989).unwrap();
    let vblank = device.control_range(Control::VerticalBlanking).minimum;
    assert_eq!(
        device.set_control(Control::VerticalBlanking, 0).unwrap(),
        vblank
    );
    let exposure = device.control_range(Control::Exposure);
    assert_eq!(exposure.maximum, 3793 - 11);
    assert_eq!(device.control(Control::Exposure), 3793 - 11);
}

#[test]
fn controls_are_held_while_unpowered() {
    let (device, recorder, _) = open();
    assert_eq!(
        device.set_control(Control::VerticalBlanking, 1000).unwrap(),
        1000
    );
    assert_eq!(device.set_control(Control::AnalogGain, 5000).unwrap(), 1957);
    assert!(recorder.writes().is_empty());
    assert_eq!(device.control_range(Control::Exposure).maximum, 4664 - 11);

    assert_eq!(device.start().unwrap(), Transition::Done);
    assert_eq!(last_write(&recorder, 0x3038), Some(vec![0x38, 0x12, 0x00]));
    assert_eq!(last_write(&recorder, 0x3042), Some(vec![0xA5, 0x07]));
}

#[test]
fn controls_are_written_while_powered() {
    let (device, recorder, _) = open();
    device.power_on().unwrap();
    device.set_control(Control::Exposure, 2000).unwrap();
    assert_eq!(recorder.writes(), vec![(0x303B, vec![0xD1, 0x07])]);
    recorder.clear();
    device.set_control(Control::VerticalBlanking, 1000).unwrap();
    assert_eq!(
        recorder.writes(),
        vec![(0x3038, vec![0x38, 0x12, 0x00]), (0x303B, vec![0x69, 0x0A])]
    );
    recorder.clear();
    device.set_control(Control::DigitalGain, 2).unwrap();
    assert_eq!(recorder.writes(), vec![(0x3044, vec![0x02])]);
}

#[test]
fn failed_control_writes_keep_the_previous_value() {
    let (device, recorder, _) = open();
    device.power_on().unwrap();
    recorder.fail_writes_to(0x303B);
    assert_eq!(
        device.set_control(Control::Exposure, 2000),
        Err(Error::Io {
            address: 0x303B,
            source: bus::Error::Nack
        })
    );
    assert_eq!(device.control(Control::Exposure), 1000);

    assert!(device.set_control(Control::VerticalBlanking, 1000).is_err());
    assert_eq!(device.control(Control::VerticalBlanking), 336);
    assert_eq!(device.control_range(Control::Exposure).maximum, 3989);

    recorder.heal();
    assert_eq!(device.set_control(Control::Exposure, 2000).unwrap(), 2000);
}

#[test]
fn start_programs_the_sensor_in_order() {
    let (device, recorder, supply) = open();
    assert_eq!(device.start().unwrap(), Transition::Done);
    assert_eq!(device.stream_state(), StreamState::Active);
    assert!(supply.is_powered());

    let addresses = recorder.written_addresses();
    assert_eq!(
        &addresses[..12],
        &[
            0x3000, 0x36C1, 0x36C2, 0x36F7, 0x36F8, 0x3003, 0x36AA, 0x320B, 0x36C5, 0x3AC4,
            0x320B, 0x3018
        ]
    );
    let writes = recorder.writes();
    assert_eq!(writes[0], (0x3000, vec![0x0A]));
    let wake = writes
        .iter()
        .position(|write| *write == (0x3000, vec![0x00]))
        .unwrap();
    assert_eq!(writes[wake + 1], (0x3001, vec![0x10]));
    assert_eq!(writes[wake + 2], (0x3105, vec![0x00]));
    assert_eq!(writes[wake + 3], (0x3107, vec![0xA2]));
    assert_eq!(writes[wake + 4], (0x3004, vec![0x04]));
    assert_eq!(writes[wake + 5], (0x3005, vec![0x03]));
    assert_eq!(writes[wake + 6], (0x3006, vec![0x30]));
    assert_eq!(writes[wake + 7], (0x3007, vec![0x50]));

    assert_eq!(last_write(&recorder, 0x3009), Some(vec![0x00, 0x00]));
    assert_eq!(last_write(&recorder, 0x302F), Some(vec![0x40, 0x0E]));
    assert_eq!(last_write(&recorder, 0x3031), Some(vec![0x50, 0x0E]));
    assert_eq!(last_write(&recorder, 0x3011), Some(vec![0x17, 0x00]));
    assert_eq!(last_write(&recorder, 0x300F), Some(vec![0x14, 0x00]));
    assert_eq!(last_write(&recorder, 0x3033), Some(vec![0x10]));
    assert_eq!(last_write(&recorder, 0x3058), Some(vec![0x6C, 0x00]));
    assert_eq!(last_write(&recorder, 0x305A), Some(vec![0xCC, 0x15]));
    assert_eq!(last_write(&recorder, 0x3036), Some(vec![0x84, 0x03]));
    assert_eq!(last_write(&recorder, 0x3038), Some(vec![0xA0, 0x0F, 0x00]));
    assert_eq!(last_write(&recorder, 0x303B), Some(vec![0xB9, 0x0B]));
    assert_eq!(last_write(&recorder, 0x3A54), Some(vec![0x00, 0x00]));
    assert_eq!(last_write(&recorder, 0x300B), Some(vec![0x10]));
    assert_eq!(last_write(&recorder, 0x3156), Some(vec![0x00]));
}

#[test]
fn vertical_flip_moves_the_window() {
    let (device, recorder, _) = open();
    device.set_control(Control::VerticalFlip, 1).unwrap();
    assert_eq!(device.format().code, PixelCode::Sgbrg12);
    device.start().unwrap();
    assert_eq!(last_write(&recorder, 0x300F), Some(vec![0xEC, 0xFF]));
    assert_eq!(last_write(&recorder, 0x300B), Some(vec![0x11]));
}

#[test]
fn start_aborts_at_the_first_failure() {
    let (device, recorder, _) = open();
    recorder.fail_writes_to(0x3004);
    assert_eq!(
        device.start().err(),
        Some(Error::Io {
            address: 0x3004,
            source: bus::Error::Nack
        })
    );
    assert_eq!(device.stream_state(), StreamState::Standby);
    assert_eq!(recorder.written_addresses().last(), Some(&0x3107));

    recorder.heal();
    recorder.clear();
    assert_eq!(device.start().unwrap(), Transition::Done);
    assert_eq!(device.stream_state(), StreamState::Active);
}

#[test]
fn redundant_transitions() {
    let (device, _, _) = open();
    assert_eq!(device.stop().unwrap(), Transition::AlreadyInState);
    assert_eq!(device.start().unwrap(), Transition::Done);
    assert_eq!(device.start().unwrap(), Transition::AlreadyInState);
    assert_eq!(device.stop().unwrap(), Transition::Done);
    assert_eq!(device.stop().unwrap(), Transition::AlreadyInState);
}

#[test]
fn flips_are_rejected_while_streaming() {
    let (device, recorder, _) = open();
    device.start().unwrap();
    recorder.clear();
    assert!(matches!(
        device.set_control(Control::VerticalFlip, 1),
        Err(Error::Busy(_))
    ));
    assert!(matches!(
        device.set_control(Control::HorizontalFlip, 1),
        Err(Error::Busy(_))
    ));
    assert_eq!(device.control(Control::VerticalFlip), 0);
    assert!(recorder.writes().is_empty());
    assert!(matches!(
        device.set_format(PixelCode::Srggb12, 1856, 1220),
        Err(Error::Busy(_))
    ));

    device.stop().unwrap();
    device.set_control(Control::HorizontalFlip, 1).unwrap();
    assert_eq!(device.format().code, PixelCode::Sgrbg12);
}

#[test]
fn stop_reaches_standby_even_when_the_write_fails() {
    let (device, recorder, _) = open();
    device.start().unwrap();
    recorder.fail_writes_to(0x3000);
    assert_eq!(
        device.stop().err(),
        Some(Error::Io {
            address: 0x3000,
            source: bus::Error::Nack
        })
    );
    assert_eq!(device.stream_state(), StreamState::Standby);
    assert!(device.set_control(Control::HorizontalFlip, 1).is_ok());
}

#[test]
fn read_only_controls() {
    let (device, _, _) = open();
    assert!(matches!(
        device.set_control(Control::PixelRate, 1),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_control(Control::LinkFrequency, 360_000_000),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_patterns() {
    let (device, recorder, _) = open();
    device.power_on().unwrap();
    assert!(matches!(
        device.set_control(Control::TestPattern, 7),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(device.control(Control::TestPattern), 0);
    assert!(recorder.writes().is_empty());

    device.set_control(Control::TestPattern, 6).unwrap();
    assert_eq!(
        recorder.writes(),
        vec![(0x3157, vec![0x0B]), (0x3156, vec![0x11])]
    );
    recorder.clear();
    device.set_control(Control::TestPattern, 0).unwrap();
    assert_eq!(recorder.writes(), vec![(0x3156, vec![0x00])]);
}

#[test]
fn pad_description() {
    let (device, _, _) = open();
    assert_eq!(device.enumerate_codes(0).unwrap(), PixelCode::Srggb12);
    assert_eq!(device.enumerate_codes(1).unwrap(), PixelCode::Srggb10);
    assert!(device.enumerate_codes(2).is_err());
    assert_eq!(
        device.enumerate_frame_sizes(PixelCode::Srggb12, 2).unwrap(),
        (1856, 1220)
    );
    assert!(device.enumerate_frame_sizes(PixelCode::Srggb12, 3).is_err());
    assert!(device.enumerate_frame_sizes(PixelCode::Sbggr12, 0).is_err());

    device.set_control(Control::HorizontalFlip, 1).unwrap();
    assert_eq!(device.enumerate_codes(0).unwrap(), PixelCode::Sgrbg12);
    assert!(device.enumerate_frame_sizes(PixelCode::Srggb12, 0).is_err());

    assert_eq!(
        device.selection(Selection::Crop),
        Rect::new(108, 40, 5472, 3648)
    );
    assert_eq!(
        device.selection(Selection::NativeSize),
        Rect::new(0, 0, 5592, 3710)
    );
    assert_eq!(
        device.selection(Selection::CropBounds),
        Rect::new(108, 40, 5472, 3648)
    );
    let metadata = device.metadata_format();
    assert_eq!(metadata.code, PixelCode::SensorData);
    assert_eq!((metadata.width, metadata.height), (16384, 1));
}

#[test]
fn configuration_is_applied_at_open_and_on_update() {
    let configuration = sony_imx283::Configuration {
        analog_gain: 100,
        vertical_blanking: Some(1000),
        ..sony_imx283::PROPERTIES.default_configuration
    };
    let (device, recorder, _) =
        open_with(Some(Configuration::SonyImx283(configuration.clone()))).unwrap();
    assert_eq!(device.control(Control::AnalogGain), 100);
    assert_eq!(device.control(Control::VerticalBlanking), 1000);

    device.start().unwrap();
    assert!(matches!(
        device.update_configuration(Configuration::SonyImx283(sony_imx283::Configuration {
            vertical_flip: true,
            ..configuration.clone()
        })),
        Err(Error::Busy(_))
    ));
    recorder.clear();
    device
        .update_configuration(Configuration::SonyImx283(sony_imx283::Configuration {
            digital_gain: 3,
            ..configuration.clone()
        }))
        .unwrap();
    assert_eq!(recorder.writes(), vec![(0x3044, vec![0x03])]);

    device
        .update_configuration(Configuration::SonyImx283(sony_imx283::Configuration {
            digital_gain: 3,
            vertical_blanking: None,
            ..configuration
        }))
        .unwrap();
    assert_eq!(device.control(Control::VerticalBlanking), 336);
}

#[test]
fn configuration_serialization() {
    let configuration =
        Configuration::SonyImx283(sony_imx283::PROPERTIES.default_configuration);
    let bytes = configuration.serialize_bincode().unwrap();
    assert_eq!(
        Configuration::deserialize_bincode(Type::SonyImx283, &bytes).unwrap(),
        configuration
    );
    assert_eq!(configuration.type_name(), "Sony IMX283");
    assert_eq!("sony_imx283".parse::<Type>(), Ok(Type::SonyImx283));
    assert!("sony_imx219".parse::<Type>().is_err());
    assert_eq!(Type::SonyImx283.to_string(), "sony_imx283");
}

#[test]
fn suspend_and_resume() {
    let (device, recorder, supply) = open();
    device.start().unwrap();
    recorder.clear();
    device.suspend().unwrap();
    assert_eq!(recorder.writes(), vec![(0x3000, vec![0x01])]);
    assert!(!supply.is_powered());
    assert_eq!(device.stream_state(), StreamState::Active);

    recorder.clear();
    device.resume().unwrap();
    assert!(supply.is_powered());
    assert_eq!(last_write(&recorder, 0x3004), Some(vec![0x04]));

    device.suspend().unwrap();
    recorder.fail_writes_to(0x3004);
    assert!(device.resume().is_err());
    assert_eq!(device.stream_state(), StreamState::Standby);
}

#[test]
fn drop_stops_streaming_and_powers_off() {
    let (device, recorder, supply) = open();
    device.start().unwrap();
    recorder.clear();
    drop(device);
    assert_eq!(recorder.writes(), vec![(0x3000, vec![0x01])]);
    assert!(!supply.is_powered());
}

#[test]
fn power_failures_are_reported() {
    let (device, _, supply) = open();
    supply.fail_power_on(true);
    assert!(matches!(device.start(), Err(Error::Power(_))));
    assert_eq!(device.stream_state(), StreamState::Standby);
    assert!(!device.is_powered());
}
