use std::fs;
use std::path::PathBuf;

use log::{info, warn};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::data::{DataType, MtpData};
use crate::datasets::DeviceInfo;
use crate::properties::{
    DevPropDesc, DevicePropCode, FormData, PROP_GET, PROP_GET_SET,
};
use crate::response::StandardResponseCode;
use crate::Error;

/// Battery level reporting granularity; changes smaller than this do
/// not produce DevicePropChanged events.
pub const BATTERY_STEP: u8 = 10;

const MTP_STANDARD_VERSION: u16 = 100;
const MTP_VENDOR_EXTENSION_ID: u32 = 0x0000_0006;
const MTP_VENDOR_EXTENSION_VERSION: u16 = 100;
const MTP_VENDOR_EXTENSION_DESC: &str = "microsoft.com: 1.0;";

/// Operations the responder actually dispatches.
pub const SUPPORTED_OPERATIONS: &[u16] = &[
    0x1001, 0x1002, 0x1003, 0x1004, 0x1005, 0x1006, 0x1007, 0x1008, 0x1009, 0x100A, 0x100B,
    0x100C, 0x100D, 0x1014, 0x1015, 0x1016, 0x1017, 0x1019, 0x101A, 0x101B, 0x9801, 0x9802,
    0x9803, 0x9804, 0x9805, 0x9806, 0x9807, 0x9808, 0x9810, 0x9811,
];

pub const SUPPORTED_EVENTS: &[u16] = &[
    0x4002, 0x4003, 0x4004, 0x4005, 0x4006, 0x4007, 0x400A, 0x400C, 0xC801, 0xC803,
];

pub const SUPPORTED_DEVICE_PROPERTIES: &[u16] = &[0x5001, 0xD401, 0xD402];

pub const SUPPORTED_PLAYBACK_FORMATS: &[u16] = &[
    0x3000, 0x3001, 0x3004, 0x3005, 0x3008, 0x3009, 0x300A, 0x300B, 0x3801, 0x3804, 0x3807,
    0x380B, 0x380D, 0xB901, 0xB902, 0xB903, 0xB906, 0xB981, 0xB982, 0xBA05, 0xBA11,
];

/// Source of platform identity values. The real implementations live
/// outside this crate (systemsettings, battery service); tests and
/// standalone use fall back to [`StaticPlatform`].
pub trait PlatformProbe: Send {
    fn manufacturer(&self) -> Option<String> {
        None
    }
    fn model(&self) -> Option<String> {
        None
    }
    fn serial_number(&self) -> Option<String> {
        None
    }
    fn os_version(&self) -> Option<String> {
        None
    }
    fn battery_level(&self) -> Option<u8> {
        None
    }
}

/// A probe with fixed answers.
#[derive(Debug, Default, Clone)]
pub struct StaticPlatform {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub os_version: Option<String>,
    pub battery_level: Option<u8>,
}

impl PlatformProbe for StaticPlatform {
    fn manufacturer(&self) -> Option<String> {
        self.manufacturer.clone()
    }
    fn model(&self) -> Option<String> {
        self.model.clone()
    }
    fn serial_number(&self) -> Option<String> {
        self.serial_number.clone()
    }
    fn os_version(&self) -> Option<String> {
        self.os_version.clone()
    }
    fn battery_level(&self) -> Option<u8> {
        self.battery_level
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "deviceinfo", default)]
struct DeviceConfigXml {
    manufacturer: Option<String>,
    model: Option<String>,
    deviceversion: Option<String>,
    serialnumber: Option<String>,
    friendlyname: Option<String>,
    syncpartner: Option<String>,
    vendorextension: Option<String>,
    operations: Option<CodeList>,
    events: Option<CodeList>,
    deviceproperties: Option<CodeList>,
    formats: Option<CodeList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CodeList {
    #[serde(rename = "code", default)]
    codes: Vec<String>,
}

fn parse_codes(list: &Option<CodeList>, fallback: &[u16]) -> Vec<u16> {
    let list = match list {
        Some(list) if !list.codes.is_empty() => list,
        _ => return fallback.to_vec(),
    };
    let mut out = Vec::with_capacity(list.codes.len());
    for code in &list.codes {
        let digits = code.trim().trim_start_matches("0x");
        match u16::from_str_radix(digits, 16) {
            Ok(value) => out.push(value),
            Err(_) => warn!("ignoring unparsable code {:?} in device config", code),
        }
    }
    out
}

/// Provides the DeviceInfo dataset and the device properties, backed by
/// an XML configuration file that is rewritten in full whenever a
/// mutable property changes.
pub struct DeviceInfoProvider {
    config_path: Option<PathBuf>,
    manufacturer: String,
    model: String,
    device_version: String,
    serial_number: String,
    friendly_name: String,
    friendly_name_default: String,
    sync_partner: String,
    vendor_extension_desc: String,
    operations: Vec<u16>,
    events: Vec<u16>,
    device_properties: Vec<u16>,
    formats: Vec<u16>,
    battery_level: u8,
    reported_battery_level: u8,
}

impl DeviceInfoProvider {
    /// Loads the configuration file, creating it with defaults when
    /// missing. On first creation the platform model overrides the
    /// friendly name and the platform serial is adopted, as the
    /// shipped configuration carries placeholders.
    pub fn new(config_path: Option<PathBuf>, platform: &dyn PlatformProbe) -> DeviceInfoProvider {
        let (config, newly_created) = match &config_path {
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => match quick_xml::de::from_str::<DeviceConfigXml>(&text) {
                    Ok(config) => (config, false),
                    Err(err) => {
                        warn!("device config {} unparsable: {}", path.display(), err);
                        (DeviceConfigXml::default(), true)
                    }
                },
                Err(_) => (DeviceConfigXml::default(), true),
            },
            None => (DeviceConfigXml::default(), true),
        };

        let manufacturer = platform
            .manufacturer()
            .or(config.manufacturer)
            .unwrap_or_else(|| "Unknown".to_owned());
        let model = platform
            .model()
            .or(config.model)
            .unwrap_or_else(|| "MTP Device".to_owned());
        let device_version = platform
            .os_version()
            .or(config.deviceversion)
            .unwrap_or_else(|| "1.0".to_owned());
        let serial_number = platform
            .serial_number()
            .or(config.serialnumber)
            .unwrap_or_default();

        let friendly_name = match (&config.friendlyname, newly_created) {
            (Some(name), false) => name.clone(),
            _ => model.clone(),
        };
        if newly_created {
            info!("setting MTP friendly name to: {}", model);
        }

        let battery = platform.battery_level().unwrap_or(100).min(100);

        let mut provider = DeviceInfoProvider {
            config_path,
            manufacturer,
            device_version,
            serial_number,
            friendly_name_default: model.clone(),
            friendly_name,
            model,
            sync_partner: config.syncpartner.unwrap_or_default(),
            vendor_extension_desc: config
                .vendorextension
                .unwrap_or_else(|| MTP_VENDOR_EXTENSION_DESC.to_owned()),
            operations: parse_codes(&config.operations, SUPPORTED_OPERATIONS),
            events: parse_codes(&config.events, SUPPORTED_EVENTS),
            device_properties: parse_codes(&config.deviceproperties, SUPPORTED_DEVICE_PROPERTIES),
            formats: parse_codes(&config.formats, SUPPORTED_PLAYBACK_FORMATS),
            battery_level: battery,
            reported_battery_level: battery,
        };
        if newly_created {
            provider.persist();
        }
        provider
    }

    fn persist(&self) {
        let path = match &self.config_path {
            Some(path) => path,
            None => return,
        };
        let config = DeviceConfigXml {
            manufacturer: Some(self.manufacturer.clone()),
            model: Some(self.model.clone()),
            deviceversion: Some(self.device_version.clone()),
            serialnumber: Some(self.serial_number.clone()),
            friendlyname: Some(self.friendly_name.clone()),
            syncpartner: Some(self.sync_partner.clone()),
            vendorextension: Some(self.vendor_extension_desc.clone()),
            operations: None,
            events: None,
            deviceproperties: None,
            formats: None,
        };
        match quick_xml::se::to_string(&config) {
            Ok(xml) => {
                if let Err(err) = fs::write(path, xml) {
                    warn!("could not persist device config {}: {}", path.display(), err);
                }
            }
            Err(err) => warn!("could not serialize device config: {}", err),
        }
    }

    pub fn operation_supported(&self, code: u16) -> bool {
        self.operations.contains(&code)
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn sync_partner(&self) -> &str {
        &self.sync_partner
    }

    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    /// Updates the battery level. Returns true when the change crosses
    /// the reporting step and a DevicePropChanged should go out.
    pub fn set_battery_level(&mut self, level: u8) -> bool {
        let level = level.min(100);
        self.battery_level = level;
        let delta = if level > self.reported_battery_level {
            level - self.reported_battery_level
        } else {
            self.reported_battery_level - level
        };
        if delta >= BATTERY_STEP {
            self.reported_battery_level = level;
            true
        } else {
            false
        }
    }

    /// The DeviceInfo dataset as sent to the initiator.
    pub fn dataset(&self) -> DeviceInfo {
        DeviceInfo {
            standard_version: MTP_STANDARD_VERSION,
            vendor_extension_id: MTP_VENDOR_EXTENSION_ID,
            vendor_extension_version: MTP_VENDOR_EXTENSION_VERSION,
            vendor_extension_desc: self.vendor_extension_desc.clone(),
            functional_mode: 0,
            operations_supported: self.operations.clone(),
            events_supported: self.events.clone(),
            device_properties_supported: self.device_properties.clone(),
            capture_formats: vec![],
            playback_formats: self.formats.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            device_version: self.device_version.clone(),
            serial_number: self.serial_number.clone(),
        }
    }

    fn supported_prop(&self, code: u16) -> Result<DevicePropCode, Error> {
        let prop = DevicePropCode::from_u16(code)
            .filter(|_| self.device_properties.contains(&code))
            .ok_or(StandardResponseCode::DevicePropNotSupported)?;
        Ok(prop)
    }

    /// The DevicePropDesc dataset for a property.
    pub fn prop_desc(&self, code: u16) -> Result<DevPropDesc, Error> {
        let desc = match self.supported_prop(code)? {
            DevicePropCode::BatteryLevel => DevPropDesc {
                prop_code: DevicePropCode::BatteryLevel,
                data_type: DataType::Uint8,
                get_set: PROP_GET,
                factory_default: MtpData::Uint8(0),
                current: MtpData::Uint8(self.battery_level),
                form: FormData::Range {
                    min_value: MtpData::Uint8(0),
                    max_value: MtpData::Uint8(100),
                    step: MtpData::Uint8(BATTERY_STEP),
                },
            },
            DevicePropCode::DeviceFriendlyName => DevPropDesc {
                prop_code: DevicePropCode::DeviceFriendlyName,
                data_type: DataType::Str,
                get_set: PROP_GET_SET,
                factory_default: MtpData::Str(self.friendly_name_default.clone()),
                current: MtpData::Str(self.friendly_name.clone()),
                form: FormData::None,
            },
            DevicePropCode::SynchronizationPartner => DevPropDesc {
                prop_code: DevicePropCode::SynchronizationPartner,
                data_type: DataType::Str,
                get_set: PROP_GET_SET,
                factory_default: MtpData::Str(String::new()),
                current: MtpData::Str(self.sync_partner.clone()),
                form: FormData::None,
            },
            _ => return Err(StandardResponseCode::DevicePropNotSupported.into()),
        };
        Ok(desc)
    }

    pub fn prop_value(&self, code: u16) -> Result<MtpData, Error> {
        Ok(self.prop_desc(code)?.current)
    }

    /// Sets a mutable device property and persists the configuration.
    pub fn set_prop_value(&mut self, code: u16, value: MtpData) -> Result<(), Error> {
        match self.supported_prop(code)? {
            DevicePropCode::DeviceFriendlyName => match value {
                MtpData::Str(name) => {
                    self.friendly_name = name;
                    self.persist();
                    Ok(())
                }
                _ => Err(StandardResponseCode::InvalidDevicePropFormat.into()),
            },
            DevicePropCode::SynchronizationPartner => match value {
                MtpData::Str(partner) => {
                    self.sync_partner = partner;
                    self.persist();
                    Ok(())
                }
                _ => Err(StandardResponseCode::InvalidDevicePropFormat.into()),
            },
            _ => Err(StandardResponseCode::AccessDenied.into()),
        }
    }

    /// Resets a mutable device property to its factory default.
    pub fn reset_prop_value(&mut self, code: u16) -> Result<(), Error> {
        match self.supported_prop(code)? {
            DevicePropCode::DeviceFriendlyName => {
                self.friendly_name = self.friendly_name_default.clone();
                self.persist();
                Ok(())
            }
            DevicePropCode::SynchronizationPartner => {
                self.sync_partner.clear();
                self.persist();
                Ok(())
            }
            _ => Err(StandardResponseCode::AccessDenied.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DeviceInfoProvider {
        let platform = StaticPlatform {
            model: Some("Widget".into()),
            serial_number: Some("SN123".into()),
            battery_level: Some(80),
            ..StaticPlatform::default()
        };
        DeviceInfoProvider::new(None, &platform)
    }

    #[test]
    fn first_run_takes_model_as_friendly_name() {
        let p = provider();
        assert_eq!(p.friendly_name(), "Widget");
        assert_eq!(p.dataset().serial_number, "SN123");
    }

    #[test]
    fn battery_desc_is_a_range_form() {
        let p = provider();
        let desc = p.prop_desc(0x5001).unwrap();
        match desc.form {
            FormData::Range {
                min_value,
                max_value,
                step,
            } => {
                assert_eq!(min_value, MtpData::Uint8(0));
                assert_eq!(max_value, MtpData::Uint8(100));
                assert_eq!(step, MtpData::Uint8(BATTERY_STEP));
            }
            other => panic!("unexpected form {:?}", other),
        }
        assert_eq!(desc.current, MtpData::Uint8(80));
    }

    #[test]
    fn battery_changes_report_only_on_step() {
        let mut p = provider();
        assert!(!p.set_battery_level(75));
        assert!(!p.set_battery_level(72));
        assert!(p.set_battery_level(69));
        assert!(!p.set_battery_level(65));
    }

    #[test]
    fn battery_is_not_settable() {
        let mut p = provider();
        match p.set_prop_value(0x5001, MtpData::Uint8(50)) {
            Err(Error::Response(StandardResponseCode::AccessDenied)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn friendly_name_round_trips_and_resets() {
        let mut p = provider();
        p.set_prop_value(0xD402, MtpData::Str("My phone".into()))
            .unwrap();
        assert_eq!(p.prop_value(0xD402).unwrap(), MtpData::Str("My phone".into()));
        p.reset_prop_value(0xD402).unwrap();
        assert_eq!(p.friendly_name(), "Widget");
    }

    #[test]
    fn persists_config_as_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deviceinfo.xml");
        let platform = StaticPlatform {
            model: Some("Widget".into()),
            ..StaticPlatform::default()
        };
        {
            let mut p = DeviceInfoProvider::new(Some(path.clone()), &platform);
            p.set_prop_value(0xD402, MtpData::Str("Renamed".into()))
                .unwrap();
        }
        let p = DeviceInfoProvider::new(Some(path), &platform);
        assert_eq!(p.friendly_name(), "Renamed");
    }

    #[test]
    fn unknown_props_are_unsupported() {
        let p = provider();
        match p.prop_value(0xD4FF) {
            Err(Error::Response(StandardResponseCode::DevicePropNotSupported)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
