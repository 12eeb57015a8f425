use std::collections::BTreeMap;

use super::channel::{ChannelValue, ValueType};
use super::device::CompositeDevice;
use super::error::RegisterError;

/// Registers is the scratch-pad of named values shared with the control system.
///
/// The DM workflow reads its metadata from these registers; local code writes some
/// of them (run number, exposure settings, file names) before each export.
#[derive(Debug, Clone)]
pub struct Registers {
    device: CompositeDevice,
}

impl Registers {
    pub fn new(device: CompositeDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &CompositeDevice {
        &self.device
    }

    fn value(&self, name: &str) -> Result<ChannelValue, RegisterError> {
        if self.device.binding(name).is_none() {
            return Err(RegisterError::UnknownRegister(name.to_string()));
        }
        Ok(self.device.get(name)?)
    }

    pub fn number(&self, name: &str) -> Result<f64, RegisterError> {
        self.value(name)?
            .as_f64()
            .ok_or_else(|| RegisterError::WrongType {
                name: name.to_string(),
                expected: ValueType::Number,
            })
    }

    pub fn text(&self, name: &str) -> Result<String, RegisterError> {
        match self.value(name)? {
            ChannelValue::Text(s) => Ok(s),
            ChannelValue::Number(_) => Err(RegisterError::WrongType {
                name: name.to_string(),
                expected: ValueType::Text,
            }),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<ChannelValue>) -> Result<(), RegisterError> {
        let value = value.into();
        let binding = self
            .device
            .binding(name)
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))?;
        if binding.value_type != value.value_type() {
            return Err(RegisterError::WrongType {
                name: name.to_string(),
                expected: binding.value_type,
            });
        }
        Ok(self.device.put(name, value)?)
    }

    /// Read every register once and keep the values the exporter needs
    pub fn snapshot(&self) -> Result<MetadataSnapshot, RegisterError> {
        let values = SnapshotValues(self.device.read()?);
        Ok(MetadataSnapshot {
            hdf_metadata_version: values.number("hdf_metadata_version")?,
            dark_begin: values.number("dark_begin")?,
            dark_end: values.number("dark_end")?,
            data_begin: values.number("data_begin")?,
            data_end: values.number("data_end")?,
            specscan_dark_number: values.number("specscan_dark_number")?,
            specscan_data_number: values.number("specscan_data_number")?,
            attenuation: values.number("attenuation")?,
            beam_size_h: values.number("beam_size_h")?,
            beam_size_v: values.number("beam_size_v")?,
            specfile: values.text("specfile")?,
            root_folder: values.text("root_folder")?,
            data_subfolder: values.text("data_subfolder")?,
            user_data_folder: values.text("user_data_folder")?,
            data_folder: values.text("data_folder")?,
            datafilename: values.text("datafilename")?,
            beam_center_x: values.number("beam_center_x")?,
            beam_center_y: values.number("beam_center_y")?,
            stage_zero_x: values.number("stage_zero_x")?,
            stage_zero_z: values.number("stage_zero_z")?,
            stage_x: values.number("stage_x")?,
            stage_z: values.number("stage_z")?,
            compression: values.number("compression")?,
            geometry_num: values.number("geometry_num")?,
            xspec: values.number("xspec")?,
            zspec: values.number("zspec")?,
            ccdxspec: values.number("ccdxspec")?,
            ccdzspec: values.number("ccdzspec")?,
            angle: values.number("angle")?,
            source_begin_beam_intensity_incident: values
                .number("source_begin_beam_intensity_incident")?,
            source_begin_beam_intensity_transmitted: values
                .number("source_begin_beam_intensity_transmitted")?,
            source_begin_current: values.number("source_begin_current")?,
            source_begin_energy: values.number("source_begin_energy")?,
            source_begin_datetime: values.text("source_begin_datetime")?,
            source_end_current: values.number("source_end_current")?,
            source_end_datetime: values.text("source_end_datetime")?,
            temperature_a: values.number("temperature_a")?,
            temperature_b: values.number("temperature_b")?,
            temperature_a_set: values.number("temperature_a_set")?,
            temperature_b_set: values.number("temperature_b_set")?,
            translation: [
                values.number("translation_x")?,
                values.number("translation_y")?,
                values.number("translation_z")?,
            ],
            translation_table: [
                values.number("translation_table_x")?,
                values.number("translation_table_y")?,
                values.number("translation_table_z")?,
            ],
            orientation: [
                values.number("sample_pitch")?,
                values.number("sample_roll")?,
                values.number("sample_yaw")?,
            ],
            det_num: values.number("det_num")?,
            exposure_time: values.number("exposure_time")?,
            exposure_period: values.number("exposure_period")?,
            detector_distance: values.number("detector_distance")?,
            burst_mode_state: values.number("burst_mode_state")?,
            number_of_bursts: values.number("number_of_bursts")?,
            first_usable_burst: values.number("first_usable_burst")?,
            last_usable_burst: values.number("last_usable_burst")?,
            kinetics_state: values.number("kinetics_state")?,
            kinetics_top: values.number("kinetics_top")?,
            kinetics_window_size: values.number("kinetics_window_size")?,
            roi_x1: values.number("roi_x1")?,
            roi_y1: values.number("roi_y1")?,
            roi_x2: values.number("roi_x2")?,
            roi_y2: values.number("roi_y2")?,
        })
    }
}

struct SnapshotValues(BTreeMap<String, ChannelValue>);

impl SnapshotValues {
    fn get(&self, name: &str) -> Result<&ChannelValue, RegisterError> {
        self.0
            .get(name)
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))
    }

    fn number(&self, name: &str) -> Result<f64, RegisterError> {
        self.get(name)?
            .as_f64()
            .ok_or_else(|| RegisterError::WrongType {
                name: name.to_string(),
                expected: ValueType::Number,
            })
    }

    fn text(&self, name: &str) -> Result<String, RegisterError> {
        self.get(name)?
            .as_str()
            .map(String::from)
            .ok_or_else(|| RegisterError::WrongType {
                name: name.to_string(),
                expected: ValueType::Text,
            })
    }
}

/// Point-in-time copy of the registers written to a workflow file.
///
/// Both the file name and the file contents come from one snapshot, so they always
/// agree even if the registers change during the export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSnapshot {
    pub hdf_metadata_version: f64,
    pub dark_begin: f64,
    pub dark_end: f64,
    pub data_begin: f64,
    pub data_end: f64,
    pub specscan_dark_number: f64,
    pub specscan_data_number: f64,
    pub attenuation: f64,
    pub beam_size_h: f64,
    pub beam_size_v: f64,
    pub specfile: String,
    pub root_folder: String,
    pub data_subfolder: String,
    pub user_data_folder: String,
    pub data_folder: String,
    pub datafilename: String,
    pub beam_center_x: f64,
    pub beam_center_y: f64,
    pub stage_zero_x: f64,
    pub stage_zero_z: f64,
    pub stage_x: f64,
    pub stage_z: f64,
    pub compression: f64,
    /// 0 = transmission, 1 = reflection
    pub geometry_num: f64,
    pub xspec: f64,
    pub zspec: f64,
    pub ccdxspec: f64,
    pub ccdzspec: f64,
    pub angle: f64,
    pub source_begin_beam_intensity_incident: f64,
    pub source_begin_beam_intensity_transmitted: f64,
    pub source_begin_current: f64,
    pub source_begin_energy: f64,
    pub source_begin_datetime: String,
    pub source_end_current: f64,
    pub source_end_datetime: String,
    pub temperature_a: f64,
    pub temperature_b: f64,
    pub temperature_a_set: f64,
    pub temperature_b_set: f64,
    pub translation: [f64; 3],
    pub translation_table: [f64; 3],
    /// pitch, roll, yaw
    pub orientation: [f64; 3],
    pub det_num: f64,
    pub exposure_time: f64,
    pub exposure_period: f64,
    pub detector_distance: f64,
    pub burst_mode_state: f64,
    pub number_of_bursts: f64,
    pub first_usable_burst: f64,
    pub last_usable_burst: f64,
    pub kinetics_state: f64,
    pub kinetics_top: f64,
    pub kinetics_window_size: f64,
    pub roi_x1: f64,
    pub roi_y1: f64,
    pub roi_x2: f64,
    pub roi_y2: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;
    use crate::soft::SoftClient;

    fn registers(client: &SoftClient) -> Registers {
        let catalog = DeviceCatalog::new(None).unwrap();
        Registers::new(catalog.build("dm_pars", client).unwrap())
    }

    #[test]
    fn test_typed_access() {
        let client = SoftClient::new();
        let regs = registers(&client);
        regs.set("det_num", 25u32).unwrap();
        regs.set("root_folder", "/data/2019-2/").unwrap();
        assert_eq!(regs.number("det_num").unwrap(), 25.0);
        assert_eq!(regs.text("root_folder").unwrap(), "/data/2019-2/");
        assert!(matches!(
            regs.set("det_num", "25"),
            Err(RegisterError::WrongType { .. })
        ));
        assert!(matches!(
            regs.text("det_num"),
            Err(RegisterError::WrongType { .. })
        ));
        assert!(matches!(
            regs.number("no_such_register"),
            Err(RegisterError::UnknownRegister(_))
        ));
    }

    #[test]
    fn test_snapshot_copies_values() {
        let client = SoftClient::new();
        let regs = registers(&client);
        regs.set("data_folder", "exp1").unwrap();
        regs.set("data_begin", 1u32).unwrap();
        regs.set("data_end", 100u32).unwrap();
        regs.set("sample_roll", 0.5).unwrap();

        let snapshot = regs.snapshot().unwrap();
        regs.set("data_folder", "exp2").unwrap();

        assert_eq!(snapshot.data_folder, "exp1");
        assert_eq!(snapshot.data_end, 100.0);
        assert_eq!(snapshot.orientation, [0.0, 0.5, 0.0]);
    }
}
