use std::sync::Arc;

use super::catalog::DeviceCatalog;
use super::channel::ControlClient;
use super::config::Config;
use super::detector_profile::DetectorProfiles;
use super::device::CompositeDevice;
use super::dispatcher::WorkflowDispatcher;
use super::error::InstrumentError;
use super::exporter::MetadataExporter;
use super::registers::Registers;
use super::sequencer::AcquisitionSequencer;

/// Instrument holds everything an acquisition needs: the catalog, the register block,
/// the acquisition detector and the DM dispatcher.
///
/// It is built once from a Config and passed explicitly to the processing functions.
pub struct Instrument {
    config: Config,
    catalog: DeviceCatalog,
    client: Arc<dyn ControlClient>,
    registers: Registers,
    detector: AcquisitionSequencer,
    dispatcher: WorkflowDispatcher,
}

impl Instrument {
    /// Build the devices through the client and wait for them to connect
    pub fn connect(config: Config, client: Arc<dyn ControlClient>) -> Result<Self, InstrumentError> {
        let catalog = DeviceCatalog::new(config.catalog_path.as_deref())?;
        let timeout = config.connect_timeout();

        if catalog.device(&config.register_device).is_none() {
            return Err(InstrumentError::MissingDevice(config.register_device.clone()));
        }
        let register_device = catalog.build(&config.register_device, client.as_ref())?;
        register_device.wait_for_connection(timeout)?;
        let registers = Registers::new(register_device);

        let detector_spec = catalog
            .device(&config.detector_device)
            .ok_or_else(|| InstrumentError::MissingDevice(config.detector_device.clone()))?;
        let trigger = detector_spec
            .trigger
            .clone()
            .ok_or_else(|| InstrumentError::NoTrigger(config.detector_device.clone()))?;
        let file_plugin = detector_spec.file_plugin.clone();
        let detector = AcquisitionSequencer::new(
            catalog.build(&config.detector_device, client.as_ref())?,
            trigger,
            file_plugin,
            timeout,
        )?;

        let profiles = DetectorProfiles::new(config.detector_profiles_path.as_deref())?;
        let exporter = MetadataExporter::new(config.mount_remap.clone(), profiles);
        let dispatcher = WorkflowDispatcher::new(&config, exporter, Some(&registers))?;

        spdlog::info!(
            "Instrument ready with registers {} and detector {}",
            config.register_device,
            config.detector_device
        );
        Ok(Self {
            config,
            catalog,
            client,
            registers,
            detector,
            dispatcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn detector(&self) -> &AcquisitionSequencer {
        &self.detector
    }

    pub fn dispatcher(&self) -> &WorkflowDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut WorkflowDispatcher {
        &mut self.dispatcher
    }

    /// Build any other catalog device and wait for it to connect
    pub fn device(&self, name: &str) -> Result<CompositeDevice, InstrumentError> {
        let device = self.catalog.build(name, self.client.as_ref())?;
        device.wait_for_connection(self.config.connect_timeout())?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftClient;

    #[test]
    fn test_connect_soft_instrument() {
        let client = Arc::new(SoftClient::new());
        let instrument = Instrument::connect(Config::default(), client).unwrap();
        assert_eq!(instrument.detector().device().name(), "lambdadet");
        assert!(instrument.registers().number("det_num").is_ok());
        assert!(instrument.device("lakeshore").is_ok());
    }

    #[test]
    fn test_change_qmap_file() {
        let client = Arc::new(SoftClient::new());
        let config = Config {
            aps_cycle: Some(String::from("2019-2")),
            ..Default::default()
        };
        let mut instrument = Instrument::connect(config, client).unwrap();
        instrument.dispatcher_mut().set_xpcs_qmap_file("rigaku_qmap");
        assert_eq!(
            instrument.dispatcher().default_qmap_path(),
            std::path::PathBuf::from("/home/8-id-i/partitionMapLibrary/2019-2/rigaku_qmap.h5")
        );
    }

    #[test]
    fn test_detector_needs_trigger() {
        let client = Arc::new(SoftClient::new());
        let config = Config {
            detector_device: String::from("scaler1"),
            ..Default::default()
        };
        assert!(matches!(
            Instrument::connect(config, client),
            Err(InstrumentError::NoTrigger(_))
        ));
    }

    #[test]
    fn test_missing_register_device() {
        let client = Arc::new(SoftClient::new());
        let config = Config {
            register_device: String::from("registers"),
            ..Default::default()
        };
        assert!(matches!(
            Instrument::connect(config, client),
            Err(InstrumentError::MissingDevice(_))
        ));
    }
}
