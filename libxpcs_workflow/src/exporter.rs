use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, H5Type};
use ndarray::{arr0, arr2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::detector_profile::{DetectorProfile, DetectorProfiles};
use super::error::ExportError;
use super::registers::MetadataSnapshot;

const MEASUREMENT_NAME: &str = "measurement";
const INSTRUMENT_NAME: &str = "instrument";
const ACQUISITION_NAME: &str = "acquisition";
const SOURCE_BEGIN_NAME: &str = "source_begin";
const SOURCE_END_NAME: &str = "source_end";
const SAMPLE_NAME: &str = "sample";
const DETECTOR_NAME: &str = "detector";
const BURST_NAME: &str = "burst";
const KINETICS_NAME: &str = "kinetics";
const ROI_NAME: &str = "roi";

const WORKFLOW_EXTENSION: &str = "hdf";
/// Written for every geometry field of a transmission measurement
const TRANSMISSION_SENTINEL: f64 = -1.0;

// Structure
// hdf_metadata_version(dset)
// measurement
// |---- instrument
// |    |---- acquisition - timing, beam, stage and folder datasets, geometry fields
// |    |---- source_begin - beam intensities, current, energy, datetime
// |    |---- source_end - current, datetime
// |    |---- detector - hardware profile, exposure, modes
// |    |    |---- burst
// |    |    |---- kinetics
// |    |    |---- roi
// |---- sample - thickness, temperatures, translation, orientation

/// Rewrites a mount point in the register root folder into the path seen locally.
///
/// `from` matches whole path components only: `/data` remaps `/data/exp1` but not
/// `/database/exp1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountRemap {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl Default for MountRemap {
    fn default() -> Self {
        Self {
            from: PathBuf::from("/data"),
            to: PathBuf::from("/home/8-id-i"),
        }
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "ENABLED"
    } else {
        "DISABLED"
    }
}

/// Replace every character of the base name outside `[A-Za-z0-9_]` with `_`.
///
/// Directories and the extension are left alone.
pub fn clean_file_name(text: &str) -> String {
    let (dir, base) = match text.rfind('/') {
        Some(i) => text.split_at(i + 1),
        None => ("", text),
    };
    let (stem, ext) = match base.rfind('.') {
        Some(i) if i > 0 => base.split_at(i),
        _ => (base, ""),
    };
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let result = format!("{dir}{stem}{ext}");
    if result != text {
        spdlog::info!("Cleaned file name, was: '{text}' now: '{result}'");
    }
    result
}

/// Join the root and sub folder with exactly one trailing `/`
fn join_root_folder(root: &str, subfolder: &str) -> String {
    let joined = if subfolder.starts_with('/') {
        subfolder.to_string()
    } else if root.is_empty() || root.ends_with('/') {
        format!("{root}{subfolder}")
    } else {
        format!("{root}/{subfolder}")
    };
    format!("{}/", joined.trim_end_matches('/'))
}

/// The second-to-last component of the user data folder, or the folder itself
fn parent_folder(user_data_folder: &str) -> String {
    if user_data_folder.contains('/') {
        let parts: Vec<&str> = user_data_folder.split('/').collect();
        parts[parts.len() - 2].to_string()
    } else {
        user_data_folder.to_string()
    }
}

fn get_or_create_group(parent: &Group, name: &str) -> Result<Group, ExportError> {
    match parent.group(name) {
        Ok(group) => Ok(group),
        Err(_) => Ok(parent.create_group(name)?),
    }
}

/// Write a single value as a 1x1 dataset
fn write_value<T: H5Type + Clone>(group: &Group, name: &str, value: T) -> Result<(), ExportError> {
    group
        .new_dataset_builder()
        .with_data(&arr2(&[[value]]))
        .create(name)?;
    Ok(())
}

/// Write three values as a 1x3 dataset
fn write_triplet(group: &Group, name: &str, values: [f64; 3]) -> Result<(), ExportError> {
    group
        .new_dataset_builder()
        .with_data(&arr2(&[values]))
        .create(name)?;
    Ok(())
}

fn write_text(group: &Group, name: &str, value: &str) -> Result<(), ExportError> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|_| ExportError::InvalidString(value.to_string()))?;
    group
        .new_dataset_builder()
        .with_data(&arr0(value))
        .create(name)?;
    Ok(())
}

/// Registers hold counters as floating point values
fn as_count(value: f64) -> u64 {
    value.round().max(0.0) as u64
}

fn as_u32(value: f64) -> u32 {
    value.round().max(0.0) as u32
}

/// MetadataExporter turns a register snapshot into the HDF5 file read by the DM workflow.
///
/// The file layout is fixed; the analysis pipeline reads datasets by path.
#[derive(Debug, Clone)]
pub struct MetadataExporter {
    mount_remap: Vec<MountRemap>,
    profiles: DetectorProfiles,
}

impl MetadataExporter {
    pub fn new(mount_remap: Vec<MountRemap>, profiles: DetectorProfiles) -> Self {
        Self {
            mount_remap,
            profiles,
        }
    }

    /// Rewrite the root folder through the first matching mount remap
    fn remap_root(&self, root: &str) -> PathBuf {
        let root = Path::new(root);
        for remap in self.mount_remap.iter() {
            if let Ok(rest) = root.strip_prefix(&remap.from) {
                return remap.to.join(rest);
            }
        }
        root.to_path_buf()
    }

    /// Decide the absolute name of the workflow file for a snapshot.
    ///
    /// The name is `{root}/{data_folder}/{data_subfolder}/{data_folder}_{begin}-{end}.hdf`.
    /// If that file exists, `__001`, `__002`, ... is appended to the stem until the path
    /// is free.
    pub fn workflow_filename(&self, snapshot: &MetadataSnapshot) -> PathBuf {
        let data_folder = clean_file_name(snapshot.data_folder.trim_matches('/'));
        let directory = self
            .remap_root(&snapshot.root_folder)
            .join(&data_folder)
            .join(&snapshot.data_subfolder);
        let stem = format!(
            "{data_folder}_{:04.0}-{:04.0}",
            snapshot.data_begin, snapshot.data_end
        );

        let mut full_name = directory.join(format!("{stem}.{WORKFLOW_EXTENSION}"));
        let mut suffix: u32 = 0;
        while full_name.exists() {
            suffix += 1;
            full_name = directory.join(format!("{stem}__{suffix:03}.{WORKFLOW_EXTENSION}"));
        }
        if suffix > 0 {
            spdlog::info!("Using modified file name: {}", full_name.display());
        }
        full_name
    }

    fn profile(&self, snapshot: &MetadataSnapshot) -> Result<&DetectorProfile, ExportError> {
        let det_num = as_u32(snapshot.det_num);
        self.profiles
            .get(det_num)
            .ok_or(ExportError::UnknownDetector(det_num))
    }

    /// Write the snapshot to a new HDF5 file.
    ///
    /// Fails if the file already exists. Any failure part way leaves a partial file
    /// behind; removing it is up to the caller.
    pub fn create_hdf5_file(
        &self,
        path: &Path,
        snapshot: &MetadataSnapshot,
    ) -> Result<(), ExportError> {
        if path.exists() {
            return Err(ExportError::FileExists(path.to_path_buf()));
        }
        // Check everything that can be rejected before touching the disk
        let profile = self.profile(snapshot)?;
        let kinetics_enabled = snapshot.kinetics_state == 1.0;
        if kinetics_enabled && snapshot.kinetics_window_size == 0.0 {
            return Err(ExportError::InvalidRegister {
                name: String::from("kinetics_window_size"),
                reason: String::from("window size is zero while kinetics mode is enabled"),
            });
        }

        spdlog::info!("Creating HDF5 file {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create_excl(path)?;

        write_value(&file, "hdf_metadata_version", as_u32(snapshot.hdf_metadata_version))?;

        let measurement = get_or_create_group(&file, MEASUREMENT_NAME)?;
        let instrument = get_or_create_group(&measurement, INSTRUMENT_NAME)?;
        self.write_acquisition(&get_or_create_group(&instrument, ACQUISITION_NAME)?, snapshot)?;
        self.write_source(&instrument, snapshot)?;
        self.write_sample(&get_or_create_group(&measurement, SAMPLE_NAME)?, snapshot)?;
        self.write_detector(
            &get_or_create_group(&instrument, DETECTOR_NAME)?,
            snapshot,
            profile,
        )?;

        file.flush()?;
        let size = path.metadata()?.len();
        spdlog::info!(
            "Wrote {} of metadata to {}",
            human_bytes::human_bytes(size as f64),
            path.display()
        );
        Ok(())
    }

    fn write_acquisition(
        &self,
        acquisition: &Group,
        snapshot: &MetadataSnapshot,
    ) -> Result<(), ExportError> {
        write_value(acquisition, "dark_begin", as_count(snapshot.dark_begin))?;
        write_value(acquisition, "dark_end", as_count(snapshot.dark_end))?;
        write_value(acquisition, "data_begin", as_count(snapshot.data_begin))?;
        write_value(acquisition, "data_end", as_count(snapshot.data_end))?;
        write_value(
            acquisition,
            "specscan_dark_number",
            as_count(snapshot.specscan_dark_number),
        )?;
        write_value(
            acquisition,
            "specscan_data_number",
            as_count(snapshot.specscan_data_number),
        )?;
        write_value(acquisition, "attenuation", snapshot.attenuation)?;
        write_value(acquisition, "beam_size_H", snapshot.beam_size_h)?;
        write_value(acquisition, "beam_size_V", snapshot.beam_size_v)?;

        write_text(acquisition, "specfile", &snapshot.specfile)?;
        write_text(
            acquisition,
            "root_folder",
            &join_root_folder(&snapshot.root_folder, &snapshot.data_subfolder),
        )?;
        write_text(
            acquisition,
            "parent_folder",
            &parent_folder(&snapshot.user_data_folder),
        )?;
        write_text(acquisition, "data_folder", &snapshot.data_folder)?;
        write_text(acquisition, "datafilename", &snapshot.datafilename)?;

        write_value(acquisition, "beam_center_x", snapshot.beam_center_x)?;
        write_value(acquisition, "beam_center_y", snapshot.beam_center_y)?;
        write_value(acquisition, "stage_zero_x", snapshot.stage_zero_x)?;
        write_value(acquisition, "stage_zero_z", snapshot.stage_zero_z)?;
        write_value(acquisition, "stage_x", snapshot.stage_x)?;
        write_value(acquisition, "stage_z", snapshot.stage_z)?;
        write_text(
            acquisition,
            "compression",
            enabled(snapshot.compression == 1.0),
        )?;

        let geometry = if snapshot.geometry_num == 1.0 {
            Some([
                snapshot.xspec,
                snapshot.zspec,
                snapshot.ccdxspec,
                snapshot.ccdzspec,
                snapshot.angle,
            ])
        } else if snapshot.geometry_num == 0.0 {
            Some([TRANSMISSION_SENTINEL; 5])
        } else {
            spdlog::warn!(
                "Unknown geometry {}, geometry fields will not be written",
                snapshot.geometry_num
            );
            None
        };
        if let Some(values) = geometry {
            for (name, value) in ["xspec", "zspec", "ccdxspec", "ccdzspec", "angle"]
                .iter()
                .zip(values)
            {
                write_value(acquisition, name, value)?;
            }
        }
        Ok(())
    }

    fn write_source(
        &self,
        instrument: &Group,
        snapshot: &MetadataSnapshot,
    ) -> Result<(), ExportError> {
        let begin = get_or_create_group(instrument, SOURCE_BEGIN_NAME)?;
        write_value(
            &begin,
            "beam_intensity_incident",
            snapshot.source_begin_beam_intensity_incident,
        )?;
        write_value(
            &begin,
            "beam_intensity_transmitted",
            snapshot.source_begin_beam_intensity_transmitted,
        )?;
        write_value(&begin, "current", snapshot.source_begin_current)?;
        write_value(&begin, "energy", snapshot.source_begin_energy)?;
        write_text(&begin, "datetime", &snapshot.source_begin_datetime)?;

        let end = get_or_create_group(instrument, SOURCE_END_NAME)?;
        write_value(&end, "current", snapshot.source_end_current)?;
        write_text(&end, "datetime", &snapshot.source_end_datetime)?;
        Ok(())
    }

    fn write_sample(&self, sample: &Group, snapshot: &MetadataSnapshot) -> Result<(), ExportError> {
        write_value(sample, "thickness", 1.0_f64)?;
        write_value(sample, "temperature_A", snapshot.temperature_a)?;
        write_value(sample, "temperature_B", snapshot.temperature_b)?;
        write_value(sample, "temperature_A_set", snapshot.temperature_a_set)?;
        write_value(sample, "temperature_B_set", snapshot.temperature_b_set)?;
        write_triplet(sample, "translation", snapshot.translation)?;
        write_triplet(sample, "translation_table", snapshot.translation_table)?;
        write_triplet(sample, "orientation", snapshot.orientation)?;
        Ok(())
    }

    fn write_detector(
        &self,
        detector: &Group,
        snapshot: &MetadataSnapshot,
        profile: &DetectorProfile,
    ) -> Result<(), ExportError> {
        write_text(detector, "manufacturer", &profile.manufacturer)?;
        write_value(detector, "bit_depth", profile.bit_depth())?;
        write_value(detector, "x_pixel_size", profile.dpix)?;
        write_value(detector, "y_pixel_size", profile.dpix)?;
        write_value(detector, "x_dimension", profile.col_size)?;
        write_value(detector, "y_dimension", profile.row_size)?;
        write_value(detector, "x_binning", 1_u32)?;
        write_value(detector, "y_binning", 1_u32)?;
        write_value(detector, "exposure_time", snapshot.exposure_time)?;
        write_value(detector, "exposure_period", snapshot.exposure_period)?;

        let burst_enabled = snapshot.burst_mode_state == 1.0;
        let burst = get_or_create_group(detector, BURST_NAME)?;
        let (bursts, first_burst, last_burst) = if burst_enabled {
            (
                as_u32(snapshot.number_of_bursts),
                as_u32(snapshot.first_usable_burst),
                as_u32(snapshot.last_usable_burst),
            )
        } else {
            (0, 0, 0)
        };
        write_value(&burst, "number_of_bursts", bursts)?;
        write_value(&burst, "first_usable_burst", first_burst)?;
        write_value(&burst, "last_usable_burst", last_burst)?;

        write_value(detector, "distance", snapshot.detector_distance)?;
        write_text(detector, "flatfield_enabled", enabled(profile.flatfield == 1))?;
        write_text(detector, "blemish_enabled", enabled(profile.blemish == 1))?;
        write_value(detector, "efficiency", profile.efficiency)?;
        write_value(detector, "adu_per_photon", profile.adu_per_photon)?;
        let lld = if profile.lld < 0.0 { profile.lld.abs() } else { 0.0 };
        write_value(detector, "lld", lld)?;
        let sigma = if profile.lld > 0.0 { profile.lld } else { 0.0 };
        write_value(detector, "sigma", sigma)?;
        write_value(detector, "gain", 1_u32)?;

        let geometry = if snapshot.geometry_num == 0.0 {
            "TRANSMISSION"
        } else if snapshot.geometry_num == 1.0 {
            "REFLECTION"
        } else {
            "UNKNOWN"
        };
        write_text(detector, "geometry", geometry)?;
        let kinetics_enabled = snapshot.kinetics_state == 1.0;
        write_text(detector, "kinetics_enabled", enabled(kinetics_enabled))?;
        write_text(detector, "burst_enabled", enabled(burst_enabled))?;

        let kinetics = get_or_create_group(detector, KINETICS_NAME)?;
        let (first_window, last_window, top, window_size) = if kinetics_enabled {
            let windows = (snapshot.kinetics_top / snapshot.kinetics_window_size).floor();
            (
                2,
                as_u32(windows).saturating_sub(1),
                as_u32(snapshot.kinetics_top),
                as_u32(snapshot.kinetics_window_size),
            )
        } else {
            (0, 0, 0, 0)
        };
        write_value(&kinetics, "first_usable_window", first_window)?;
        write_value(&kinetics, "last_usable_window", last_window)?;
        write_value(&kinetics, "top", top)?;
        write_value(&kinetics, "window_size", window_size)?;

        let roi = get_or_create_group(detector, ROI_NAME)?;
        write_value(&roi, "x1", as_u32(snapshot.roi_x1))?;
        write_value(&roi, "y1", as_u32(snapshot.roi_y1))?;
        write_value(&roi, "x2", as_u32(snapshot.roi_x2))?;
        write_value(&roi, "y2", as_u32(snapshot.roi_y2))?;
        Ok(())
    }

    /// Pick a free file name for the snapshot and write it
    pub fn export(&self, snapshot: &MetadataSnapshot) -> Result<PathBuf, ExportError> {
        let path = self.workflow_filename(snapshot);
        self.create_hdf5_file(&path, snapshot)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter() -> MetadataExporter {
        MetadataExporter::new(
            vec![MountRemap::default()],
            DetectorProfiles::new(None).unwrap(),
        )
    }

    fn snapshot(root: &str) -> MetadataSnapshot {
        MetadataSnapshot {
            hdf_metadata_version: 15.0,
            root_folder: root.to_string(),
            data_folder: String::from("run42"),
            data_subfolder: String::from("scanA"),
            user_data_folder: String::from("/home/8-id-i/2019-2/jemian_201908/A024"),
            datafilename: String::from("A024_00001.imm"),
            data_begin: 4.0,
            data_end: 7.0,
            det_num: 25.0,
            exposure_time: 0.01,
            exposure_period: 0.011,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_file_name() {
        assert_eq!(
            clean_file_name("/good/path/to/bad file &^$*&^(&) name.txt"),
            format!("/good/path/to/bad_file{}name.txt", "_".repeat(11))
        );
        assert_eq!(
            clean_file_name("/ bad $$ &^%%$ path with/good_file_name.txt"),
            "/ bad $$ &^%%$ path with/good_file_name.txt"
        );
    }

    #[test]
    fn test_filename_from_mount() {
        let path = exporter().workflow_filename(&snapshot("/data/exp1"));
        assert_eq!(
            path,
            PathBuf::from("/home/8-id-i/exp1/run42/scanA/run42_0004-0007.hdf")
        );
        // Only whole components are remapped
        let path = exporter().workflow_filename(&snapshot("/database/exp1"));
        assert!(path.starts_with("/database/exp1"));
    }

    #[test]
    fn test_filename_collision_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&dir.path().to_string_lossy());
        let folder = dir.path().join("run42").join("scanA");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("run42_0004-0007.hdf"), b"").unwrap();
        std::fs::write(folder.join("run42_0004-0007__001.hdf"), b"").unwrap();

        let path = exporter().workflow_filename(&snap);
        assert_eq!(path, folder.join("run42_0004-0007__002.hdf"));
    }

    #[test]
    fn test_export_matches_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(&dir.path().to_string_lossy());
        snap.geometry_num = 0.0;
        snap.angle = 12.5;
        snap.attenuation = 3.0;
        snap.translation = [1.0, 2.0, 3.0];

        let exporter = exporter();
        let path = exporter.export(&snap).unwrap();
        let file = File::open(&path).unwrap();

        let angle = file
            .dataset("/measurement/instrument/acquisition/angle")
            .unwrap()
            .read_2d::<f64>()
            .unwrap();
        assert_eq!(angle, arr2(&[[-1.0]]));
        let data_end = file
            .dataset("/measurement/instrument/acquisition/data_end")
            .unwrap()
            .read_2d::<u64>()
            .unwrap();
        assert_eq!(data_end, arr2(&[[7_u64]]));
        let translation = file
            .dataset("/measurement/sample/translation")
            .unwrap()
            .read_2d::<f64>()
            .unwrap();
        assert_eq!(translation, arr2(&[[1.0, 2.0, 3.0]]));
        let geometry = file
            .dataset("/measurement/instrument/detector/geometry")
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap();
        assert_eq!(geometry.as_str(), "TRANSMISSION");
        let parent = file
            .dataset("/measurement/instrument/acquisition/parent_folder")
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap();
        assert_eq!(parent.as_str(), "jemian_201908");
        let bit_depth = file
            .dataset("/measurement/instrument/detector/bit_depth")
            .unwrap()
            .read_2d::<u32>()
            .unwrap();
        assert_eq!(bit_depth, arr2(&[[12_u32]]));

        // The exporter never overwrites
        assert!(matches!(
            exporter.create_hdf5_file(&path, &snap),
            Err(ExportError::FileExists(_))
        ));
    }

    #[test]
    fn test_reflection_burst_and_kinetics() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(&dir.path().to_string_lossy());
        snap.geometry_num = 1.0;
        snap.xspec = 1.5;
        snap.zspec = -2.25;
        snap.ccdxspec = 310.0;
        snap.ccdzspec = 12.0;
        snap.angle = 0.12;
        snap.burst_mode_state = 1.0;
        snap.number_of_bursts = 8.0;
        snap.first_usable_burst = 1.0;
        snap.last_usable_burst = 7.0;
        snap.kinetics_state = 1.0;
        snap.kinetics_top = 512.0;
        snap.kinetics_window_size = 100.0;

        let path = exporter().export(&snap).unwrap();
        let file = File::open(&path).unwrap();
        let number = |name: &str| {
            file.dataset(&format!("/measurement/instrument/{name}"))
                .unwrap()
                .read_2d::<f64>()
                .unwrap()
        };
        let count = |name: &str| {
            file.dataset(&format!("/measurement/instrument/detector/{name}"))
                .unwrap()
                .read_2d::<u32>()
                .unwrap()
        };

        assert_eq!(number("acquisition/xspec"), arr2(&[[snap.xspec]]));
        assert_eq!(number("acquisition/zspec"), arr2(&[[snap.zspec]]));
        assert_eq!(number("acquisition/ccdxspec"), arr2(&[[snap.ccdxspec]]));
        assert_eq!(number("acquisition/ccdzspec"), arr2(&[[snap.ccdzspec]]));
        assert_eq!(number("acquisition/angle"), arr2(&[[snap.angle]]));
        let geometry = file
            .dataset("/measurement/instrument/detector/geometry")
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap();
        assert_eq!(geometry.as_str(), "REFLECTION");

        assert_eq!(count("burst/number_of_bursts"), arr2(&[[8_u32]]));
        assert_eq!(count("burst/first_usable_burst"), arr2(&[[1_u32]]));
        assert_eq!(count("burst/last_usable_burst"), arr2(&[[7_u32]]));

        // floor(512 / 100) - 1
        assert_eq!(count("kinetics/first_usable_window"), arr2(&[[2_u32]]));
        assert_eq!(count("kinetics/last_usable_window"), arr2(&[[4_u32]]));
        assert_eq!(count("kinetics/top"), arr2(&[[512_u32]]));
        assert_eq!(count("kinetics/window_size"), arr2(&[[100_u32]]));
        for flag in ["burst_enabled", "kinetics_enabled"] {
            let value = file
                .dataset(&format!("/measurement/instrument/detector/{flag}"))
                .unwrap()
                .read_scalar::<VarLenUnicode>()
                .unwrap();
            assert_eq!(value.as_str(), "ENABLED");
        }
    }

    #[test]
    fn test_burst_and_kinetics_off_write_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(&dir.path().to_string_lossy());
        snap.number_of_bursts = 8.0;
        snap.kinetics_top = 512.0;
        snap.kinetics_window_size = 100.0;

        let path = exporter().export(&snap).unwrap();
        let file = File::open(&path).unwrap();
        for name in ["burst/number_of_bursts", "kinetics/last_usable_window", "kinetics/top"] {
            let value = file
                .dataset(&format!("/measurement/instrument/detector/{name}"))
                .unwrap()
                .read_2d::<u32>()
                .unwrap();
            assert_eq!(value, arr2(&[[0_u32]]));
        }
    }

    #[test]
    fn test_unknown_geometry_skips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(&dir.path().to_string_lossy());
        snap.geometry_num = 4.0;
        let path = exporter().export(&snap).unwrap();
        let file = File::open(&path).unwrap();
        assert!(file.dataset("/measurement/instrument/acquisition/angle").is_err());
    }

    #[test]
    fn test_missing_profile_and_bad_kinetics() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(&dir.path().to_string_lossy());
        snap.det_num = 99.0;
        assert!(matches!(
            exporter().export(&snap),
            Err(ExportError::UnknownDetector(99))
        ));

        snap.det_num = 25.0;
        snap.kinetics_state = 1.0;
        assert!(matches!(
            exporter().export(&snap),
            Err(ExportError::InvalidRegister { .. })
        ));
    }

    #[test]
    fn test_root_folder_helpers() {
        assert_eq!(
            join_root_folder("/home/8-id-i/2019-2/A024/", "A186_Uq0_00150"),
            "/home/8-id-i/2019-2/A024/A186_Uq0_00150/"
        );
        assert_eq!(join_root_folder("/home/8-id-i/A024//", ""), "/home/8-id-i/A024/");
        assert_eq!(parent_folder("A024"), "A024");
    }
}
