use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::DetectorProfileError;

/// Load the default profiles for windows
#[cfg(target_family = "windows")]
fn load_default_profiles() -> String {
    String::from(include_str!("data\\detector_profiles.yml"))
}

/// Load the default profiles for macos and linux
#[cfg(target_family = "unix")]
fn load_default_profiles() -> String {
    String::from(include_str!("data/detector_profiles.yml"))
}

/// Static hardware description of one area detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    pub manufacturer: String,
    /// Largest count a pixel can hold
    pub saturation: f64,
    /// Pixel size in mm
    pub dpix: f64,
    pub col_size: u32,
    pub row_size: u32,
    pub flatfield: u32,
    pub blemish: u32,
    pub efficiency: f64,
    pub adu_per_photon: f64,
    /// Negative for an absolute lower level discriminator, positive for a sigma cut
    pub lld: f64,
}

impl DetectorProfile {
    /// Number of bits needed for the saturation count
    pub fn bit_depth(&self) -> u32 {
        self.saturation.log2().ceil() as u32
    }
}

/// DetectorProfiles maps the det_num register to a detector's hardware profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorProfiles {
    profiles: FxHashMap<u32, DetectorProfile>,
}

impl DetectorProfiles {
    /// Create a new DetectorProfiles.
    /// If the path is None, we load the default that is bundled with the crate
    pub fn new(path: Option<&Path>) -> Result<Self, DetectorProfileError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_profiles();
        }
        Ok(serde_yaml::from_str::<Self>(&contents)?)
    }

    pub fn get(&self, det_num: u32) -> Option<&DetectorProfile> {
        self.profiles.get(&det_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles() {
        let profiles = match DetectorProfiles::new(None) {
            Ok(p) => p,
            Err(_) => panic!(),
        };
        let lambda = profiles.get(25).unwrap();
        assert_eq!(lambda.col_size, 1556);
        assert_eq!(lambda.bit_depth(), 12);
        assert_eq!(profiles.get(46).unwrap().bit_depth(), 2);
        assert!(profiles.get(7).is_none());
    }
}
