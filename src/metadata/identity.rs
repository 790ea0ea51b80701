use std::fmt;

use serde::{Deserialize, Serialize};

/// Multiplier applied to a z position before rounding it into a [`SliceKey::Z`].
/// Positions closer than a micrometre therefore map to the same key.
pub const Z_KEY_SCALE: f64 = 1000.0;

/// How slices are matched between an annotation and a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SliceKeyScheme {
    /// SOP Instance UID of the image.
    #[default]
    SopInstanceUid,
    /// Quantized position along the stacking axis.
    ZPosition,
}

impl fmt::Display for SliceKeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme_str = match self {
            SliceKeyScheme::SopInstanceUid => "sop-instance-uid",
            SliceKeyScheme::ZPosition => "z-position",
        };
        write!(f, "{scheme_str}")
    }
}

/// Identity of a slice under one [`SliceKeyScheme`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SliceKey {
    Sop(String),
    Z(i64),
}

impl SliceKey {
    pub fn from_sop(uid: &str) -> Self {
        SliceKey::Sop(uid.trim().trim_end_matches('\0').to_string())
    }

    pub fn from_z(z: f64) -> Self {
        SliceKey::Z((z * Z_KEY_SCALE).round() as i64)
    }

    pub fn scheme(&self) -> SliceKeyScheme {
        match self {
            SliceKey::Sop(_) => SliceKeyScheme::SopInstanceUid,
            SliceKey::Z(_) => SliceKeyScheme::ZPosition,
        }
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceKey::Sop(uid) => write!(f, "sop:{uid}"),
            SliceKey::Z(z) => write!(f, "z:{:.3}", *z as f64 / Z_KEY_SCALE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-125.0, -125.0, true)]
    #[case(-125.0, -125.0000004, true)]
    #[case(-125.0, -125.0 + 1e-12, true)]
    #[case(-125.0, -125.5, false)]
    #[case(0.0, -0.0, true)]
    fn test_z_key_quantization(#[case] a: f64, #[case] b: f64, #[case] equal: bool) {
        assert_eq!(SliceKey::from_z(a) == SliceKey::from_z(b), equal);
    }

    #[test]
    fn test_sop_key_trims_padding() {
        assert_eq!(SliceKey::from_sop(" 1.2.3\0"), SliceKey::Sop("1.2.3".into()));
    }

    #[test]
    fn test_scheme_of_key() {
        assert_eq!(SliceKey::from_z(1.0).scheme(), SliceKeyScheme::ZPosition);
        assert_eq!(
            SliceKey::from_sop("1.2").scheme(),
            SliceKeyScheme::SopInstanceUid
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(SliceKey::from_z(-125.25).to_string(), "z:-125.250");
        assert_eq!(SliceKey::from_sop("1.2").to_string(), "sop:1.2");
    }
}
