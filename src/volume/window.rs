use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};

/// Lower bound of the default lung window, in Hounsfield units.
pub const LUNG_FLOOR_HU: f32 = -1000.0;
/// Upper bound of the default lung window, in Hounsfield units.
pub const LUNG_CEILING_HU: f32 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct WindowBounds {
    floor: f32,
    ceiling: f32,
}

/// Intensity window mapping Hounsfield units onto [0, 1].
///
/// Values at or below the floor map to 0, values at or above the ceiling map to 1,
/// and values in between are scaled linearly. The window is immutable; build a new
/// one to change it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds", into = "WindowBounds")]
pub struct Window {
    floor: f32,
    ceiling: f32,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WindowError {
    #[snafu(display("window floor {} must be finite and below ceiling {}", floor, ceiling))]
    InvalidWindow { floor: f32, ceiling: f32 },
}

impl TryFrom<WindowBounds> for Window {
    type Error = WindowError;

    fn try_from(bounds: WindowBounds) -> Result<Self, Self::Error> {
        Window::new(bounds.floor, bounds.ceiling).context(InvalidWindowSnafu {
            floor: bounds.floor,
            ceiling: bounds.ceiling,
        })
    }
}

impl From<Window> for WindowBounds {
    fn from(window: Window) -> Self {
        Self {
            floor: window.floor,
            ceiling: window.ceiling,
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            floor: LUNG_FLOOR_HU,
            ceiling: LUNG_CEILING_HU,
        }
    }
}

impl Window {
    /// Returns `None` unless both bounds are finite and `floor < ceiling`.
    pub fn new(floor: f32, ceiling: f32) -> Option<Self> {
        if floor.is_finite() && ceiling.is_finite() && floor < ceiling {
            Some(Self { floor, ceiling })
        } else {
            None
        }
    }

    /// Build a window from a level (centre) and width.
    pub fn from_level_width(level: f32, width: f32) -> Option<Self> {
        Self::new(level - width / 2.0, level + width / 2.0)
    }

    #[inline]
    pub fn floor(&self) -> f32 {
        self.floor
    }

    #[inline]
    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.ceiling - self.floor
    }

    #[inline]
    pub fn level(&self) -> f32 {
        (self.floor + self.ceiling) / 2.0
    }

    /// Windowed value of `hu`. Non-finite input maps to 0.
    pub fn eval(&self, hu: f32) -> f32 {
        if !hu.is_finite() || hu <= self.floor {
            0.0
        } else if hu >= self.ceiling {
            1.0
        } else {
            (hu - self.floor) / self.width()
        }
    }

    /// Windowed value of `hu` as a grey level in 0..=255.
    pub fn eval_u8(&self, hu: f32) -> u8 {
        // 255, not 256.
        (self.eval(hu) * 255.0).round() as u8
    }

    pub fn apply<S>(&self, hu: &ArrayBase<S, Ix2>) -> Array2<f32>
    where
        S: Data<Elem = i16>,
    {
        hu.mapv(|v| self.eval(v as f32))
    }

    pub fn apply_u8<S>(&self, hu: &ArrayBase<S, Ix2>) -> Array2<u8>
    where
        S: Data<Elem = i16>,
    {
        hu.mapv(|v| self.eval_u8(v as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(1.0, -1.0)]
    #[case(f32::NAN, 1.0)]
    #[case(0.0, f32::INFINITY)]
    fn test_invalid_window(#[case] floor: f32, #[case] ceiling: f32) {
        assert!(Window::new(floor, ceiling).is_none());
    }

    #[rstest]
    #[case(-2000.0, 0.0)]
    #[case(-1000.0, 0.0)]
    #[case(-300.0, 0.5)]
    #[case(400.0, 1.0)]
    #[case(3000.0, 1.0)]
    #[case(f32::NAN, 0.0)]
    fn test_lung_window(#[case] hu: f32, #[case] expected: f32) {
        let window = Window::default();
        assert!((window.eval(hu) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_level_width() {
        let window = Window::from_level_width(-300.0, 1400.0).unwrap();
        assert_eq!(window, Window::default());
        assert_eq!(window.level(), -300.0);
        assert_eq!(window.width(), 1400.0);
        assert!(Window::from_level_width(0.0, 0.0).is_none());
    }

    #[test]
    fn test_bounded_and_monotonic() {
        let window = Window::default();
        let mut previous = 0.0;
        for hu in (i16::MIN..=i16::MAX).step_by(7) {
            let value = window.eval(hu as f32);
            assert!((0.0..=1.0).contains(&value));
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_apply() {
        let window = Window::default();
        let hu = array![[-1024i16, -300], [400, 1200]];
        assert_eq!(window.apply(&hu), array![[0.0f32, 0.5], [1.0, 1.0]]);
        assert_eq!(window.apply_u8(&hu.view()), array![[0u8, 128], [255, 255]]);
    }

    #[test]
    fn test_deserialize_rejects_inverted_bounds() {
        let window: Window = serde_json::from_str(r#"{"floor": -1000, "ceiling": 400}"#).unwrap();
        assert_eq!(window, Window::default());
        let inverted = serde_json::from_str::<Window>(r#"{"floor": 400, "ceiling": -1000}"#);
        let message = inverted.unwrap_err().to_string();
        assert!(message.contains("window floor 400 must be finite and below ceiling -1000"));
    }

    #[test]
    fn test_window_error() {
        let bounds = WindowBounds {
            floor: 0.0,
            ceiling: 0.0,
        };
        let result = Window::try_from(bounds);
        assert!(matches!(
            result,
            Err(WindowError::InvalidWindow { floor, ceiling }) if floor == 0.0 && ceiling == 0.0
        ));
    }
}
