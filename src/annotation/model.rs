use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::metadata::{SliceKey, SliceKeyScheme};

/// Fewest vertices a contour needs to enclose any area.
pub const MIN_CONTOUR_POINTS: usize = 3;

/// A contour vertex in pixel coordinates: `x` is the column, `y` the row.
/// Serialized as a two element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point(pub i32, pub i32);

impl Point {
    #[inline]
    pub fn x(&self) -> i32 {
        self.0
    }

    #[inline]
    pub fn y(&self) -> i32 {
        self.1
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Point(x, y)
    }
}

/// One closed outline drawn on one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourSlice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sop_uid: Option<String>,
    pub z_position: f64,
    pub contour: Vec<Point>,
}

impl ContourSlice {
    pub fn is_valid(&self) -> bool {
        self.contour.len() >= MIN_CONTOUR_POINTS
    }

    /// Identity of the image this contour was drawn on.
    pub fn key(&self, scheme: SliceKeyScheme) -> Option<SliceKey> {
        match scheme {
            SliceKeyScheme::SopInstanceUid => self.sop_uid.as_deref().map(SliceKey::from_sop),
            SliceKeyScheme::ZPosition => Some(SliceKey::from_z(self.z_position)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Nodule {
    pub nodule_id: String,
    pub radiologist_id: String,
    pub slices: Vec<ContourSlice>,
}

/// Reader-agnostic nodule outlines for one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub patient_id: String,
    pub series_instance_uid: String,
    pub nodules: Vec<Nodule>,
}

impl Annotation {
    pub fn contours(&self) -> impl Iterator<Item = (&Nodule, &ContourSlice)> {
        self.nodules
            .iter()
            .flat_map(|nodule| nodule.slices.iter().map(move |slice| (nodule, slice)))
    }

    pub fn stats(&self) -> AnnotationStats {
        let readers: BTreeSet<&str> = self
            .nodules
            .iter()
            .map(|n| n.radiologist_id.as_str())
            .collect();
        AnnotationStats {
            readers: readers.len(),
            nodules: self.nodules.len(),
            contours: self.contours().count(),
            points: self.contours().map(|(_, s)| s.contour.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    pub readers: usize,
    pub nodules: usize,
    pub contours: usize,
    pub points: usize,
}

impl std::ops::Add for AnnotationStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            readers: self.readers + other.readers,
            nodules: self.nodules + other.nodules,
            contours: self.contours + other.contours,
            points: self.points + other.points,
        }
    }
}

/// Entries discarded while reading an annotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    /// Contours with missing fields or too few points.
    pub invalid_contours: usize,
    /// Contours marking excluded regions.
    pub exclusions: usize,
    /// Nodules left without any contour.
    pub empty_nodules: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.invalid_contours + self.exclusions + self.empty_nodules
    }
}

/// An annotation together with what was dropped to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnnotation {
    pub annotation: Annotation,
    pub dropped: DropCounts,
}

impl ParsedAnnotation {
    pub fn into_annotation(self) -> Annotation {
        self.annotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(sop: Option<&str>, z: f64) -> ContourSlice {
        ContourSlice {
            sop_uid: sop.map(str::to_string),
            z_position: z,
            contour: vec![Point(2, 2), Point(2, 6), Point(6, 6), Point(6, 2)],
        }
    }

    #[test]
    fn test_stats() {
        let annotation = Annotation {
            patient_id: "LIDC-IDRI-0001".into(),
            series_instance_uid: "1.2.3".into(),
            nodules: vec![
                Nodule {
                    nodule_id: "R1_Nodule_1".into(),
                    radiologist_id: "R1".into(),
                    slices: vec![square(Some("1.1"), 0.0), square(Some("1.2"), 1.0)],
                },
                Nodule {
                    nodule_id: "R2_Nodule_1".into(),
                    radiologist_id: "R2".into(),
                    slices: vec![square(Some("1.1"), 0.0)],
                },
                Nodule {
                    nodule_id: "R2_Nodule_2".into(),
                    radiologist_id: "R2".into(),
                    slices: vec![square(None, 2.0)],
                },
            ],
        };
        let stats = annotation.stats();
        assert_eq!(
            stats,
            AnnotationStats {
                readers: 2,
                nodules: 3,
                contours: 4,
                points: 16
            }
        );
    }

    #[test]
    fn test_contour_key() {
        let slice = square(Some("1.2.3"), -125.5);
        assert_eq!(
            slice.key(SliceKeyScheme::SopInstanceUid),
            Some(SliceKey::from_sop("1.2.3"))
        );
        assert_eq!(
            slice.key(SliceKeyScheme::ZPosition),
            Some(SliceKey::from_z(-125.5))
        );
        assert_eq!(square(None, 0.0).key(SliceKeyScheme::SopInstanceUid), None);
    }

    #[test]
    fn test_point_serializes_as_pair() {
        assert_eq!(serde_json::to_string(&Point(3, -4)).unwrap(), "[3,-4]");
        let point: Point = serde_json::from_str("[7, 9]").unwrap();
        assert_eq!((point.x(), point.y()), (7, 9));
    }
}
