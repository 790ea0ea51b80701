use std::collections::HashMap;

use ndarray::{Array3, Axis};
use serde::Serialize;
use tracing::{debug, warn};

use crate::annotation::Annotation;
use crate::mask::{rasterize_polygon, MaskStats};
use crate::metadata::{SliceKey, SliceKeyScheme};
use crate::volume::{SeriesLayout, SliceHeader, Volume};

/// Maps slice identities to depth indices of one volume. Built once per volume.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceLookup {
    scheme: SliceKeyScheme,
    index: HashMap<SliceKey, usize>,
}

impl SliceLookup {
    /// Index `keys` in depth order. When two slices share a key the shallower one wins.
    pub fn from_keys<I>(keys: I, scheme: SliceKeyScheme) -> Self
    where
        I: IntoIterator<Item = Option<SliceKey>>,
    {
        let mut index = HashMap::new();
        for (depth, key) in keys.into_iter().enumerate() {
            let key = match key {
                Some(key) => key,
                None => continue,
            };
            if let Some(previous) = index.get(&key) {
                debug!("Slice {} shares key {} with slice {}", depth, key, previous);
                continue;
            }
            index.insert(key, depth);
        }
        Self { scheme, index }
    }

    pub fn from_headers(headers: &[SliceHeader], scheme: SliceKeyScheme) -> Self {
        Self::from_keys(headers.iter().map(|h| h.key(scheme)), scheme)
    }

    pub fn from_volume(volume: &Volume, scheme: SliceKeyScheme) -> Self {
        Self::from_keys(volume.slice_keys(scheme), scheme)
    }

    pub fn from_layout(layout: &SeriesLayout, scheme: SliceKeyScheme) -> Self {
        Self::from_headers(layout.headers(), scheme)
    }

    pub fn scheme(&self) -> SliceKeyScheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &SliceKey) -> Option<usize> {
        self.index.get(key).copied()
    }
}

/// A mask volume and an account of the contours that went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskReport {
    pub mask: Array3<u8>,
    pub counts: ContourCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContourCounts {
    /// Contours drawn into the mask.
    pub rasterized: usize,
    /// Contours with no identity under the lookup's scheme, such as z-only
    /// contours keyed by SOP Instance UID.
    pub unkeyed: usize,
    /// Contours whose slice is not part of the volume.
    pub unmatched: usize,
    /// Contours that matched a slice but covered no pixel centre.
    pub empty: usize,
}

impl MaskReport {
    pub fn stats(&self) -> MaskStats {
        MaskStats::from_mask(&self.mask)
    }

    pub fn into_mask(self) -> Array3<u8> {
        self.mask
    }
}

/// Rasterize every contour of `annotation` into a zeroed mask of `shape`
/// (depth, rows, columns). Overlapping contours are OR-combined.
pub fn build_mask_with_lookup(
    annotation: &Annotation,
    lookup: &SliceLookup,
    shape: (usize, usize, usize),
) -> MaskReport {
    let mut mask = Array3::<u8>::zeros(shape);
    let mut counts = ContourCounts::default();

    for (nodule, slice) in annotation.contours() {
        let key = match slice.key(lookup.scheme()) {
            Some(key) => key,
            None => {
                counts.unkeyed += 1;
                continue;
            }
        };
        let depth = match lookup.get(&key) {
            Some(depth) if depth < shape.0 => depth,
            _ => {
                debug!(
                    "No slice for contour of {} at z={} in {}",
                    nodule.nodule_id, slice.z_position, annotation.patient_id
                );
                counts.unmatched += 1;
                continue;
            }
        };
        let raster = rasterize_polygon(&slice.contour, (shape.1, shape.2));
        if raster.iter().all(|v| *v == 0) {
            counts.empty += 1;
            continue;
        }
        mask.index_axis_mut(Axis(0), depth)
            .zip_mut_with(&raster, |m, r| *m |= *r);
        counts.rasterized += 1;
    }

    if counts.unkeyed > 0 {
        warn!(
            "{} contours of {} have no {} key and were not drawn",
            counts.unkeyed,
            annotation.patient_id,
            lookup.scheme()
        );
    }

    MaskReport { mask, counts }
}

/// Build the mask for `annotation` aligned with `volume`.
pub fn build_mask(annotation: &Annotation, volume: &Volume, scheme: SliceKeyScheme) -> MaskReport {
    let lookup = SliceLookup::from_volume(volume, scheme);
    build_mask_with_lookup(annotation, &lookup, volume.shape())
}

/// Build the mask for `annotation` from slice headers alone.
pub fn build_mask_for_layout(
    annotation: &Annotation,
    layout: &SeriesLayout,
    scheme: SliceKeyScheme,
) -> MaskReport {
    let lookup = SliceLookup::from_layout(layout, scheme);
    build_mask_with_lookup(annotation, &lookup, layout.shape())
}
