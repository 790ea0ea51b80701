use ndarray::{Array3, ArrayBase, Axis, Data, Ix3};
use serde::Serialize;

/// Depth indices of slices with at least one foreground pixel, ascending.
pub fn tumor_slices<S>(mask: &ArrayBase<S, Ix3>) -> Vec<usize>
where
    S: Data<Elem = u8>,
{
    mask.axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, slice)| slice.iter().any(|v| *v != 0))
        .map(|(z, _)| z)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaskStats {
    pub depth: usize,
    pub tumor_slices: Vec<usize>,
    pub foreground_voxels: usize,
}

impl MaskStats {
    pub fn from_mask(mask: &Array3<u8>) -> Self {
        Self {
            depth: mask.dim().0,
            tumor_slices: tumor_slices(mask),
            foreground_voxels: mask.iter().filter(|v| **v != 0).count(),
        }
    }

    pub fn background_slices(&self) -> usize {
        self.depth - self.tumor_slices.len()
    }
}
