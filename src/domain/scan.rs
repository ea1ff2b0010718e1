// ============================================================
// Layer 3 — Scan Domain Types
// ============================================================
// A subject's scan is a 2-D slice of intensities, and its
// phantom is a slice of the same shape holding tissue labels.
// Several subjects are kept together in one stack so the
// pipeline can index them by position:
//
//   SliceStack<f32>  → ImageStack  (normalised intensities)
//   SliceStack<u8>   → LabelStack  (0 = background, 1.. = tissue)
//
// Pixels are stored row-major: pixel (row, col) of slice i
// lives at  i * width * height + row * width + col.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// ─── Acquisition ──────────────────────────────────────────────────────────────
/// Which simulated scanner protocol produced a scan.
///
/// The scan id doubles as the class index of the scanner
/// classifier and as the row of the network's per-scanner
/// calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Acquisition {
    /// 1.5T protocol the network is trained on
    Source,
    /// 3.0T protocol with only a few labeled samples
    Target,
}

impl Acquisition {
    pub const COUNT: usize = 2;

    pub fn scan_id(self) -> usize {
        match self {
            Acquisition::Source => 0,
            Acquisition::Target => 1,
        }
    }
}

// ─── SliceStack ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct SliceStack<T> {
    width:  usize,
    height: usize,
    data:   Vec<T>,
}

pub type ImageStack = SliceStack<f32>;
pub type LabelStack = SliceStack<u8>;

impl<T: Copy> SliceStack<T> {
    /// Wrap a flat buffer holding a whole number of `width × height` slices.
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        let area = width * height;
        if area == 0 {
            bail!("slice dimensions must be non-zero, got {width}x{height}");
        }
        if data.len() % area != 0 {
            bail!(
                "buffer of {} values is not a whole number of {}x{} slices",
                data.len(), width, height
            );
        }
        Ok(Self { width, height, data })
    }

    /// Stack individual slices in order.
    pub fn from_slices(width: usize, height: usize, slices: Vec<Vec<T>>) -> Result<Self> {
        let area = width * height;
        let mut data = Vec::with_capacity(area * slices.len());
        for (i, slice) in slices.into_iter().enumerate() {
            if slice.len() != area {
                bail!("slice {} has {} pixels, expected {}", i, slice.len(), area);
            }
            data.extend(slice);
        }
        Self::new(width, height, data)
    }

    pub fn width(&self)  -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn area(&self)   -> usize { self.width * self.height }

    /// Number of slices (subjects) in the stack
    pub fn len(&self) -> usize { self.data.len() / self.area() }

    pub fn slice(&self, index: usize) -> &[T] {
        let area = self.area();
        &self.data[index * area..(index + 1) * area]
    }

    pub fn slice_mut(&mut self, index: usize) -> &mut [T] {
        let area = self.area();
        &mut self.data[index * area..(index + 1) * area]
    }

    pub fn data(&self) -> &[T] { &self.data }

    pub fn data_mut(&mut self) -> &mut [T] { &mut self.data }

    /// True when both stacks hold the same number of equally sized slices
    pub fn same_shape<U: Copy>(&self, other: &SliceStack<U>) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.len() == other.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_is_row_major() {
        let stack = ImageStack::new(3, 2, (0..12).map(|v| v as f32).collect()).unwrap();
        assert_eq!(stack.len(), 2);
        // slice 1, row 1, col 2 → 6 + 3 + 2
        assert_eq!(stack.slice(1)[3 + 2], 11.0);
        assert_eq!(stack.slice(1), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_rejects_partial_slice() {
        assert!(LabelStack::new(4, 4, vec![0u8; 20]).is_err());
        assert!(LabelStack::new(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_from_slices_checks_each_slice() {
        let ok = LabelStack::from_slices(2, 2, vec![vec![1; 4], vec![2; 4]]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(LabelStack::from_slices(2, 2, vec![vec![1; 4], vec![2; 3]]).is_err());
    }

    #[test]
    fn test_same_shape_compares_slice_count() {
        let images = ImageStack::new(2, 2, vec![0.0; 8]).unwrap();
        let labels = LabelStack::new(2, 2, vec![0; 8]).unwrap();
        let fewer  = LabelStack::new(2, 2, vec![0; 4]).unwrap();
        assert!(images.same_shape(&labels));
        assert!(!images.same_shape(&fewer));
    }

    #[test]
    fn test_scan_ids_are_distinct() {
        assert_eq!(Acquisition::Source.scan_id(), 0);
        assert_eq!(Acquisition::Target.scan_id(), 1);
        assert!(Acquisition::Target.scan_id() < Acquisition::COUNT);
    }
}
