// ============================================================
// Layer 6 — Diagnostic Images
// ============================================================
// PNG files that show what the network and classifiers do:
//
//   Embedding scatter   plotters bitmap, one point per patch
//                       source = filled circle, target = cross,
//                       colour = tissue class
//
//   Label image         image crate RGB, background black,
//                       one hue per tissue label
//
//   Intensity image     image crate greyscale, min-max scaled
//
// File names follow
//   viz/b1b3_cnn__nT{nT}_r{it}embedding_{untrained|trained}.png
//   viz/b1b3_{pred_src|pred_spt|pred_net|pred_ntt|pred_tgt|data_tgt|true_tgt}_sub{P}_nT{nT}_r{it}.png

use anyhow::{anyhow, bail, Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use palette::{Hsl, IntoColor, Srgb};
use plotters::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::patch::FeatureMatrix;
use crate::domain::traits::SampleSet;

/// `n` evenly spaced hues as 8-bit RGB.
pub fn class_colors(n: usize) -> Vec<[u8; 3]> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let rgb: Srgb = Hsl::new(hue, 0.75, 0.55).into_color();
            [
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            ]
        })
        .collect()
}

/// Where the run's images go.
pub struct VizPaths {
    dir:            PathBuf,
    target_samples: usize,
    iteration:      usize,
}

impl VizPaths {
    pub fn new(dir: impl Into<PathBuf>, target_samples: usize, iteration: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        Ok(Self { dir, target_samples, iteration })
    }

    /// `stage` is "untrained" or "trained".
    pub fn embedding(&self, stage: &str) -> PathBuf {
        self.dir.join(format!(
            "b1b3_cnn__nT{}_r{}embedding_{}.png",
            self.target_samples, self.iteration, stage
        ))
    }

    /// `kind` is e.g. "pred_src" or "true_tgt".
    pub fn subject_image(&self, kind: &str, subject_number: usize) -> PathBuf {
        self.dir.join(format!(
            "b1b3_{}_sub{}_nT{}_r{}.png",
            kind, subject_number, self.target_samples, self.iteration
        ))
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> anyhow::Error {
    anyhow!("plotting failed: {}", e)
}

/// Scatter the first two embedding dimensions of source and target patches.
pub fn viz_embedding(
    path:        &Path,
    source:      &FeatureMatrix,
    target:      &FeatureMatrix,
    num_classes: usize,
) -> Result<()> {
    if source.cols() < 2 || target.cols() < 2 {
        bail!("embedding plots need at least two dimensions");
    }

    let points = |m: &FeatureMatrix| -> Vec<(f32, f32, usize)> {
        (0..m.len())
            .map(|i| (m.row(i)[0], m.row(i)[1], m.targets()[i]))
            .collect()
    };
    let src = points(source);
    let tgt = points(target);

    let (mut x_min, mut x_max, mut y_min, mut y_max) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
    for &(x, y, _) in src.iter().chain(&tgt) {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if src.is_empty() && tgt.is_empty() {
        (x_min, x_max, y_min, y_max) = (-1.0, 1.0, -1.0, 1.0);
    }
    let pad_x = ((x_max - x_min) * 0.05).max(1e-3);
    let pad_y = ((y_max - y_min) * 0.05).max(1e-3);

    let colors: Vec<RGBColor> = class_colors(num_classes.max(1))
        .into_iter()
        .map(|[r, g, b]| RGBColor(r, g, b))
        .collect();
    let color = |k: usize| colors[k % colors.len()];

    let root = BitMapBackend::new(path, (640, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(x_min - pad_x..x_max + pad_x, y_min - pad_y..y_max + pad_y)
        .map_err(plot_err)?;

    chart
        .draw_series(src.iter().map(|&(x, y, k)| Circle::new((x, y), 3, color(k).filled())))
        .map_err(plot_err)?;
    chart
        .draw_series(tgt.iter().map(|&(x, y, k)| Cross::new((x, y), 4, color(k).stroke_width(2))))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    tracing::info!("Writing image to : {}", path.display());
    Ok(())
}

/// Write a label image: 0 is black, label l ≥ 1 gets hue l - 1 of `num_labels`.
pub fn save_label_image(
    path:       &Path,
    labels:     &[u8],
    width:      usize,
    height:     usize,
    num_labels: usize,
) -> Result<()> {
    if labels.len() != width * height {
        bail!("{} labels do not fill a {}x{} image", labels.len(), height, width);
    }
    let colors = class_colors(num_labels.max(1));
    let img = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        match labels[y as usize * width + x as usize] {
            0 => Rgb([0, 0, 0]),
            l => Rgb(colors[(l as usize - 1) % colors.len()]),
        }
    });
    img.save(path)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    tracing::info!("Writing image to : {}", path.display());
    Ok(())
}

/// Write an intensity image in grey, scaled to its own min and max.
pub fn save_gray_image(path: &Path, pixels: &[f32], width: usize, height: usize) -> Result<()> {
    if pixels.len() != width * height {
        bail!("{} pixels do not fill a {}x{} image", pixels.len(), height, width);
    }
    let lo = pixels.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = pixels.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = if hi > lo { hi - lo } else { 1.0 };

    let img = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = (pixels[y as usize * width + x as usize] - lo) / range;
        Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
    });
    img.save(path)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    tracing::info!("Writing image to : {}", path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_naming_scheme() {
        let dir   = tempfile::tempdir().unwrap();
        let paths = VizPaths::new(dir.path().join("viz"), 5, 2).unwrap();
        assert!(paths.embedding("trained").ends_with("b1b3_cnn__nT5_r2embedding_trained.png"));
        assert!(paths.subject_image("pred_net", 20).ends_with("b1b3_pred_net_sub20_nT5_r2.png"));
    }

    #[test]
    fn test_class_colors_are_distinct() {
        let c = class_colors(3);
        assert_eq!(c.len(), 3);
        assert_ne!(c[0], c[1]);
        assert_ne!(c[1], c[2]);
    }

    #[test]
    fn test_label_image_background_is_black() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.png");
        save_label_image(&path, &[0, 1, 2, 3], 2, 2, 3).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &Rgb(class_colors(3)[0]));
    }

    #[test]
    fn test_gray_image_is_stretched() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        save_gray_image(&path, &[0.2, 0.6, 0.4, 0.2], 2, 2).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
        assert!(save_gray_image(&path, &[0.0; 3], 2, 2).is_err());
    }

    #[test]
    fn test_embedding_plot_is_written() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.png");
        let src  = FeatureMatrix::new(2, vec![0.0, 0.0, 1.0, 1.0], vec![0, 1]).unwrap();
        let tgt  = FeatureMatrix::new(2, vec![0.5, 0.2], vec![2]).unwrap();
        viz_embedding(&path, &src, &tgt, 3).unwrap();
        assert!(path.exists());

        let one_d = FeatureMatrix::new(1, vec![0.0], vec![0]).unwrap();
        assert!(viz_embedding(&path, &one_d, &one_d, 3).is_err());
    }
}
