use image::{imageops, imageops::FilterType, ImageFormat, Rgb, RgbImage};
use ndarray::Array2;
use std::io::Cursor;

use crate::config::HeatmapConfig;
use crate::error::{ClassifierError, Result};

/// Turns raw score maps into colour images. Holds no state beyond the blend weight.
#[derive(Debug, Clone, Copy)]
pub struct HeatmapRenderer {
    alpha: f32,
}

impl Default for HeatmapRenderer {
    fn default() -> Self {
        Self { alpha: 0.5 }
    }
}

impl HeatmapRenderer {
    pub fn new(alpha: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ClassifierError::InvalidConfig(format!(
                "heatmap alpha {} is outside [0, 1]",
                alpha
            )));
        }
        Ok(Self { alpha })
    }

    pub fn from_config(config: &HeatmapConfig) -> Result<Self> {
        Self::new(config.alpha)
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Colour-map `raw`, optionally blended over `base` at the base's resolution
    pub fn render(&self, raw: &Array2<f32>, base: Option<&RgbImage>) -> RgbImage {
        let normalized = Self::normalize(raw);
        let (height, width) = normalized.dim();
        let colored = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            Self::colorize(normalized[[y as usize, x as usize]])
        });

        match base {
            Some(base) => {
                let resized = if colored.dimensions() == base.dimensions() {
                    colored
                } else {
                    imageops::resize(&colored, base.width(), base.height(), FilterType::Triangle)
                };
                Self::blend(base, &resized, self.alpha)
            }
            None => colored,
        }
    }

    /// Min-max scale to 0..=255. A constant (or empty) map becomes all zeros.
    pub fn normalize(raw: &Array2<f32>) -> Array2<u8> {
        let (min, max) = raw
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        if !range.is_finite() || range <= 0.0 {
            return Array2::zeros(raw.dim());
        }
        raw.mapv(|v| {
            if v.is_finite() {
                ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
    }

    /// Jet colour map: dark blue at 0, through cyan, yellow, to dark red at 255
    pub fn colorize(value: u8) -> Rgb<u8> {
        let x = value as f32 / 255.0;
        let channel = |center: f32| {
            let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
            (v * 255.0).round() as u8
        };
        Rgb([channel(3.0), channel(2.0), channel(1.0)])
    }

    /// `base * (1 - alpha) + heat * alpha` per channel. Both images must share dimensions.
    pub fn blend(base: &RgbImage, heat: &RgbImage, alpha: f32) -> RgbImage {
        RgbImage::from_fn(base.width(), base.height(), |x, y| {
            let b = base.get_pixel(x, y);
            let h = heat.get_pixel(x, y);
            let mix = |i: usize| {
                (b[i] as f32 * (1.0 - alpha) + h[i] as f32 * alpha)
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            Rgb([mix(0), mix(1), mix(2)])
        })
    }

    /// Element-wise `a - b` of two score maps
    pub fn difference(a: &Array2<f32>, b: &Array2<f32>) -> Result<Array2<f32>> {
        if a.dim() != b.dim() {
            return Err(ClassifierError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(a - b)
    }

    pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spans_full_range() {
        let raw = Array2::from_shape_vec((1, 3), vec![-2.0, 0.0, 2.0]).unwrap();
        let n = HeatmapRenderer::normalize(&raw);
        assert_eq!(n.as_slice().unwrap(), &[0, 128, 255]);
    }

    #[test]
    fn test_constant_map_is_zero() {
        let raw = Array2::from_elem((4, 4), 3.5f32);
        assert!(HeatmapRenderer::normalize(&raw).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(HeatmapRenderer::colorize(0), Rgb([0, 0, 128]));
        assert_eq!(HeatmapRenderer::colorize(255), Rgb([128, 0, 0]));
        let mid = HeatmapRenderer::colorize(128);
        assert!(mid[1] > 200);
    }

    #[test]
    fn test_alpha_is_validated() {
        assert!(HeatmapRenderer::new(1.2).is_err());
        assert!(HeatmapRenderer::new(-0.1).is_err());
        assert_eq!(HeatmapRenderer::new(0.25).unwrap().alpha(), 0.25);
    }

    #[test]
    fn test_blend_is_even_mix() {
        let base = RgbImage::from_pixel(2, 2, Rgb([200, 100, 0]));
        let heat = RgbImage::from_pixel(2, 2, Rgb([0, 100, 255]));
        let out = HeatmapRenderer::blend(&base, &heat, 0.5);
        assert_eq!(*out.get_pixel(1, 1), Rgb([100, 100, 128]));
    }

    #[test]
    fn test_render_resizes_to_base() {
        let raw = Array2::from_shape_fn((8, 8), |(y, x)| (y + x) as f32);
        let base = RgbImage::from_pixel(20, 12, Rgb([10, 10, 10]));
        let out = HeatmapRenderer::default().render(&raw, Some(&base));
        assert_eq!(out.dimensions(), (20, 12));

        let bare = HeatmapRenderer::default().render(&raw, None);
        assert_eq!(bare.dimensions(), (8, 8));
        assert_eq!(*bare.get_pixel(0, 0), HeatmapRenderer::colorize(0));
        assert_eq!(*bare.get_pixel(7, 7), HeatmapRenderer::colorize(255));
    }

    #[test]
    fn test_png_encoding_has_signature() {
        let png = HeatmapRenderer::encode_png(&RgbImage::new(3, 3)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
