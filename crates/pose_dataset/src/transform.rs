//! Shared-parameter spatial transforms and tensor conversion.
//!
//! One [`TransformParams`] is drawn per sample from the pose-mask size and
//! reused for every image of that sample, so crops and flips line up across
//! pose, mask, appearance, target, and instance tensors.

use crate::options::DatasetOptions;
use crate::types::SampleTensor;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Luma};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Multiple that `PreprocessMode::None` rounds each side to.
const POWER_BASE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    #[default]
    ResizeAndCrop,
    Crop,
    ScaleWidth,
    ScaleWidthAndCrop,
    ScaleShortside,
    ScaleShortsideAndCrop,
    Fixed,
    None,
    Resize,
}

impl PreprocessMode {
    pub fn resizes(self) -> bool {
        matches!(self, PreprocessMode::Resize | PreprocessMode::ResizeAndCrop)
    }
    pub fn scales_width(self) -> bool {
        matches!(
            self,
            PreprocessMode::ScaleWidth | PreprocessMode::ScaleWidthAndCrop
        )
    }
    pub fn scales_shortside(self) -> bool {
        matches!(
            self,
            PreprocessMode::ScaleShortside | PreprocessMode::ScaleShortsideAndCrop
        )
    }
    pub fn crops(self) -> bool {
        matches!(
            self,
            PreprocessMode::Crop
                | PreprocessMode::ResizeAndCrop
                | PreprocessMode::ScaleWidthAndCrop
                | PreprocessMode::ScaleShortsideAndCrop
        )
    }
}

/// Randomized settings shared by every transform applied to one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub crop_pos: (u32, u32),
    pub flip: bool,
}

impl TransformParams {
    /// Draw parameters for an image of `size` (width, height).
    pub fn sample(opts: &DatasetOptions, size: (u32, u32), rng: &mut dyn rand::RngCore) -> Self {
        let (w, h) = size;
        let (new_w, new_h) = match opts.preprocess_mode {
            PreprocessMode::ResizeAndCrop => (opts.load_size, opts.load_size),
            PreprocessMode::ScaleWidthAndCrop => (
                opts.load_size,
                scaled(opts.load_size, h, w),
            ),
            PreprocessMode::ScaleShortsideAndCrop => shortside_size(w, h, opts.load_size),
            _ => (w, h),
        };
        let x = rng.random_range(0..=new_w.saturating_sub(opts.crop_size));
        let y = rng.random_range(0..=new_h.saturating_sub(opts.crop_size));
        let flip = rng.random::<f64>() > 0.5;
        Self {
            crop_pos: (x, y),
            flip,
        }
    }

    /// Per-sample RNG: `seed ^ index` when seeded, else the thread RNG.
    pub fn for_index(opts: &DatasetOptions, size: (u32, u32), index: usize) -> Self {
        match opts.seed {
            Some(seed) => {
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed ^ index as u64);
                Self::sample(opts, size, &mut rng)
            }
            None => Self::sample(opts, size, &mut rand::rng()),
        }
    }
}

/// Resampling filter plus whether to normalize to [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub filter: FilterType,
    pub normalize: bool,
}

impl Transform {
    /// Bicubic resampling, normalized output.
    pub fn standard() -> Self {
        Self {
            filter: FilterType::CatmullRom,
            normalize: true,
        }
    }

    /// Nearest-neighbor resampling for label maps, no normalization.
    pub fn label() -> Self {
        Self {
            filter: FilterType::Nearest,
            normalize: false,
        }
    }

    pub fn apply_spatial(
        &self,
        img: DynamicImage,
        params: &TransformParams,
        opts: &DatasetOptions,
    ) -> DynamicImage {
        let mode = opts.preprocess_mode;
        let mut img = img;
        if mode.resizes() {
            img = img.resize_exact(opts.load_size, opts.load_size, self.filter);
        } else if mode.scales_width() {
            img = scale_width(img, opts.load_size, self.filter);
        } else if mode.scales_shortside() {
            img = scale_shortside(img, opts.load_size, self.filter);
        }
        if mode.crops() {
            img = crop_padded(&img, params.crop_pos, opts.crop_size);
        }
        if mode == PreprocessMode::None {
            img = make_power_2(img, POWER_BASE, self.filter);
        }
        if mode == PreprocessMode::Fixed {
            let w = opts.crop_size;
            let h = round_half_even(opts.crop_size as f64 / opts.aspect_ratio as f64).max(1);
            img = img.resize_exact(w, h, self.filter);
        }
        if opts.flips() && params.flip {
            img = img.fliph();
        }
        img
    }

    /// Spatial transform followed by conversion to a [0, 1] (or [-1, 1]) float tensor.
    pub fn apply(
        &self,
        img: DynamicImage,
        params: &TransformParams,
        opts: &DatasetOptions,
    ) -> SampleTensor {
        let img = self.apply_spatial(img, params, opts);
        let tensor = to_tensor(&img);
        if self.normalize {
            normalize(tensor)
        } else {
            tensor
        }
    }
}

/// Collapse any decoded image to the 8-bit variant with the same channel layout.
pub fn to_8bit(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
        DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb8(img.to_rgb8())
        }
        _ => DynamicImage::ImageRgba8(img.to_rgba8()),
    }
}

/// CHW tensor with 8-bit values scaled to [0, 1].
pub fn to_tensor(img: &DynamicImage) -> SampleTensor {
    let mut t = raw_tensor(img);
    if let crate::types::TensorValues::Float(v) = &mut t.values {
        for x in v.iter_mut() {
            *x /= 255.0;
        }
    }
    t
}

/// CHW tensor with the raw 0-255 values as f32. Expects an 8-bit image (see [`to_8bit`]).
pub fn raw_tensor(img: &DynamicImage) -> SampleTensor {
    let channels = img.color().channel_count() as usize;
    let (w, h) = (img.width() as usize, img.height() as usize);
    let bytes = img.as_bytes();
    let plane = w * h;
    let mut data = vec![0.0f32; channels * plane];
    for (i, px) in bytes.chunks_exact(channels).enumerate() {
        for (c, &v) in px.iter().enumerate() {
            data[c * plane + i] = v as f32;
        }
    }
    SampleTensor::float(channels, h, w, data)
}

/// `(x - 0.5) / 0.5` on every channel.
pub fn normalize(mut t: SampleTensor) -> SampleTensor {
    if let crate::types::TensorValues::Float(v) = &mut t.values {
        for x in v.iter_mut() {
            *x = (*x - 0.5) / 0.5;
        }
    }
    t
}

fn scaled(target: u32, num: u32, den: u32) -> u32 {
    ((target as u64 * num as u64) / den.max(1) as u64).max(1) as u32
}

fn shortside_size(w: u32, h: u32, target: u32) -> (u32, u32) {
    let (ss, ls) = (w.min(h), w.max(h));
    let ls = scaled(target, ls, ss);
    if w == ss {
        (target, ls)
    } else {
        (ls, target)
    }
}

fn scale_width(img: DynamicImage, target_width: u32, filter: FilterType) -> DynamicImage {
    let (ow, oh) = (img.width(), img.height());
    if ow == target_width {
        return img;
    }
    img.resize_exact(target_width, scaled(target_width, oh, ow), filter)
}

fn scale_shortside(img: DynamicImage, target: u32, filter: FilterType) -> DynamicImage {
    let (ow, oh) = (img.width(), img.height());
    if ow.min(oh) == target {
        return img;
    }
    let (nw, nh) = shortside_size(ow, oh, target);
    img.resize_exact(nw, nh, filter)
}

fn make_power_2(img: DynamicImage, base: u32, filter: FilterType) -> DynamicImage {
    let (ow, oh) = (img.width(), img.height());
    let round_to = |v: u32| (round_half_even(v as f64 / base as f64) * base).max(base);
    let (w, h) = (round_to(ow), round_to(oh));
    if w == ow && h == oh {
        return img;
    }
    img.resize_exact(w, h, filter)
}

/// Square crop at `pos`; regions past the image edge are zero-filled.
fn crop_padded(img: &DynamicImage, pos: (u32, u32), size: u32) -> DynamicImage {
    let (x, y) = pos;
    let fits = x.saturating_add(size) <= img.width() && y.saturating_add(size) <= img.height();
    if fits {
        return img.crop_imm(x, y, size, size);
    }
    let (dx, dy) = (-(x as i64), -(y as i64));
    // DynamicImage's pixel access goes through Rgba<u8>; keep 16-bit ids exact.
    if let DynamicImage::ImageLuma16(buf) = img {
        let mut canvas = ImageBuffer::<Luma<u16>, Vec<u16>>::new(size, size);
        image::imageops::replace(&mut canvas, buf, dx, dy);
        return DynamicImage::ImageLuma16(canvas);
    }
    let mut canvas = DynamicImage::new(size, size, img.color());
    image::imageops::replace(&mut canvas, img, dx, dy);
    canvas
}

fn round_half_even(v: f64) -> u32 {
    v.round_ties_even().max(0.0) as u32
}

#[cfg(test)]
mod transform_tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn opts(mode: PreprocessMode) -> DatasetOptions {
        DatasetOptions {
            preprocess_mode: mode,
            load_size: 8,
            crop_size: 4,
            seed: Some(3),
            ..Default::default()
        }
    }

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 10) as u8, (y * 10) as u8, 200])
        }))
    }

    #[test]
    fn crop_range_covers_resized_size() {
        let o = opts(PreprocessMode::ResizeAndCrop);
        for i in 0..64 {
            let p = TransformParams::for_index(&o, (100, 50), i);
            assert!(p.crop_pos.0 <= 4 && p.crop_pos.1 <= 4);
        }
    }

    #[test]
    fn scale_width_crop_range_follows_aspect() {
        let o = opts(PreprocessMode::ScaleWidthAndCrop);
        // 50x100 scales to 8x16.
        let mut max_y = 0;
        for i in 0..64 {
            let p = TransformParams::for_index(&o, (50, 100), i);
            assert!(p.crop_pos.0 <= 4, "x {} past 8 - 4", p.crop_pos.0);
            assert!(p.crop_pos.1 <= 12, "y {} past 16 - 4", p.crop_pos.1);
            max_y = max_y.max(p.crop_pos.1);
        }
        assert!(max_y > 4);

        // 100x50 scales to 8x4, leaving no vertical slack.
        for i in 0..16 {
            let p = TransformParams::for_index(&o, (100, 50), i);
            assert_eq!(p.crop_pos.1, 0);
        }
    }

    #[test]
    fn scale_shortside_crop_range_follows_long_side() {
        let o = opts(PreprocessMode::ScaleShortsideAndCrop);
        // 100x50: short side 50 -> 8, long side -> 16.
        let mut max_x = 0;
        for i in 0..64 {
            let p = TransformParams::for_index(&o, (100, 50), i);
            assert!(p.crop_pos.0 <= 12);
            assert!(p.crop_pos.1 <= 4);
            max_x = max_x.max(p.crop_pos.0);
        }
        assert!(max_x > 4);

        for i in 0..64 {
            let p = TransformParams::for_index(&o, (50, 100), i);
            assert!(p.crop_pos.0 <= 4);
            assert!(p.crop_pos.1 <= 12);
        }
    }

    #[test]
    fn seeded_params_are_deterministic() {
        let o = opts(PreprocessMode::ResizeAndCrop);
        assert_eq!(
            TransformParams::for_index(&o, (32, 32), 5),
            TransformParams::for_index(&o, (32, 32), 5)
        );
    }

    #[test]
    fn resize_and_crop_yields_crop_size() {
        let o = opts(PreprocessMode::ResizeAndCrop);
        let p = TransformParams {
            crop_pos: (2, 1),
            flip: false,
        };
        let t = Transform::standard().apply(gradient(20, 10), &p, &o);
        assert_eq!(t.shape(), [3, 4, 4]);
    }

    #[test]
    fn normalized_range_is_symmetric() {
        let o = opts(PreprocessMode::None);
        let p = TransformParams {
            crop_pos: (0, 0),
            flip: false,
        };
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        }));
        let t = Transform::standard().apply(img, &p, &o);
        let (lo, hi) = t.min_max().unwrap();
        assert!((lo + 1.0).abs() < 1e-6);
        assert!((hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn label_transform_keeps_raw_values_with_nearest() {
        let o = opts(PreprocessMode::Resize);
        let p = TransformParams {
            crop_pos: (0, 0),
            flip: false,
        };
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(4, 4, |x, _| {
            Luma([if x < 2 { 3 } else { 255 }])
        }));
        let spatial = Transform::label().apply_spatial(img, &p, &o);
        let t = raw_tensor(&spatial);
        assert_eq!(t.shape(), [1, 8, 8]);
        assert!(t.to_f32_vec().iter().all(|&v| v == 3.0 || v == 255.0));
    }

    #[test]
    fn flip_only_when_training() {
        let p = TransformParams {
            crop_pos: (0, 0),
            flip: true,
        };
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, _| Luma([x as u8])));
        let train = opts(PreprocessMode::None);
        let flipped = raw_tensor(&Transform::label().apply_spatial(img.clone(), &p, &train));
        assert_eq!(flipped.at(0, 0, 0), 31.0);

        let eval = DatasetOptions {
            is_train: false,
            ..opts(PreprocessMode::None)
        };
        let kept = raw_tensor(&Transform::label().apply_spatial(img, &p, &eval));
        assert_eq!(kept.at(0, 0, 0), 0.0);
    }

    #[test]
    fn crop_past_edge_is_zero_padded() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([9])));
        let out = raw_tensor(&crop_padded(&img, (2, 2), 4));
        assert_eq!(out.shape(), [1, 4, 4]);
        assert_eq!(out.at(0, 0, 0), 9.0);
        assert_eq!(out.at(0, 3, 3), 0.0);
    }

    #[test]
    fn padded_crop_keeps_16_bit_values() {
        let buf = ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(3, 3, Luma([1000]));
        let out = crop_padded(&DynamicImage::ImageLuma16(buf), (2, 2), 4);
        let DynamicImage::ImageLuma16(out) = out else {
            panic!("crop should keep the 16-bit layout");
        };
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0)[0], 1000);
        assert_eq!(out.get_pixel(3, 3)[0], 0);
    }

    #[test]
    fn make_power_2_rounds_to_base() {
        let img = gradient(50, 70);
        let out = make_power_2(img, 32, FilterType::Nearest);
        assert_eq!((out.width(), out.height()), (64, 64));
        let small = make_power_2(gradient(10, 10), 32, FilterType::Nearest);
        assert_eq!((small.width(), small.height()), (32, 32));
    }

    #[test]
    fn fixed_mode_uses_aspect_ratio() {
        let o = DatasetOptions {
            aspect_ratio: 2.0,
            ..opts(PreprocessMode::Fixed)
        };
        let p = TransformParams {
            crop_pos: (0, 0),
            flip: false,
        };
        let t = Transform::standard().apply(gradient(9, 9), &p, &o);
        assert_eq!(t.shape(), [3, 2, 4]);
    }

    #[test]
    fn scale_shortside_preserves_aspect() {
        let out = scale_shortside(gradient(20, 40), 10, FilterType::Nearest);
        assert_eq!((out.width(), out.height()), (10, 20));
        let wide = scale_shortside(gradient(40, 20), 10, FilterType::Nearest);
        assert_eq!((wide.width(), wide.height()), (20, 10));
    }
}
