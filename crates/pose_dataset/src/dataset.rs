//! The paired pose/appearance dataset: path resolution at construction, lazy
//! image loading per `get`.

use crate::manifest;
use crate::options::DatasetOptions;
use crate::paths::{PathLayout, ResolvedPaths};
use crate::transform::{raw_tensor, to_8bit, Transform, TransformParams};
use crate::types::{
    DatasetResult, InstanceMap, PairedSample, PoseDatasetError, SampleTensor, TensorValues,
};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Raw label value treated as "unknown"; remapped to [`UNKNOWN_LABEL`].
const RAW_UNKNOWN_LABEL: f32 = 255.0;
const UNKNOWN_LABEL: f32 = 1.0;

/// Final step applied to every sample before `get` returns it.
pub trait SamplePostprocess: Send + Sync {
    fn postprocess(&self, sample: PairedSample) -> DatasetResult<PairedSample>;

    /// Run `self`, then `next`.
    fn then<P: SamplePostprocess>(self, next: P) -> Chain<Self, P>
    where
        Self: Sized,
    {
        Chain(self, next)
    }
}

/// Returns samples unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl SamplePostprocess for Identity {
    fn postprocess(&self, sample: PairedSample) -> DatasetResult<PairedSample> {
        Ok(sample)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chain<A, B>(A, B);

impl<A: SamplePostprocess, B: SamplePostprocess> SamplePostprocess for Chain<A, B> {
    fn postprocess(&self, sample: PairedSample) -> DatasetResult<PairedSample> {
        self.1.postprocess(self.0.postprocess(sample)?)
    }
}

impl<F> SamplePostprocess for F
where
    F: Fn(PairedSample) -> DatasetResult<PairedSample> + Send + Sync,
{
    fn postprocess(&self, sample: PairedSample) -> DatasetResult<PairedSample> {
        self(sample)
    }
}

pub struct PairedDatasetBuilder {
    opts: DatasetOptions,
    postprocess: Arc<dyn SamplePostprocess>,
}

impl PairedDatasetBuilder {
    pub fn new(opts: DatasetOptions) -> Self {
        Self {
            opts,
            postprocess: Arc::new(Identity),
        }
    }

    pub fn postprocess<P: SamplePostprocess + 'static>(mut self, hook: P) -> Self {
        self.postprocess = Arc::new(hook);
        self
    }

    pub fn build(self) -> DatasetResult<PairedDataset> {
        let opts = self.opts;
        opts.validate().map_err(|msg| PoseDatasetError::Config {
            path: opts.ann_file.clone(),
            msg,
        })?;

        let rows = manifest::load_rows(&opts.ann_file, opts.filter_list.as_deref())?;
        let layout = PathLayout::from_options(&opts);
        let mut paths = ResolvedPaths::resolve(&rows, &layout, !opts.no_instance, &opts.ann_file)?;
        paths.sort_natural(opts.sort_order);
        paths.truncate(opts.max_dataset_size);
        if !opts.no_pairing_check {
            paths.check_pairing()?;
        }
        let dataset_size = paths.len()?;
        tracing::info!(
            dataroot = %opts.dataroot.display(),
            prefix = layout.prefix(),
            samples = dataset_size,
            instance = paths.has_instance(),
            "paired dataset ready"
        );

        Ok(PairedDataset {
            opts,
            paths,
            dataset_size,
            postprocess: self.postprocess,
        })
    }
}

/// Index-addressable dataset of aligned pose / mask / appearance / target samples.
///
/// Holds only immutable state after construction; `get` may be called from
/// many threads at once.
pub struct PairedDataset {
    opts: DatasetOptions,
    paths: ResolvedPaths,
    dataset_size: usize,
    postprocess: Arc<dyn SamplePostprocess>,
}

impl fmt::Debug for PairedDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedDataset")
            .field("dataroot", &self.opts.dataroot)
            .field("dataset_size", &self.dataset_size)
            .field("instance", &self.paths.has_instance())
            .finish_non_exhaustive()
    }
}

impl PairedDataset {
    pub fn new(opts: DatasetOptions) -> DatasetResult<Self> {
        PairedDatasetBuilder::new(opts).build()
    }

    pub fn builder(opts: DatasetOptions) -> PairedDatasetBuilder {
        PairedDatasetBuilder::new(opts)
    }

    pub fn len(&self) -> usize {
        self.dataset_size
    }

    pub fn is_empty(&self) -> bool {
        self.dataset_size == 0
    }

    pub fn options(&self) -> &DatasetOptions {
        &self.opts
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn get(&self, index: usize) -> DatasetResult<PairedSample> {
        if index >= self.dataset_size {
            return Err(PoseDatasetError::IndexOutOfRange {
                index,
                len: self.dataset_size,
            });
        }
        let opts = &self.opts;

        let pose_mask = open_image(&self.paths.pose_mask[index])?;
        let params =
            TransformParams::for_index(opts, (pose_mask.width(), pose_mask.height()), index);
        let mask_transform = if opts.label_nc == 0 {
            Transform::standard()
        } else {
            Transform::label()
        };
        let pose_mask = if opts.label_nc == 0 {
            let rgb = DynamicImage::ImageRgb8(pose_mask.to_rgb8());
            mask_transform.apply(rgb, &params, opts)
        } else {
            label_map(&mask_transform.apply_spatial(pose_mask, &params, opts))
        };

        let standard = Transform::standard();
        let pose = standard.apply(open_image(&self.paths.pose[index])?, &params, opts);
        let app = standard.apply(open_image(&self.paths.app[index])?, &params, opts);

        let image_path = &self.paths.image[index];
        let image = open_image(image_path)?;
        let image = standard.apply(DynamicImage::ImageRgb8(image.to_rgb8()), &params, opts);

        let instance = if opts.no_instance || !self.paths.has_instance() {
            InstanceMap::Absent
        } else {
            let inst = decode_native(&self.paths.instance[index])?;
            let tensor = match inst {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
                    instance_ids(&Transform::label().apply_spatial(inst, &params, opts))
                }
                other => mask_transform.apply(to_8bit(other), &params, opts),
            };
            InstanceMap::Present(tensor)
        };

        let sample = PairedSample {
            pose,
            pose_mask,
            app,
            instance,
            image,
            path: image_path.clone(),
            extra: BTreeMap::new(),
        };
        self.postprocess.postprocess(sample)
    }
}

/// Decode to 8 bits per channel.
fn open_image(path: &Path) -> DatasetResult<DynamicImage> {
    decode_native(path).map(to_8bit)
}

/// Decode by content rather than extension; masks are often stored under `.jpg` names.
/// Keeps the stored bit depth.
fn decode_native(path: &Path) -> DatasetResult<DynamicImage> {
    let reader = image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| PoseDatasetError::io(path, e))?;
    reader
        .decode()
        .map_err(|e| PoseDatasetError::image(path, e))
}

/// Raw 0-255 label values with the reserved unknown value remapped.
fn label_map(img: &DynamicImage) -> SampleTensor {
    let mut t = raw_tensor(img);
    if let TensorValues::Float(v) = &mut t.values {
        for x in v.iter_mut().filter(|x| **x == RAW_UNKNOWN_LABEL) {
            *x = UNKNOWN_LABEL;
        }
    }
    t
}

/// Single-channel instance ids as integers, at the stored bit depth.
fn instance_ids(img: &DynamicImage) -> SampleTensor {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let ids = match img {
        DynamicImage::ImageLuma16(buf) => buf.as_raw().iter().map(|&v| i64::from(v)).collect(),
        other => other.to_luma8().into_raw().into_iter().map(i64::from).collect(),
    };
    SampleTensor::int(1, h, w, ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    #[test]
    fn unknown_label_is_remapped() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(2, 1, |x, _| {
            Luma([if x == 0 { 255 } else { 7 }])
        }));
        let t = label_map(&img);
        assert_eq!(t.as_f32().unwrap(), &[1.0, 7.0]);
    }

    #[test]
    fn instance_ids_are_integers() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([42])));
        let t = instance_ids(&img);
        assert_eq!(t.as_i64().unwrap(), &[42, 42, 42, 42]);
    }

    #[test]
    fn wide_instance_ids_survive() {
        let img = DynamicImage::ImageLuma16(ImageBuffer::from_fn(2, 1, |x, _| {
            Luma([if x == 0 { 1000u16 } else { 1100 }])
        }));
        let t = instance_ids(&img);
        assert_eq!(t.shape(), [1, 1, 2]);
        assert_eq!(t.as_i64().unwrap(), &[1000, 1100]);
    }

    #[test]
    fn hooks_compose_in_order() {
        let add = |mut s: PairedSample| -> DatasetResult<PairedSample> {
            s.extra.insert("first".into(), s.image.clone());
            Ok(s)
        };
        let drop_instance = |mut s: PairedSample| -> DatasetResult<PairedSample> {
            assert!(s.extra.contains_key("first"));
            s.instance = InstanceMap::Absent;
            Ok(s)
        };
        let hook = Identity.then(add).then(drop_instance);
        let t = SampleTensor::float(1, 1, 1, vec![0.0]);
        let sample = PairedSample {
            pose: t.clone(),
            pose_mask: t.clone(),
            app: t.clone(),
            instance: InstanceMap::Present(t.clone()),
            image: t,
            path: "x.jpg".into(),
            extra: BTreeMap::new(),
        };
        let out = hook.postprocess(sample).unwrap();
        assert!(out.instance.is_absent());
        assert!(out.field_names().contains(&"first"));
    }
}
