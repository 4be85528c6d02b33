//! Batch iteration over a [`PairedDataset`], plus Burn integration.

use crate::dataset::PairedDataset;
use crate::types::{DatasetResult, PairedSample};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Shuffle sample order at construction and on every `reset`.
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            shuffle: true,
            seed: None,
            drop_last: false,
        }
    }
}

/// Loads batches of samples, decoding each batch in parallel on the rayon pool.
///
/// Samples within a batch keep the order of their indices.
pub struct SampleLoader<'a> {
    dataset: &'a PairedDataset,
    cfg: LoaderConfig,
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    processed_samples: usize,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    started: Instant,
}

impl<'a> SampleLoader<'a> {
    pub fn new(dataset: &'a PairedDataset, cfg: LoaderConfig) -> Self {
        let log_every_samples = match std::env::var("POSE_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.trim().parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let mut loader = Self {
            dataset,
            cfg,
            order: (0..dataset.len()).collect(),
            cursor: 0,
            epoch: 0,
            processed_samples: 0,
            last_logged_samples: 0,
            log_every_samples,
            started: Instant::now(),
        };
        loader.shuffle();
        loader
    }

    /// Index order for the current epoch.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start the next epoch, reshuffling if configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        self.order = (0..self.dataset.len()).collect();
        self.shuffle();
    }

    pub fn next_batch(&mut self) -> DatasetResult<Option<Vec<PairedSample>>> {
        let batch_size = self.cfg.batch_size.max(1);
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        if self.cfg.drop_last && end - self.cursor < batch_size {
            self.cursor = self.order.len();
            return Ok(None);
        }
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let dataset = self.dataset;
        let batch = slice
            .par_iter()
            .map(|&index| dataset.get(index))
            .collect::<DatasetResult<Vec<_>>>()?;

        self.processed_samples += batch.len();
        self.maybe_log();
        Ok(Some(batch))
    }

    fn shuffle(&mut self) {
        if !self.cfg.shuffle {
            return;
        }
        let mut rng = match self.cfg.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed ^ self.epoch),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        self.order.shuffle(&mut rng);
    }

    fn maybe_log(&mut self) {
        let Some(every) = self.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < every {
            return;
        }
        self.last_logged_samples = self.processed_samples;
        let elapsed = self.started.elapsed().as_secs_f32().max(f32::EPSILON);
        tracing::debug!(
            epoch = self.epoch,
            samples = self.processed_samples,
            total = self.order.len(),
            samples_per_sec = self.processed_samples as f32 / elapsed,
            "loader progress"
        );
    }
}

impl Iterator for SampleLoader<'_> {
    type Item = DatasetResult<Vec<PairedSample>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

#[cfg(feature = "burn-runtime")]
pub use self::burn_runtime::{PairedBatch, PairedBatcher};

#[cfg(feature = "burn-runtime")]
mod burn_runtime {
    use super::*;
    use crate::types::SampleTensor;
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::Dataset;
    use burn::tensor::{backend::Backend, Tensor, TensorData};
    use std::path::PathBuf;

    impl SampleTensor {
        /// Float tensor of shape `[C, H, W]`; integer values are widened.
        pub fn to_burn<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
            Tensor::from_data(TensorData::new(self.to_f32_vec(), self.shape()), device)
        }
    }

    impl Dataset<PairedSample> for PairedDataset {
        fn get(&self, index: usize) -> Option<PairedSample> {
            match PairedDataset::get(self, index) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping sample");
                    None
                }
            }
        }

        fn len(&self) -> usize {
            PairedDataset::len(self)
        }
    }

    #[derive(Debug, Clone)]
    pub struct PairedBatch<B: Backend> {
        pub pose: Tensor<B, 4>,
        pub pose_mask: Tensor<B, 4>,
        pub app: Tensor<B, 4>,
        pub image: Tensor<B, 4>,
        /// `None` unless every sample in the batch carries an instance map.
        pub instance: Option<Tensor<B, 4>>,
        pub paths: Vec<PathBuf>,
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct PairedBatcher;

    impl<B: Backend> Batcher<B, PairedSample, PairedBatch<B>> for PairedBatcher {
        fn batch(&self, items: Vec<PairedSample>, device: &B::Device) -> PairedBatch<B> {
            let pose = stack_field(&items, device, |s| &s.pose);
            let pose_mask = stack_field(&items, device, |s| &s.pose_mask);
            let app = stack_field(&items, device, |s| &s.app);
            let image = stack_field(&items, device, |s| &s.image);
            let instances: Option<Vec<Tensor<B, 3>>> = items
                .iter()
                .map(|s| s.instance.tensor().map(|t| t.to_burn(device)))
                .collect();
            let instance = instances
                .filter(|v| !v.is_empty())
                .map(|v| Tensor::stack(v, 0));
            PairedBatch {
                pose,
                pose_mask,
                app,
                image,
                instance,
                paths: items.iter().map(|s| s.path.clone()).collect(),
            }
        }
    }

    fn stack_field<B: Backend>(
        items: &[PairedSample],
        device: &B::Device,
        field: fn(&PairedSample) -> &SampleTensor,
    ) -> Tensor<B, 4> {
        Tensor::stack(items.iter().map(|s| field(s).to_burn(device)).collect(), 0)
    }
}
