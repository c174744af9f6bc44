//! The parallel batch loader.

use super::*;
use crate::common::*;
use futures::stream::BoxStream;
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

/// A batch of preprocessed samples.
#[derive(Debug, TensorLike)]
pub struct Batch {
    #[tensor_like(copy)]
    pub epoch: usize,
    /// The batch index within the epoch.
    #[tensor_like(copy)]
    pub step: usize,
    #[tensor_like(clone)]
    pub identifiers: Vec<String>,
    /// The `[B, 3, S, S]` images.
    pub images: Tensor,
    /// The `[B, 14]` binary targets.
    pub targets: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Pack samples into a batch on the device.
    pub fn collate(
        epoch: usize,
        step: usize,
        samples: Vec<Sample>,
        device: Device,
    ) -> Result<Self, ResourceError> {
        let batch_size = samples.len() as i64;
        let (identifiers, images, targets) = samples.into_iter().fold(
            (vec![], vec![], vec![]),
            |(mut identifiers, mut images, mut targets), sample| {
                let Sample {
                    identifier,
                    image,
                    label,
                } = sample;
                identifiers.push(identifier);
                images.push(image);
                targets.extend(label.to_f32());
                (identifiers, images, targets)
            },
        );

        let (images, targets) = tch::no_grad(|| -> Result<_, tch::TchError> {
            let images = Tensor::f_stack(&images, 0)?.f_to_device(device)?;
            let targets = Tensor::of_slice(&targets)
                .f_view([batch_size, NUM_FINDINGS as i64])?
                .f_to_device(device)?;
            Ok((images, targets))
        })
        .map_err(|err| match ResourceError::classify(err) {
            Ok(err) => err,
            Err(err) => ResourceError::new(format!("failed to collate batch: {}", err)),
        })?;

        Ok(Self {
            epoch,
            step,
            identifiers,
            images,
            targets,
        })
    }
}

/// Options of [BatchLoader].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoaderInit {
    pub batch_size: usize,
    pub mode: Mode,
    /// Seed of shuffling and augmentation. They are not reproducible if unset.
    pub seed: Option<u64>,
    /// The number of parallel workers. It defaults to the number of CPUs if unset.
    pub num_workers: Option<usize>,
    /// The number of finished batches buffered ahead of the consumer.
    pub prefetch: usize,
    /// Discard a trailing partial batch in training mode.
    pub drop_last: bool,
    pub device: Device,
}

impl BatchLoaderInit {
    pub fn new(batch_size: usize, mode: Mode) -> Self {
        Self {
            batch_size,
            mode,
            seed: None,
            num_workers: None,
            prefetch: 2,
            drop_last: false,
            device: Device::Cpu,
        }
    }

    /// Build the loader. Batches are produced by tasks spawned on `handle`.
    pub fn build<D>(self, dataset: Arc<D>, handle: Handle) -> Result<BatchLoader<D>, ConfigError>
    where
        D: 'static + RandomAccessDataset,
    {
        let Self {
            batch_size,
            mode,
            seed,
            num_workers,
            prefetch,
            drop_last,
            device,
        } = self;

        crate::ensure_config!(batch_size > 0, "batch_size", "must be positive");
        crate::ensure_config!(prefetch > 0, "prefetch", "must be positive");
        crate::ensure_config!(
            num_workers != Some(0),
            "num_workers",
            "must be positive if set"
        );

        Ok(BatchLoader {
            dataset,
            handle,
            batch_size,
            mode,
            seed,
            num_workers: num_workers.unwrap_or_else(num_cpus::get),
            prefetch,
            drop_last: drop_last && mode.is_train(),
            device,
        })
    }
}

/// Produces batches of a dataset epoch by epoch.
#[derive(Debug)]
pub struct BatchLoader<D>
where
    D: RandomAccessDataset,
{
    dataset: Arc<D>,
    handle: Handle,
    batch_size: usize,
    mode: Mode,
    seed: Option<u64>,
    num_workers: usize,
    prefetch: usize,
    drop_last: bool,
    device: Device,
}

impl<D> BatchLoader<D>
where
    D: 'static + RandomAccessDataset,
{
    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_records(&self) -> usize {
        self.dataset.num_records()
    }

    /// The number of batches per epoch if no sample is skipped.
    pub fn num_batches(&self) -> usize {
        let num_records = self.dataset.num_records();
        if self.drop_last {
            num_records / self.batch_size
        } else {
            (num_records + self.batch_size - 1) / self.batch_size
        }
    }

    /// Start producing the batches of an epoch.
    ///
    /// The loader can be restarted any number of times. Batches come in a
    /// fixed order in evaluation mode, and in a new random order per epoch
    /// in training mode.
    pub fn epoch(&self, epoch: usize) -> EpochBatches {
        let (tx, rx) = mpsc::channel(self.prefetch);
        let num_skipped = Arc::new(AtomicUsize::new(0));
        let mut stream = self.batch_stream(epoch, num_skipped.clone());

        let producer = self.handle.spawn(async move {
            while let Some(result) = stream.next().await {
                let is_err = result.is_err();
                if tx.send(result).await.is_err() {
                    debug!("batch consumer of epoch {} is gone", epoch);
                    break;
                }
                if is_err {
                    break;
                }
            }
        });

        EpochBatches {
            epoch,
            rx,
            num_skipped,
            producer,
        }
    }

    fn sample_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.num_records()).collect();
        if self.mode.is_train() {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => StdRng::from_entropy(),
            };
            order.shuffle(&mut rng);
        }
        order
    }

    fn batch_stream(
        &self,
        epoch: usize,
        num_skipped: Arc<AtomicUsize>,
    ) -> BoxStream<'static, Result<Batch, ResourceError>> {
        let Self {
            batch_size,
            mode,
            seed,
            num_workers,
            drop_last,
            device,
            ..
        } = *self;
        let order = self.sample_order(epoch);

        let load_fn = {
            let dataset = self.dataset.clone();
            move |index: usize| {
                let dataset = dataset.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        let mut rng = match seed {
                            Some(seed) => StdRng::seed_from_u64(sample_seed(seed, epoch, index)),
                            None => StdRng::from_entropy(),
                        };
                        dataset.nth(index, mode, &mut rng)
                    })
                    .await
                }
            }
        };

        let samples = match mode {
            Mode::Train => stream::iter(order)
                .par_then_unordered(Some(num_workers), load_fn)
                .boxed(),
            Mode::Eval => stream::iter(order)
                .par_then(Some(num_workers), load_fn)
                .boxed(),
        };

        samples
            .filter_map(move |result| {
                let num_skipped = num_skipped.clone();
                async move {
                    match result {
                        Ok(Ok(sample)) => Some(Ok(sample)),
                        Ok(Err(err)) => {
                            warn!("skip sample: {}", err);
                            num_skipped.fetch_add(1, atomic::Ordering::SeqCst);
                            None
                        }
                        Err(err) => Some(Err(ResourceError::new(format!(
                            "sample loading worker failed: {}",
                            err
                        )))),
                    }
                }
            })
            .chunks(batch_size)
            .enumerate()
            .filter_map(move |(step, chunk)| async move {
                if drop_last && chunk.len() < batch_size {
                    return None;
                }
                let result = chunk
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .and_then(|samples| Batch::collate(epoch, step, samples, device));
                Some(result)
            })
            .boxed()
    }
}

/// The batches of one epoch, received from the loader workers.
///
/// Dropping it stops the workers.
#[derive(Debug)]
pub struct EpochBatches {
    epoch: usize,
    rx: mpsc::Receiver<Result<Batch, ResourceError>>,
    num_skipped: Arc<AtomicUsize>,
    producer: JoinHandle<()>,
}

impl EpochBatches {
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// The number of samples skipped so far due to [ImageLoadError].
    pub fn num_skipped(&self) -> usize {
        self.num_skipped.load(atomic::Ordering::SeqCst)
    }

    /// Receive the next batch.
    pub async fn recv(&mut self) -> Option<Result<Batch, ResourceError>> {
        self.rx.recv().await
    }

    /// Receive the next batch, blocking the current thread.
    ///
    /// It must not be called from an asynchronous context.
    pub fn blocking_recv(&mut self) -> Option<Result<Batch, ResourceError>> {
        self.rx.blocking_recv()
    }
}

impl Iterator for EpochBatches {
    type Item = Result<Batch, ResourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocking_recv()
    }
}

impl Drop for EpochBatches {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

fn sample_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Produces constant images and fails on the given indexes.
    #[derive(Debug)]
    struct FakeDataset {
        num_records: usize,
        corrupted: HashSet<usize>,
    }

    impl GenericDataset for FakeDataset {
        fn image_size(&self) -> usize {
            2
        }
    }

    impl RandomAccessDataset for FakeDataset {
        fn num_records(&self) -> usize {
            self.num_records
        }

        fn nth(
            &self,
            index: usize,
            _mode: Mode,
            _rng: &mut StdRng,
        ) -> Result<Sample, ImageLoadError> {
            if self.corrupted.contains(&index) {
                return Err(ImageLoadError::new(
                    format!("{}.png", index),
                    "corrupted file",
                ));
            }
            let finding = Finding::from_index(index % NUM_FINDINGS).unwrap();
            Ok(Sample {
                identifier: index.to_string(),
                image: Tensor::full(&[3, 2, 2], index as f64, (Kind::Float, Device::Cpu)),
                label: [finding].into_iter().collect::<LabelSet>().to_vector(),
            })
        }
    }

    fn fake_loader(
        num_records: usize,
        corrupted: &[usize],
        init: BatchLoaderInit,
    ) -> BatchLoader<FakeDataset> {
        let dataset = FakeDataset {
            num_records,
            corrupted: corrupted.iter().copied().collect(),
        };
        init.build(Arc::new(dataset), Handle::current()).unwrap()
    }

    async fn collect_epoch(loader: &BatchLoader<FakeDataset>, epoch: usize) -> (Vec<Batch>, usize) {
        let mut batches = loader.epoch(epoch);
        let mut output = vec![];
        while let Some(batch) = batches.recv().await {
            output.push(batch.unwrap());
        }
        (output, batches.num_skipped())
    }

    fn identifiers(batches: &[Batch]) -> Vec<usize> {
        batches
            .iter()
            .flat_map(|batch| batch.identifiers.iter())
            .map(|id| id.parse().unwrap())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eval_order_is_fixed() {
        let init = BatchLoaderInit {
            num_workers: Some(4),
            ..BatchLoaderInit::new(8, Mode::Eval)
        };
        let loader = fake_loader(30, &[], init);
        assert_eq!(loader.num_batches(), 4);

        let (first, _) = collect_epoch(&loader, 0).await;
        let (second, _) = collect_epoch(&loader, 0).await;
        let (third, _) = collect_epoch(&loader, 1).await;

        let expect: Vec<usize> = (0..30).collect();
        assert_eq!(identifiers(&first), expect);
        assert_eq!(identifiers(&second), expect);
        assert_eq!(identifiers(&third), expect);

        // the last batch is partial
        assert_eq!(
            first.iter().map(|batch| batch.len()).collect::<Vec<_>>(),
            [8, 8, 8, 6]
        );
        assert_eq!(
            first.iter().map(|batch| batch.step).collect::<Vec<_>>(),
            [0, 1, 2, 3]
        );

        // images and targets follow the sample order
        let batch = &first[1];
        assert_eq!(batch.images.size(), [8, 3, 2, 2]);
        assert_eq!(batch.targets.size(), [8, NUM_FINDINGS as i64]);
        assert_eq!(batch.images.double_value(&[0, 0, 0, 0]), 8.0);
        assert_eq!(batch.targets.double_value(&[0, 8]), 1.0);
        assert_eq!(batch.targets.double_value(&[0, 0]), 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn train_order_is_shuffled() {
        let init = BatchLoaderInit {
            seed: Some(42),
            num_workers: Some(1),
            ..BatchLoaderInit::new(16, Mode::Train)
        };
        let loader = fake_loader(64, &[], init);

        let (first, _) = collect_epoch(&loader, 0).await;
        let (second, _) = collect_epoch(&loader, 1).await;
        let first = identifiers(&first);
        let second = identifiers(&second);

        assert_ne!(first, second);
        assert_ne!(first, (0..64).collect::<Vec<_>>());

        // every sample appears once per epoch
        let sorted = |ids: &[usize]| ids.iter().copied().sorted().collect::<Vec<_>>();
        assert_eq!(sorted(&first), (0..64).collect::<Vec<_>>());
        assert_eq!(sorted(&second), (0..64).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn skip_corrupted_samples() {
        let init = BatchLoaderInit {
            num_workers: Some(2),
            ..BatchLoaderInit::new(4, Mode::Eval)
        };
        let loader = fake_loader(10, &[3, 7], init);

        let (batches, num_skipped) = collect_epoch(&loader, 0).await;
        assert_eq!(num_skipped, 2);
        assert_eq!(identifiers(&batches), [0, 1, 2, 4, 5, 6, 8, 9]);
        assert_eq!(
            batches.iter().map(|batch| batch.len()).collect::<Vec<_>>(),
            [4, 4]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drop_last_batch() {
        let init = BatchLoaderInit {
            seed: Some(0),
            drop_last: true,
            ..BatchLoaderInit::new(4, Mode::Train)
        };
        let loader = fake_loader(10, &[], init);
        assert_eq!(loader.num_batches(), 2);

        let (batches, _) = collect_epoch(&loader, 0).await;
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|batch| batch.len() == 4));

        // evaluation never drops samples
        let init = BatchLoaderInit {
            drop_last: true,
            ..BatchLoaderInit::new(4, Mode::Eval)
        };
        let loader = fake_loader(10, &[], init);
        let (batches, _) = collect_epoch(&loader, 0).await;
        assert_eq!(identifiers(&batches).len(), 10);
    }

    #[tokio::test]
    async fn reject_invalid_options() {
        let dataset = Arc::new(FakeDataset {
            num_records: 1,
            corrupted: HashSet::new(),
        });
        let err = BatchLoaderInit::new(0, Mode::Train)
            .build(dataset.clone(), Handle::current())
            .unwrap_err();
        assert_eq!(err.field, "batch_size");

        let err = BatchLoaderInit {
            prefetch: 0,
            ..BatchLoaderInit::new(1, Mode::Train)
        }
        .build(dataset, Handle::current())
        .unwrap_err();
        assert_eq!(err.field, "prefetch");
    }
}
