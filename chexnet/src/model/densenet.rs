//! The DenseNet feature extractor in the torchvision variable layout.

use crate::common::*;

/// The DenseNet architecture options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DenseNetInit {
    pub input_channels: usize,
    pub init_features: usize,
    pub growth_rate: usize,
    pub bn_size: usize,
    /// The number of dense layers in each block.
    pub block_config: Vec<usize>,
}

impl DenseNetInit {
    /// The DenseNet121 architecture.
    pub fn densenet121() -> Self {
        Self {
            input_channels: 3,
            init_features: 64,
            growth_rate: 32,
            bn_size: 4,
            block_config: vec![6, 12, 24, 16],
        }
    }

    /// The number of output channels of the features.
    pub fn num_features(&self) -> usize {
        let Self {
            init_features,
            growth_rate,
            ref block_config,
            ..
        } = *self;

        block_config
            .iter()
            .enumerate()
            .fold(init_features, |c_in, (index, &num_layers)| {
                let c_out = c_in + num_layers * growth_rate;
                if index + 1 != block_config.len() {
                    c_out / 2
                } else {
                    c_out
                }
            })
    }

    /// Build the feature extractor under `path`, which is usually "features".
    pub fn build<'p, P>(self, path: P) -> Result<DenseNet, ConfigError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let num_features = self.num_features();
        let Self {
            input_channels,
            init_features,
            growth_rate,
            bn_size,
            ref block_config,
        } = self;

        crate::ensure_config!(input_channels > 0, "input_channels", "must be positive");
        crate::ensure_config!(init_features > 0, "init_features", "must be positive");
        crate::ensure_config!(growth_rate > 0, "growth_rate", "must be positive");
        crate::ensure_config!(bn_size > 0, "bn_size", "must be positive");
        crate::ensure_config!(
            !block_config.is_empty() && block_config.iter().all(|&n| n > 0),
            "block_config",
            "must be a non-empty list of positive numbers"
        );

        let mut seq = nn::seq_t()
            .add(conv2d(
                path / "conv0",
                input_channels as i64,
                init_features as i64,
                7,
                3,
                2,
            ))
            .add(nn::batch_norm2d(
                path / "norm0",
                init_features as i64,
                Default::default(),
            ))
            .add_fn(|xs| xs.relu())
            .add_fn(|xs| xs.max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false));

        let mut c_in = init_features;
        for (index, &num_layers) in block_config.iter().enumerate() {
            seq = seq.add(dense_block(
                path / format!("denseblock{}", index + 1),
                c_in,
                bn_size,
                growth_rate,
                num_layers,
            ));
            c_in += num_layers * growth_rate;

            if index + 1 != block_config.len() {
                seq = seq.add(transition(
                    path / format!("transition{}", index + 1),
                    c_in,
                    c_in / 2,
                ));
                c_in /= 2;
            }
        }

        let seq = seq
            .add(nn::batch_norm2d(path / "norm5", c_in as i64, Default::default()))
            .add_fn(|xs| xs.relu());

        debug_assert_eq!(c_in, num_features);

        Ok(DenseNet { seq, num_features })
    }
}

/// The DenseNet feature extractor.
///
/// It maps `[B, C, H, W]` images to `[B, F, H/32, W/32]` features.
#[derive(Debug)]
pub struct DenseNet {
    seq: nn::SequentialT,
    num_features: usize,
}

impl DenseNet {
    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

impl nn::ModuleT for DenseNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(xs, train)
    }
}

fn conv2d(
    path: nn::Path,
    c_in: i64,
    c_out: i64,
    ksize: i64,
    padding: i64,
    stride: i64,
) -> nn::Conv2D {
    let config = nn::ConvConfig {
        stride,
        padding,
        bias: false,
        ..Default::default()
    };
    nn::conv2d(&path, c_in, c_out, ksize, config)
}

fn dense_layer(path: nn::Path, c_in: usize, bn_size: usize, growth_rate: usize) -> impl nn::ModuleT {
    let c_inter = (bn_size * growth_rate) as i64;
    let (c_in, growth_rate) = (c_in as i64, growth_rate as i64);

    let norm1 = nn::batch_norm2d(&path / "norm1", c_in, Default::default());
    let conv1 = conv2d(&path / "conv1", c_in, c_inter, 1, 0, 1);
    let norm2 = nn::batch_norm2d(&path / "norm2", c_inter, Default::default());
    let conv2 = conv2d(&path / "conv2", c_inter, growth_rate, 3, 1, 1);

    nn::func_t(move |xs, train| {
        let ys = xs
            .apply_t(&norm1, train)
            .relu()
            .apply(&conv1)
            .apply_t(&norm2, train)
            .relu()
            .apply(&conv2);
        Tensor::cat(&[xs, &ys], 1)
    })
}

fn dense_block(
    path: nn::Path,
    c_in: usize,
    bn_size: usize,
    growth_rate: usize,
    num_layers: usize,
) -> nn::SequentialT {
    (0..num_layers).fold(nn::seq_t(), |seq, index| {
        seq.add(dense_layer(
            &path / format!("denselayer{}", index + 1),
            c_in + index * growth_rate,
            bn_size,
            growth_rate,
        ))
    })
}

fn transition(path: nn::Path, c_in: usize, c_out: usize) -> nn::SequentialT {
    nn::seq_t()
        .add(nn::batch_norm2d(&path / "norm", c_in as i64, Default::default()))
        .add_fn(|xs| xs.relu())
        .add(conv2d(&path / "conv", c_in as i64, c_out as i64, 1, 0, 1))
        .add_fn(|xs| xs.avg_pool2d_default(2))
}
