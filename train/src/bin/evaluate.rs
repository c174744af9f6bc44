use anyhow::{format_err, Context, Result};
use chexnet::{metrics::Evaluator, Mode};
use std::{path::PathBuf, str::FromStr, sync::Arc};
use structopt::StructOpt;
use tch::nn;
use tokio::runtime::Handle;
use tracing::{info, info_span, warn, Instrument};
use train::{config::Config, data};

/// The split to be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Split {
    Val,
    Test,
    All,
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let split = match text {
            "val" => Self::Val,
            "test" => Self::Test,
            "all" => Self::All,
            _ => {
                return Err(format_err!(
                    "invalid split '{}', expect 'val', 'test' or 'all'",
                    text
                ))
            }
        };
        Ok(split)
    }
}

#[derive(Debug, Clone, StructOpt)]
/// Evaluate a trained checkpoint of the chest X-ray classifier
struct Args {
    #[structopt(long, default_value = "train.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(long)]
    /// checkpoint file, the configured checkpoint file by default
    pub checkpoint_file: Option<PathBuf>,
    #[structopt(long, default_value = "test")]
    /// the split to evaluate: val, test or all
    pub split: Split,
    #[structopt(long)]
    /// write the report to this JSON file
    pub output: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    train::init_tracing();

    let Args {
        config_file,
        checkpoint_file,
        split,
        output,
    } = Args::from_args();
    let config = Arc::new(
        Config::open(&config_file)
            .with_context(|| format!("failed to load config file '{}'", config_file.display()))?,
    );
    let checkpoint_file =
        checkpoint_file.unwrap_or_else(|| config.training.checkpoint_file.clone());

    let handle = Handle::current();
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let data_split = data::load_split(&config)?;
        let records = match split {
            Split::Val => data_split.val,
            Split::Test => data_split.test,
            Split::All => {
                let mut records = data_split.train;
                records.extend(data_split.val);
                records.extend(data_split.test);
                records
            }
        };
        info!("evaluate {} images of the {:?} split", records.len(), split);

        let transform = Arc::new(config.preprocessor.transform_init().build()?);
        let loader = data::build_loader(&config, records, transform, Mode::Eval, handle)?
            .ok_or_else(|| format_err!("the {:?} split is empty", split))?;

        let mut vs = nn::VarStore::new(config.training.device);
        let model = config.model.model_init().build(&vs.root())?;
        // checkpoints carry the training state too
        let _state = train::utils::TrainingState::new(&vs.root());
        vs.load(&checkpoint_file).with_context(|| {
            format!("failed to load checkpoint '{}'", checkpoint_file.display())
        })?;
        info!("loaded checkpoint '{}'", checkpoint_file.display());

        let evaluator = Evaluator::new(
            config.evaluation.thresholds.clone().build()?,
            config.evaluation.target_finding,
        );
        let mut batches = loader.epoch(0);
        let report = evaluator.run(&model, None, &mut batches)?;
        if batches.num_skipped() > 0 {
            warn!(
                "{} samples skipped due to image loading failures",
                batches.num_skipped()
            );
        }
        Ok(report)
    })
    .instrument(info_span!("evaluate"))
    .await??;

    report.log("evaluation");

    if let Some(output) = output {
        let text = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&output, text)
            .await
            .with_context(|| format!("failed to write report '{}'", output.display()))?;
        info!("report saved to '{}'", output.display());
    }

    Ok(())
}
