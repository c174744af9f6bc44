//! The training program for the chest X-ray classifier.

pub mod common;
pub mod config;
pub mod data;
pub mod logging;
pub mod train;
pub mod utils;

use crate::{common::*, config::Config, data::TrainingData};
use tokio::runtime::Handle;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// Messages at INFO level and above are shown unless `RUST_LOG` is set.
pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if std::env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// The entry of training program.
pub async fn start(config: Arc<Config>) -> Result<()> {
    let start_time = Local::now();
    let logging_dir: Arc<Path> = {
        let dir = config
            .logging
            .dir
            .join(format!("{}", start_time.format(utils::FILE_STRFTIME)));
        dir.into_boxed_path().into()
    };

    // create dirs and save config
    {
        tokio::fs::create_dir_all(&*logging_dir).await?;
        let path = logging_dir.join("config.json5");
        let text = serde_json::to_string_pretty(&*config)?;
        tokio::fs::write(&path, text).await?;
    }
    info!("logging to '{}'", logging_dir.display());

    // create channels
    let (logging_tx, logging_rx) = broadcast::channel(16);

    // load dataset
    info!("loading dataset");
    let data = {
        let config = config.clone();
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || TrainingData::new(&config, handle)).await??
    };
    info!(
        "{} training images in {} batches",
        data.num_train_records,
        data.train.num_batches()
    );

    // start logger
    let logging_future = logging::logging_worker(logging_dir.clone(), logging_rx).await?;

    // training worker
    let training_worker_future = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || train::training_worker(config, data, logging_tx))
            .map(|result| Fallible::Ok(result??))
    };

    let (summary, ()) = futures::try_join!(training_worker_future, logging_future)?;
    info!(
        "training finished after {} epochs, best auroc {:?}, early stopped: {}",
        summary.completed_epochs, summary.best_auroc, summary.early_stopped
    );

    Ok(())
}
