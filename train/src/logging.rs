//! Data logging toolkit.

use crate::{common::*, utils::RateCounter};
use async_std::{fs::File, io::BufWriter};

pub use logging_message::*;
pub use logging_worker::*;

mod logging_worker {
    use super::*;

    /// The data logging worker writing TensorBoard events.
    #[derive(Debug)]
    pub struct LoggingWorker {
        event_writer: EventWriter<BufWriter<File>>,
        rate_counter: RateCounter,
        rx: broadcast::Receiver<LoggingMessage>,
    }

    impl LoggingWorker {
        /// Create a data logging worker.
        async fn new(logging_dir: &Path, rx: broadcast::Receiver<LoggingMessage>) -> Result<Self> {
            // prepare dirs
            let event_dir = logging_dir.join("events");
            let event_path_prefix = event_dir
                .join("chexnet")
                .into_os_string()
                .into_string()
                .map_err(|path| format_err!("non-UTF-8 logging path {:?}", path))?;

            tokio::fs::create_dir_all(&event_dir).await?;

            let event_writer = EventWriterInit::default()
                .from_prefix_async(event_path_prefix, None)
                .await?;

            Ok(Self {
                event_writer,
                rate_counter: RateCounter::new(Duration::from_secs(60)),
                rx,
            })
        }

        /// Start the data logging worker.
        async fn start(mut self) -> Result<()> {
            loop {
                let LoggingMessage { tag, kind } = match self.rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(num)) => {
                        warn!("logging worker dropped {} messages", num);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                self.rate_counter.add(1.0);

                match kind {
                    LoggingMessageKind::TrainingStep(msg) => {
                        self.log_training_step(&tag, msg).await?;
                    }
                    LoggingMessageKind::Evaluation(msg) => {
                        self.log_evaluation(&tag, msg).await?;
                    }
                }

                if let Some(rate) = self.rate_counter.rate() {
                    debug!("logged {:.2} events/s", rate);
                }
            }

            info!("logging worker finished");
            Ok(())
        }

        async fn log_training_step(&mut self, tag: &str, msg: TrainingStepLog) -> Result<()> {
            let TrainingStepLog {
                step,
                epoch,
                lr,
                loss,
                running_loss,
            } = msg;
            let step = step as i64;

            self.write_scalar(format!("{}/params/learning_rate", tag), step, lr)
                .await?;
            self.write_scalar(format!("{}/params/epoch", tag), step, epoch as f64)
                .await?;
            self.write_scalar(format!("{}/loss/batch_loss", tag), step, loss)
                .await?;
            self.write_scalar(format!("{}/loss/running_loss", tag), step, running_loss)
                .await?;
            Ok(())
        }

        async fn log_evaluation(&mut self, tag: &str, msg: EvaluationLog) -> Result<()> {
            let EvaluationLog { step, report } = msg;
            let step = step as i64;

            if let Some(loss) = report.mean_loss {
                self.write_scalar(format!("{}/loss", tag), step, loss).await?;
            }
            if let Some(auroc) = report.macro_auroc {
                self.write_scalar(format!("{}/macro/auroc", tag), step, auroc)
                    .await?;
            }
            for (name, value) in [
                ("accuracy", report.macro_accuracy),
                ("precision", report.macro_precision),
                ("recall", report.macro_recall),
                ("f1", report.macro_f1),
            ] {
                self.write_scalar(format!("{}/macro/{}", tag, name), step, value)
                    .await?;
            }

            for class in &report.classes {
                let finding = class.finding.name();
                if let Some(auroc) = class.auroc {
                    self.write_scalar(format!("{}/auroc/{}", tag, finding), step, auroc)
                        .await?;
                }
                self.write_scalar(format!("{}/f1/{}", tag, finding), step, class.f1)
                    .await?;
                self.write_scalar(
                    format!("{}/precision/{}", tag, finding),
                    step,
                    class.precision,
                )
                .await?;
                self.write_scalar(format!("{}/recall/{}", tag, finding), step, class.recall)
                    .await?;
            }

            if let Some(best) = &report.best_threshold {
                let finding = best.finding.name();
                self.write_scalar(
                    format!("{}/best_threshold/{}", tag, finding),
                    step,
                    best.threshold,
                )
                .await?;
                self.write_scalar(format!("{}/best_f1/{}", tag, finding), step, best.f1)
                    .await?;
            }

            Ok(())
        }

        async fn write_scalar(&mut self, tag: String, step: i64, value: f64) -> Result<()> {
            self.event_writer
                .write_scalar_async(tag, step, value as f32)
                .await?;
            Ok(())
        }
    }

    /// Start the logging worker and return the future of its completion.
    ///
    /// The worker finishes once all senders are dropped.
    pub async fn logging_worker(
        logging_dir: Arc<Path>,
        rx: broadcast::Receiver<LoggingMessage>,
    ) -> Result<impl Future<Output = Result<()>> + Send> {
        let worker = LoggingWorker::new(&logging_dir, rx).await?;
        Ok(tokio::task::spawn(worker.start()).map(|result| Fallible::Ok(result??)))
    }
}

mod logging_message {
    use super::*;

    /// The message type that is accepted by the logging worker.
    #[derive(Debug, Clone)]
    pub struct LoggingMessage {
        pub tag: Cow<'static, str>,
        pub kind: LoggingMessageKind,
    }

    impl LoggingMessage {
        pub fn new_training_step<S>(tag: S, msg: TrainingStepLog) -> Self
        where
            S: Into<Cow<'static, str>>,
        {
            Self {
                tag: tag.into(),
                kind: LoggingMessageKind::TrainingStep(msg),
            }
        }

        pub fn new_evaluation<S>(tag: S, step: usize, report: Arc<EvaluationReport>) -> Self
        where
            S: Into<Cow<'static, str>>,
        {
            Self {
                tag: tag.into(),
                kind: LoggingMessageKind::Evaluation(EvaluationLog { step, report }),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub enum LoggingMessageKind {
        TrainingStep(TrainingStepLog),
        Evaluation(EvaluationLog),
    }

    #[derive(Debug, Clone)]
    pub struct TrainingStepLog {
        pub step: usize,
        pub epoch: usize,
        pub lr: f64,
        pub loss: f64,
        pub running_loss: f64,
    }

    #[derive(Debug, Clone)]
    pub struct EvaluationLog {
        pub step: usize,
        pub report: Arc<EvaluationReport>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_events_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let logging_dir: Arc<Path> = dir.path().into();
        let (tx, rx) = broadcast::channel(4);

        let future = logging_worker(logging_dir.clone(), rx).await.unwrap();
        tx.send(LoggingMessage::new_training_step(
            "train",
            TrainingStepLog {
                step: 0,
                epoch: 0,
                lr: 1e-3,
                loss: 0.7,
                running_loss: 0.7,
            },
        ))
        .unwrap();
        drop(tx);
        future.await.unwrap();

        let num_files = std::fs::read_dir(logging_dir.join("events"))
            .unwrap()
            .count();
        assert!(num_files > 0);
    }
}
