use super::{Phase, PhaseTracker, RunningLoss, TrainingSummary};
use crate::{
    common::*,
    config::{Config, OptimizerConfig, TrainingConfig},
    data::TrainingData,
    logging::{LoggingMessage, TrainingStepLog},
    utils::{self, BestCheckpoint, EarlyStopping, LrScheduler, RateCounter, TrainingState},
};
use chexnet::model::load_pretrained;

/// Run the training loop on the current thread until the last epoch or an
/// early stop, then evaluate the best model on the test split.
///
/// It blocks, so it must run outside of asynchronous tasks.
pub fn training_worker(
    config: Arc<Config>,
    data: TrainingData,
    logging_tx: broadcast::Sender<LoggingMessage>,
) -> Result<TrainingSummary> {
    let mut phase = PhaseTracker::new();
    let mut trainer = Trainer::new(config, data, logging_tx)?;
    trainer.train(&mut phase)?;
    let tested_checkpoint = trainer.test(&mut phase)?;
    phase.enter(Phase::Finished);

    let summary = TrainingSummary {
        init_epoch: trainer.init_epoch,
        completed_epochs: trainer.completed_epochs,
        num_validations: trainer.num_validations,
        num_checkpoints: trainer.num_checkpoints,
        best_auroc: trainer.best_checkpoint.best(),
        early_stopped: trainer.early_stopped,
        tested_checkpoint,
        phases: phase.history().to_vec(),
    };
    Ok(summary)
}

struct Trainer {
    config: Arc<Config>,
    data: TrainingData,
    logging_tx: broadcast::Sender<LoggingMessage>,
    vs: nn::VarStore,
    model: ChexNet,
    state: TrainingState,
    optimizer: nn::Optimizer<nn::Adam>,
    loss_fn: MultiLabelLoss,
    lr_scheduler: LrScheduler,
    evaluator: Evaluator,
    best_checkpoint: BestCheckpoint,
    early_stopping: EarlyStopping,
    /// The file holding the best model, if it was written or resumed in this run.
    best_file: Option<PathBuf>,
    init_epoch: usize,
    completed_epochs: usize,
    num_validations: usize,
    num_checkpoints: usize,
    early_stopped: bool,
}

impl Trainer {
    fn new(
        config: Arc<Config>,
        data: TrainingData,
        logging_tx: broadcast::Sender<LoggingMessage>,
    ) -> Result<Self> {
        let Config {
            model: ref model_config,
            training:
                TrainingConfig {
                    device,
                    ref lr_schedule,
                    optimizer:
                        OptimizerConfig {
                            beta1,
                            beta2,
                            weight_decay,
                        },
                    ref loss,
                    ref checkpoint_file,
                    ref load_checkpoint,
                    early_stopping_patience,
                    ..
                },
            ref evaluation,
            ..
        } = *config;

        info!("use device {:?}", device);

        // init model
        info!("initializing model");
        let mut vs = nn::VarStore::new(device);
        let (model, state) = {
            let root = vs.root();
            let model = model_config.model_init().build(&root)?;
            let state = TrainingState::new(&root);
            (model, state)
        };

        if let Some(file) = &model_config.pretrained_weights {
            load_pretrained(&mut vs, file).with_context(|| {
                format!("failed to load pretrained weights '{}'", file.display())
            })?;
        }

        // load checkpoint
        let resumed = utils::try_load_checkpoint(&mut vs, checkpoint_file, load_checkpoint)?;
        let (init_epoch, best_auroc) = match &resumed {
            Some(file) => {
                let (epoch, best) = (state.epoch(), state.best_auroc());
                info!(
                    "resume from '{}' at epoch {}, best auroc {:?}",
                    file.display(),
                    epoch,
                    best
                );
                (epoch, best)
            }
            None => (0, None),
        };

        let lr_scheduler = LrScheduler::new(lr_schedule, init_epoch)?;
        let optimizer = nn::Adam {
            beta1: beta1.raw(),
            beta2: beta2.raw(),
            wd: weight_decay.raw(),
            ..Default::default()
        }
        .build(&vs, lr_scheduler.lr())?;

        let loss_fn = MultiLabelLossInit {
            kind: loss.clone(),
            positive_counts: &data.positive_counts,
            num_records: data.num_train_records,
            device,
        }
        .build()?;

        let evaluator = Evaluator::new(
            evaluation.thresholds.clone().build()?,
            evaluation.target_finding,
        );
        let best_checkpoint = BestCheckpoint::new(checkpoint_file, best_auroc);
        let early_stopping =
            EarlyStopping::new(early_stopping_patience.map(|num| num.get()), best_auroc);

        Ok(Self {
            config,
            data,
            logging_tx,
            vs,
            model,
            state,
            optimizer,
            loss_fn,
            lr_scheduler,
            evaluator,
            best_checkpoint,
            early_stopping,
            // a resumed checkpoint without a score is not a best model
            best_file: resumed.filter(|_| best_auroc.is_some()),
            init_epoch,
            completed_epochs: init_epoch,
            num_validations: 0,
            num_checkpoints: 0,
            early_stopped: false,
        })
    }

    fn train(&mut self, phase: &mut PhaseTracker) -> Result<()> {
        let TrainingConfig {
            max_epochs,
            validation_interval,
            ..
        } = self.config.training;
        let max_epochs = max_epochs.get();
        let validation_interval = validation_interval.map(|steps| steps.get());
        let log_steps = self.config.logging.log_steps;
        let batch_size = self.data.train.batch_size();

        let mut step = self.init_epoch * self.data.train.num_batches();
        let mut rate_counter = RateCounter::with_second_interval();

        info!("start training");

        for epoch in self.init_epoch..max_epochs {
            phase.enter(Phase::Training);
            let lr = self.lr_scheduler.set_epoch(epoch);
            self.optimizer.set_lr(lr);

            let mut running_loss = RunningLoss::default();
            let mut batches = self.data.train.epoch(epoch);

            while let Some(batch) = batches.next() {
                let batch = batch?;

                let loss = {
                    let model = &self.model;
                    let loss_fn = &self.loss_fn;
                    let optimizer = &mut self.optimizer;
                    ResourceError::catch_unwind(|| {
                        let logits = model.forward_logits(&batch.images, Mode::Train);
                        let loss = loss_fn.forward(&logits, &batch.targets);
                        optimizer.backward_step(&loss);
                        f64::from(&loss)
                    })?
                };
                running_loss.add(loss);
                step += 1;

                rate_counter.add(1.0);
                if let Some(batch_rate) = rate_counter.rate() {
                    info!(
                        "epoch: {}\tstep: {}\tlr: {:.5}\tloss: {:.5}\t{:.2} batches/s\t{:.2} images/s",
                        epoch,
                        step,
                        self.lr_scheduler.lr(),
                        running_loss.mean().unwrap_or(loss),
                        batch_rate,
                        batch_rate * batch_size as f64
                    );
                }

                if step % log_steps == 0 {
                    self.send(LoggingMessage::new_training_step(
                        "train",
                        TrainingStepLog {
                            step,
                            epoch,
                            lr: self.lr_scheduler.lr(),
                            loss,
                            running_loss: running_loss.mean().unwrap_or(loss),
                        },
                    ))?;
                }

                if validation_interval.map_or(false, |interval| step % interval == 0) {
                    // the current epoch is not completed yet
                    if self.validate(phase, epoch, step)? {
                        info!("early stop at epoch {} step {}", epoch, step);
                        self.early_stopped = true;
                        return Ok(());
                    }
                    phase.enter(Phase::Training);
                }
            }

            info!(
                "epoch {} finished, mean loss {}, {} samples skipped",
                epoch,
                running_loss
                    .mean()
                    .map(|loss| format!("{:.5}", loss))
                    .unwrap_or_else(|| "n/a".into()),
                batches.num_skipped()
            );
            self.completed_epochs = epoch + 1;

            if validation_interval.is_none() && self.validate(phase, epoch + 1, step)? {
                info!("early stop after epoch {}", epoch);
                self.early_stopped = true;
                return Ok(());
            }
        }

        Ok(())
    }

    /// Evaluate the validation split and save the model if it improves.
    ///
    /// Returns whether training should stop.
    fn validate(
        &mut self,
        phase: &mut PhaseTracker,
        completed_epochs: usize,
        step: usize,
    ) -> Result<bool> {
        let val = match &self.data.val {
            Some(val) => val,
            None => return Ok(false),
        };

        phase.enter(Phase::Validating);
        let mut batches = val.epoch(0);
        let report = self
            .evaluator
            .run(&self.model, Some(&self.loss_fn), &mut batches)?;
        if batches.num_skipped() > 0 {
            warn!(
                "{} validation samples skipped due to image loading failures",
                batches.num_skipped()
            );
        }
        report.log("validation");
        self.num_validations += 1;

        if let Some(loss) = report.mean_loss {
            let lr = self.lr_scheduler.on_validation(loss);
            self.optimizer.set_lr(lr);
        }

        phase.enter(Phase::Checkpointing);
        let saved = self.best_checkpoint.update(
            &self.vs,
            &mut self.state,
            completed_epochs,
            step,
            report.macro_auroc,
        )?;
        if saved {
            self.num_checkpoints += 1;
            self.best_file = Some(self.best_checkpoint.file().to_owned());
        } else {
            info!(
                "validation auroc {:?} does not improve over {:?}",
                report.macro_auroc,
                self.best_checkpoint.best()
            );
        }

        let stop = self.early_stopping.step(report.macro_auroc);
        self.send(LoggingMessage::new_evaluation(
            "validation",
            step,
            Arc::new(report),
        ))?;

        Ok(stop)
    }

    /// Evaluate the best model of this run on the test split.
    ///
    /// Returns the evaluated checkpoint file, or `None` if the last model was
    /// evaluated.
    fn test(&mut self, phase: &mut PhaseTracker) -> Result<Option<PathBuf>> {
        let test = match &self.data.test {
            Some(test) => test,
            None => {
                info!("no test split, skip testing");
                return Ok(None);
            }
        };
        phase.enter(Phase::Testing);

        match &self.best_file {
            Some(file) => {
                info!("load the best checkpoint '{}'", file.display());
                self.vs
                    .load(file)
                    .with_context(|| format!("failed to load checkpoint '{}'", file.display()))?;
            }
            None => warn!("no checkpoint was saved in this run, evaluate the last model"),
        }

        let mut batches = test.epoch(0);
        let report = self
            .evaluator
            .run(&self.model, Some(&self.loss_fn), &mut batches)?;
        if batches.num_skipped() > 0 {
            warn!(
                "{} test samples skipped due to image loading failures",
                batches.num_skipped()
            );
        }
        report.log("test");
        let step = self.completed_epochs * self.data.train.num_batches();
        self.send(LoggingMessage::new_evaluation("test", step, Arc::new(report)))?;

        Ok(self.best_file.clone())
    }

    fn send(&self, msg: LoggingMessage) -> Result<()> {
        self.logging_tx
            .send(msg)
            .map_err(|_| format_err!("cannot send message to logger"))?;
        Ok(())
    }
}
