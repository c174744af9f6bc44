use crate::{common::*, config::LoadCheckpoint};

/// The non-trainable scalars saved along with the model parameters.
#[derive(Debug)]
pub struct TrainingState {
    epoch: Tensor,
    best_auroc: Tensor,
}

impl TrainingState {
    /// Create the variables `epoch` and `best_auroc` under `path`.
    pub fn new(path: &nn::Path) -> Self {
        let epoch = path.zeros_no_train("epoch", &[]);
        let mut best_auroc = path.zeros_no_train("best_auroc", &[]);
        tch::no_grad(|| {
            let _ = best_auroc.fill_(-1.0);
        });
        Self { epoch, best_auroc }
    }

    /// The number of completed epochs.
    pub fn epoch(&self) -> usize {
        f64::from(&self.epoch).max(0.0) as usize
    }

    /// The best validation macro AUC-ROC, if any validation had one.
    pub fn best_auroc(&self) -> Option<f64> {
        let value = f64::from(&self.best_auroc);
        (value >= 0.0).then(|| value)
    }

    pub fn set(&mut self, epoch: usize, best_auroc: f64) {
        tch::no_grad(|| {
            let _ = self.epoch.fill_(epoch as i64);
            let _ = self.best_auroc.fill_(best_auroc);
        });
    }
}

/// The human readable description of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub epoch: usize,
    pub step: usize,
    pub best_auroc: f64,
    pub time: String,
}

/// Writes the model to a file whenever the validation score improves.
#[derive(Debug)]
pub struct BestCheckpoint {
    file: PathBuf,
    best: Option<f64>,
}

impl BestCheckpoint {
    pub fn new(file: impl Into<PathBuf>, best: Option<f64>) -> Self {
        Self {
            file: file.into(),
            best,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Save the model if the score strictly improves over the best so far.
    ///
    /// Returns whether the file was written.
    pub fn update(
        &mut self,
        vs: &nn::VarStore,
        state: &mut TrainingState,
        epoch: usize,
        step: usize,
        score: Option<f64>,
    ) -> Result<bool> {
        let score = match (score, self.best) {
            (Some(score), Some(best)) if score > best => score,
            (Some(score), None) => score,
            _ => return Ok(false),
        };

        state.set(epoch, score);
        save_checkpoint(vs, &self.file, step, epoch, score)?;
        self.best = Some(score);
        Ok(true)
    }
}

/// The path of the JSON file describing a checkpoint.
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".json");
    name.into()
}

/// Save parameters to a checkpoint file with a JSON sidecar.
pub fn save_checkpoint(
    vs: &nn::VarStore,
    file: &Path,
    step: usize,
    epoch: usize,
    best_auroc: f64,
) -> Result<()> {
    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    vs.save(file)
        .with_context(|| format!("failed to save checkpoint '{}'", file.display()))?;

    let info = CheckpointInfo {
        epoch,
        step,
        best_auroc,
        time: Local::now().to_rfc3339(),
    };
    std::fs::write(sidecar_path(file), serde_json::to_string_pretty(&info)?)?;

    info!(
        "save checkpoint '{}' at epoch {}, auroc {:.5}",
        file.display(),
        epoch,
        best_auroc
    );
    Ok(())
}

/// Load parameters with specified checkpoint loading method.
///
/// Returns the loaded file.
pub fn try_load_checkpoint(
    vs: &mut nn::VarStore,
    checkpoint_file: &Path,
    load_checkpoint: &LoadCheckpoint,
) -> Result<Option<PathBuf>> {
    let path = match load_checkpoint {
        LoadCheckpoint::Disabled => {
            info!("checkpoint loading is disabled");
            None
        }
        LoadCheckpoint::FromBest => {
            if checkpoint_file.is_file() {
                Some(checkpoint_file.to_owned())
            } else {
                warn!("no checkpoint file found at '{}'", checkpoint_file.display());
                None
            }
        }
        LoadCheckpoint::FromFile { file } => {
            ensure!(file.is_file(), "'{}' is not a file", file.display());
            Some(file.to_owned())
        }
    };

    if let Some(path) = &path {
        info!("load checkpoint file '{}'", path.display());
        let missing = vs
            .load_partial(path)
            .with_context(|| format!("failed to load checkpoint '{}'", path.display()))?;
        if !missing.is_empty() {
            warn!("variables missing in checkpoint: {}", missing.join(", "));
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ckpt").join("best.ckpt");

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let _weight = root.zeros("weight", &[2]);
        let mut state = TrainingState::new(&root);
        assert_eq!(state.epoch(), 0);
        assert_eq!(state.best_auroc(), None);

        let mut best = BestCheckpoint::new(&file, None);
        assert!(!best.update(&vs, &mut state, 1, 10, None).unwrap());
        assert!(!file.exists());

        assert!(best.update(&vs, &mut state, 1, 10, Some(0.7)).unwrap());
        assert!(file.is_file());
        let modified = std::fs::metadata(&file).unwrap().modified().unwrap();

        // equal and lower scores do not overwrite the file
        assert!(!best.update(&vs, &mut state, 2, 20, Some(0.7)).unwrap());
        assert!(!best.update(&vs, &mut state, 3, 30, Some(0.6)).unwrap());
        assert_eq!(std::fs::metadata(&file).unwrap().modified().unwrap(), modified);
        assert_eq!(state.epoch(), 1);

        let text = std::fs::read_to_string(sidecar_path(&file)).unwrap();
        let info: CheckpointInfo = serde_json::from_str(&text).unwrap();
        assert_eq!((info.epoch, info.step), (1, 10));
        assert!((info.best_auroc - 0.7).abs() < 1e-9);

        assert!(best.update(&vs, &mut state, 4, 40, Some(0.8)).unwrap());
        assert_eq!(best.best(), Some(0.8));
    }

    #[test]
    fn resume_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("best.ckpt");

        {
            let vs = nn::VarStore::new(Device::Cpu);
            let mut state = TrainingState::new(&vs.root());
            let mut best = BestCheckpoint::new(&file, None);
            best.update(&vs, &mut state, 3, 300, Some(0.75)).unwrap();
        }

        let mut vs = nn::VarStore::new(Device::Cpu);
        let state = TrainingState::new(&vs.root());
        let loaded = try_load_checkpoint(&mut vs, &file, &LoadCheckpoint::FromBest).unwrap();
        assert_eq!(loaded.as_deref(), Some(file.as_path()));
        assert_eq!(state.epoch(), 3);
        assert!((state.best_auroc().unwrap() - 0.75).abs() < 1e-6);

        // a missing best file is not an error
        let missing = dir.path().join("missing.ckpt");
        let loaded = try_load_checkpoint(&mut vs, &missing, &LoadCheckpoint::FromBest).unwrap();
        assert_eq!(loaded, None);
        let result = try_load_checkpoint(
            &mut vs,
            &file,
            &LoadCheckpoint::FromFile { file: missing },
        );
        assert!(result.is_err());
    }
}
