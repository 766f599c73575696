pub mod bundle;
pub mod corpus;
mod error;
pub mod model;
pub mod util;

pub use error::{Error, Result};
pub use tch;

use corpus::{Level, LeveledCorpus, load_leveled};
use model::{GroundingModel, ModelConfig, ModelKind};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};
use tch::Device;
use tracing::info;
use util::{Report, checkpoint::save_checkpoint};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeviceChoice {
    /// CUDA when available, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DeviceChoice {
    pub fn device(self) -> Device {
        match self {
            DeviceChoice::Auto => Device::cuda_if_available(),
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model_kind: ModelKind,
    /// Level whose corpus trains a single-rnn model; ignored by multi models
    pub level: Level,
    /// Folder holding `L0.en`/`L0.ml`, `L1.en`/`L1.ml` and `L2.en`/`L2.ml`
    pub data_folder: PathBuf,
    /// Share of every level held out for evaluation, set 0 to train on everything
    pub test_fraction: f64,
    /// Only the first `chunk_size` rows of each level are trained on, unset to use all of them
    pub chunk_size: Option<usize>,
    pub random_seed: i64,
    pub device_type: DeviceChoice,
    /// Checkpoints are saved here as timestamp-numbered subfolders
    ///
    /// Set empty to disable saving
    pub checkpoint_save_folder: PathBuf,
    /// Checkpoint storage limit before old checkpoints are deleted, set to 0 to keep all
    pub checkpoints_to_keep: usize,
    pub model: ModelConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_kind: ModelKind::MultiRnn,
            level: Level::L0,
            data_folder: PathBuf::from("data"),
            test_fraction: 0.1,
            chunk_size: None,
            random_seed: 123,
            device_type: DeviceChoice::Auto,
            checkpoint_save_folder: PathBuf::from("checkpoints"),
            checkpoints_to_keep: 5,
            model: ModelConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path).map_err(Error::io(path))?;
        Ok(toml::from_str(&toml_str)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(Error::InvalidConfig("test_fraction must be in [0, 1)".into()));
        }
        self.model.validate()
    }
}

/// Trains one grounding model on a leveled corpus, evaluates it on the
/// held-out share and checkpoints it.
pub struct Learner {
    config: TrainConfig,
    model: GroundingModel,
    test: LeveledCorpus,
}

impl Learner {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;

        info!("Loading corpora from {}...", config.data_folder.display());
        let corpora = load_leveled(&config.data_folder)?;
        for level in Level::ALL {
            info!(
                "\t{level}: {} pairs, {} commands",
                corpora.corpus(level).len(),
                corpora.commands(level).len()
            );
        }

        let (train, test) = corpora.split(config.test_fraction, config.random_seed as u64);
        Self::with_corpora(config, &train, test)
    }

    /// Skips loading: trains on `train` and evaluates on `test`.
    pub fn with_corpora(
        config: TrainConfig,
        train: &LeveledCorpus,
        test: LeveledCorpus,
    ) -> Result<Self> {
        config.validate()?;
        tch::manual_seed(config.random_seed);

        let device = config.device_type.device();
        info!("Creating {} model on {device:?}...", config.model_kind);
        let model = GroundingModel::build(
            config.model_kind,
            train,
            config.level,
            config.model.clone(),
            config.random_seed as u64,
            device,
        )?;

        Ok(Self {
            config,
            model,
            test,
        })
    }

    pub fn learn(&mut self) -> Result<Report> {
        let mut report = self.model.fit(self.config.chunk_size)?;

        let has_test = self
            .model
            .levels()
            .into_iter()
            .any(|level| !self.test.corpus(level).is_empty());
        if has_test {
            let evaluation = self.model.evaluate(&self.test);
            info!("\n{evaluation}");
            report += &evaluation;
        }

        if !self.config.checkpoint_save_folder.as_os_str().is_empty() {
            let keep = self.config.checkpoints_to_keep;
            let limit = (keep > 0).then_some(keep);
            save_checkpoint(&self.model, &self.config.checkpoint_save_folder, limit)?;
        }

        Ok(report)
    }

    pub fn model(&self) -> &GroundingModel {
        &self.model
    }

    pub fn into_model(self) -> GroundingModel {
        self.model
    }
}
