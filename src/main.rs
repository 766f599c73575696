use clap::{Parser, Subcommand};
use rewardground::{
    DeviceChoice, Error, Learner, TrainConfig,
    bundle::ReleaseLayout,
    corpus::{Level, load_leveled, tokenize},
    model::{GroundingModel, ModelKind},
    util::checkpoint::{load_checkpoint, load_latest},
};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Ground natural language commands to reward functions")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a grounding model and checkpoint it
    Train {
        /// TOML file with a training config, flags override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: TrainOverrides,
    },
    /// Ground one command with a trained model
    Score {
        /// A checkpoint folder, or a folder of checkpoints to take the newest from
        #[arg(long, default_value = "checkpoints")]
        checkpoint: PathBuf,
        #[arg(long, value_enum, default_value_t = DeviceChoice::Auto)]
        device: DeviceChoice,
        /// Words of the natural-language command
        #[arg(required = true)]
        command: Vec<String>,
    },
    /// Measure a trained model's accuracy on a leveled corpus
    Eval {
        /// A checkpoint folder, or a folder of checkpoints to take the newest from
        #[arg(long, default_value = "checkpoints")]
        checkpoint: PathBuf,
        /// Folder with the `L0`, `L1` and `L2` corpora
        #[arg(long, default_value = "data")]
        data: PathBuf,
        #[arg(long, value_enum, default_value_t = DeviceChoice::Auto)]
        device: DeviceChoice,
    },
    /// Check that a release folder holds the paper, supplement, data and code
    CheckLayout {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

/// Training flags that take precedence over the config file.
#[derive(clap::Args, Debug, Default)]
struct TrainOverrides {
    /// Folder with the `L0`, `L1` and `L2` corpora
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long, value_enum)]
    model: Option<ModelKind>,
    /// Level a single-rnn model trains on
    #[arg(long, value_parser = parse_level)]
    level: Option<Level>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Train on only the first rows of each level
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    test_fraction: Option<f64>,
    #[arg(long)]
    seed: Option<i64>,
    /// Folder the checkpoint is saved under
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum)]
    device: Option<DeviceChoice>,
}

impl TrainOverrides {
    fn apply(self, config: &mut TrainConfig) {
        if let Some(data) = self.data {
            config.data_folder = data;
        }
        if let Some(model) = self.model {
            config.model_kind = model;
        }
        if let Some(level) = self.level {
            config.level = level;
        }
        if let Some(epochs) = self.epochs {
            config.model.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.model.batch_size = batch_size;
        }
        if self.chunk_size.is_some() {
            config.chunk_size = self.chunk_size;
        }
        if let Some(test_fraction) = self.test_fraction {
            config.test_fraction = test_fraction;
        }
        if let Some(seed) = self.seed {
            config.random_seed = seed;
        }
        if let Some(out) = self.out {
            config.checkpoint_save_folder = out;
        }
        if let Some(device) = self.device {
            config.device_type = device;
        }
    }
}

/// The config file, or the defaults, with `overrides` applied on top.
fn train_config(
    path: Option<&Path>,
    overrides: TrainOverrides,
) -> rewardground::Result<TrainConfig> {
    let mut config = match path {
        Some(path) => TrainConfig::from_file(path)?,
        None => TrainConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn parse_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

/// Loads `path` as a checkpoint folder, or else the newest checkpoint under it.
fn open_model(path: &Path, device: DeviceChoice) -> rewardground::Result<GroundingModel> {
    match load_checkpoint(path, device.device()) {
        Err(Error::NoCheckpoint(_)) => load_latest(path, device.device()),
        result => result,
    }
}

fn run(args: Args) -> rewardground::Result<bool> {
    match args.command {
        Command::Train { config, overrides } => {
            let config = train_config(config.as_deref(), overrides)?;
            let mut learner = Learner::new(config)?;
            let report = learner.learn()?;
            println!("{report}");
            Ok(true)
        }
        Command::Score {
            checkpoint,
            device,
            command,
        } => {
            let model = open_model(&checkpoint, device)?;
            let prediction = model.score(&tokenize(&command.join(" ")));
            println!("{prediction}");
            Ok(true)
        }
        Command::Eval {
            checkpoint,
            data,
            device,
        } => {
            let model = open_model(&checkpoint, device)?;
            let corpora = load_leveled(&data)?;
            println!("{}", model.evaluate(&corpora));
            Ok(true)
        }
        Command::CheckLayout { root } => {
            let missing = ReleaseLayout::new(&root).verify();
            for entry in ReleaseLayout::entries() {
                let status = if missing.contains(entry) { "missing" } else { "ok" };
                println!("{:<18} {status:<8} {}", entry.path, entry.description);
            }
            if missing.is_empty() {
                info!("{} is a complete release", root.display());
            }
            Ok(missing.is_empty())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rewardground=info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
