use super::{
    LevelChoice, Prediction, batch_starts,
    config::ModelConfig,
    encoder::{BagOfWords, Encoder, Gru},
    layers::Dense,
};
use crate::{
    corpus::{CommandSet, EncodedCorpus, Encoding, Level, LeveledCorpus, Vocabulary},
    error::{Error, Result},
    util::{AvgTracker, Report},
};
use fastrand::Rng;
use tch::{
    Device, Kind, Tensor,
    nn::{self, Module, OptimizerConfig},
};
use tracing::{debug, info, warn};

struct Head {
    hidden: Dense,
    output: Dense,
}

impl Head {
    fn new(path: nn::Path, config: &ModelConfig, n_commands: i64) -> Self {
        let stddev = config.init_stddev;
        Self {
            hidden: Dense::new(&path / "hidden", config.h1_size, config.h2_size, stddev),
            output: Dense::new(&path / "output", config.h2_size, n_commands, stddev),
        }
    }

    fn forward(&self, shared: &Tensor, dropout: f64, train: bool) -> Tensor {
        let hidden = self.hidden.forward(shared).relu().dropout(dropout, train);
        self.output.forward(&hidden)
    }
}

/// A shared encoder and hidden layer feeding one head per level plus a
/// level-selection head.
pub struct MultiModel<E: Encoder> {
    encoder: E,
    shared: Dense,
    heads: [Head; 3],
    level_hidden: Dense,
    level_output: Dense,
    vs: nn::VarStore,
    optimizer: nn::Optimizer,
    vocab: Vocabulary,
    commands: [CommandSet; 3],
    encoding: Encoding,
    config: ModelConfig,
    train: Option<[EncodedCorpus; 3]>,
    rng: Rng,
    device: Device,
}

/// Multi-NN: bag-of-words encoder.
pub type NnMulti = MultiModel<BagOfWords>;

/// Multi-RNN: GRU encoder.
pub type RnnMulti = MultiModel<Gru>;

impl<E: Encoder> MultiModel<E> {
    /// Builds one vocabulary over every level, encodes the corpora and
    /// initializes the network. `seed` drives the per-epoch shuffle.
    pub fn new(
        corpora: &LeveledCorpus,
        config: ModelConfig,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        corpora.validate()?;

        let vocab = Vocabulary::build(Level::ALL.map(|level| corpora.corpus(level)));
        let encoding = E::encoding(corpora.max_len().max(1));

        let mut train = Vec::with_capacity(3);
        for level in Level::ALL {
            train.push(EncodedCorpus::new(
                corpora.corpus(level),
                corpora.commands(level),
                &vocab,
                encoding,
            )?);
        }
        let train: [EncodedCorpus; 3] = train
            .try_into()
            .map_err(|_| Error::InvalidConfig("expected three levels".into()))?;

        let mut model = Self::from_parts(
            vocab,
            corpora.command_sets().clone(),
            encoding,
            config,
            device,
        )?;
        model.train = Some(train);
        model.rng = Rng::with_seed(seed);
        Ok(model)
    }

    pub(crate) fn from_parts(
        vocab: Vocabulary,
        commands: [CommandSet; 3],
        encoding: Encoding,
        config: ModelConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(level) = Level::ALL.into_iter().find(|l| commands[l.index()].is_empty()) {
            return Err(Error::InvalidConfig(format!("{level} command set is empty")));
        }

        debug!(
            "{} encoder over {} words, commands per level: {:?}",
            E::NAME,
            vocab.len(),
            commands.each_ref().map(CommandSet::len)
        );
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let stddev = config.init_stddev;

        let encoder = E::new(&root / "encoder", vocab.len() as i64, &config);
        let shared = Dense::new(
            &root / "shared",
            E::output_size(&config),
            config.h1_size,
            stddev,
        );
        let heads = Level::ALL.map(|level| {
            Head::new(
                &root / level.to_string(),
                &config,
                commands[level.index()].len() as i64,
            )
        });
        let level_hidden = Dense::new(
            &root / "level" / "hidden",
            config.h1_size,
            config.level_hidden_size,
            stddev,
        );
        let level_output = Dense::new(
            &root / "level" / "output",
            config.level_hidden_size,
            Level::ALL.len() as i64,
            stddev,
        );

        let optimizer = nn::Adam::default().build(&vs, config.learning_rate)?;

        Ok(Self {
            encoder,
            shared,
            heads,
            level_hidden,
            level_output,
            vs,
            optimizer,
            vocab,
            commands,
            encoding,
            rng: Rng::new(),
            config,
            train: None,
            device,
        })
    }

    fn shared(&self, inputs: &Tensor, lengths: &Tensor, train: bool) -> Tensor {
        let features = self.encoder.forward(inputs, lengths, train);
        self.shared.forward(&features).relu()
    }

    fn level_logits(&self, shared: &Tensor) -> Tensor {
        let hidden = self.level_hidden.forward(shared).relu();
        self.level_output.forward(&hidden)
    }

    /// Trains every level on the first `chunk_size` rows (every row when
    /// `None`). Each batch position steps L0, L1 and L2 in turn, skipping a
    /// level that has no full batch there. The loss of a step is the level's
    /// command loss plus the level-selection loss.
    pub fn fit(&mut self, chunk_size: Option<usize>) -> Result<Report> {
        let Some(train) = self.train.take() else {
            return Err(Error::EmptyCorpus("training".into()));
        };
        let result = self.fit_on(&train, chunk_size);
        self.train = Some(train);
        result
    }

    fn fit_on(&mut self, train: &[EncodedCorpus; 3], chunk_size: Option<usize>) -> Result<Report> {
        let bsz = self.config.batch_size;
        let rows = train.each_ref().map(|level| {
            chunk_size.map_or(level.len(), |c| c.min(level.len()))
        });
        let longest = rows.iter().copied().max().unwrap_or(0);
        if longest < bsz {
            warn!("no level fills a batch of {bsz}, nothing to fit");
        }

        let mut indices = rows.map(|n| (0..n).collect::<Vec<usize>>());
        let mut report = Report::titled("Training");

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                for level_indices in &mut indices {
                    self.rng.shuffle(level_indices);
                }
            }

            let mut epoch_loss = AvgTracker::default();
            let mut level_loss = [AvgTracker::default(); 3];
            for start in batch_starts(longest, bsz) {
                let mut batch_loss = 0.0;
                for level in Level::ALL {
                    let i = level.index();
                    if start + bsz > rows[i] {
                        continue;
                    }

                    let batch = train[i].batch(&indices[i][start..start + bsz], self.device);
                    let shared = self.shared(&batch.inputs, &batch.lengths, true);
                    let command_logits =
                        self.heads[i].forward(&shared, self.config.dropout(), true);
                    let level_targets =
                        Tensor::full([batch.size()], i as i64, (Kind::Int64, self.device));

                    let loss = command_logits.cross_entropy_for_logits(&batch.labels)
                        + self.level_logits(&shared).cross_entropy_for_logits(&level_targets);
                    self.optimizer.backward_step(&loss);

                    let loss = loss.double_value(&[]);
                    level_loss[i] += loss;
                    batch_loss += loss;
                }
                debug!("epoch {epoch} batch {start}: loss {batch_loss:.4}");
                epoch_loss += batch_loss;
            }

            info!("Epoch {epoch} average loss: {}", epoch_loss.get());
            report["Average loss"] = epoch_loss.into();
            report["Batches"] += epoch_loss.count().into();
            for level in Level::ALL {
                report[format!("{level} loss").as_str()] = level_loss[level.index()].into();
            }
        }
        report["Epochs"] = self.config.epochs.into();

        Ok(report)
    }

    /// Picks the most probable level, then that level's most probable
    /// command.
    pub fn score(&self, tokens: &[String]) -> Prediction {
        let encoded = self.encoding.encode(&self.vocab, tokens);
        let inputs = Tensor::from_slice(&encoded.ids)
            .view([1, -1])
            .to_device(self.device);
        let lengths = Tensor::from_slice(&[encoded.len]).to_device(self.device);

        let (level_probs, command_probs) = tch::no_grad(|| {
            let shared = self.shared(&inputs, &lengths, false);
            let level_probs = self
                .level_logits(&shared)
                .softmax(-1, Kind::Float)
                .squeeze_dim(0);
            let level = level_probs.argmax(0, false).int64_value(&[]) as usize;
            let command_probs = self.heads[level]
                .forward(&shared, 0.0, false)
                .softmax(-1, Kind::Float)
                .squeeze_dim(0);
            (level_probs, command_probs)
        });

        let level = level_probs.argmax(0, false).int64_value(&[]);
        let label = command_probs.argmax(0, false).int64_value(&[]);

        Prediction {
            command: self.commands[level as usize].commands()[label as usize].clone(),
            probability: command_probs.double_value(&[label]),
            level: Some(LevelChoice {
                level: Level::ALL[level as usize],
                probability: level_probs.double_value(&[level]),
            }),
        }
    }

    /// Command accuracy (right level and right command) and level accuracy,
    /// overall and per level.
    pub fn evaluate(&self, corpora: &LeveledCorpus) -> Report {
        let mut accuracy = AvgTracker::default();
        let mut level_accuracy = AvgTracker::default();
        let mut report = Report::titled("Evaluation");

        for level in Level::ALL {
            let corpus = corpora.corpus(level);
            let mut per_level = AvgTracker::default();
            for pair in &corpus.pairs {
                let prediction = self.score(&pair.nl);
                let right_level = prediction.level.map(|c| c.level) == Some(level);
                let right = right_level && prediction.command == pair.ml;

                per_level += right;
                level_accuracy += right_level;
            }
            accuracy += per_level;
            report[format!("{level} accuracy").as_str()] = per_level.into();
        }

        report["Accuracy"] = accuracy.into();
        report["Level accuracy"] = level_accuracy.into();
        report["Examples"] = accuracy.count().into();
        report
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub(crate) fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn commands(&self, level: Level) -> &CommandSet {
        &self.commands[level.index()]
    }

    pub fn command_sets(&self) -> &[CommandSet; 3] {
        &self.commands
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}
