use super::{
    Prediction, batch_starts,
    config::ModelConfig,
    encoder::{Encoder, Gru},
    layers::Dense,
};
use crate::{
    corpus::{CommandSet, EncodedCorpus, Encoding, ParallelCorpus, Vocabulary},
    error::{Error, Result},
    util::{AvgTracker, Report},
};
use fastrand::Rng;
use tch::{
    Device, Kind, Tensor,
    nn::{self, Module, OptimizerConfig},
};
use tracing::{debug, info, warn};

/// One encoder and one classifier head over a single command set.
pub struct SingleModel<E: Encoder> {
    encoder: E,
    h1: Dense,
    h2: Dense,
    output: Dense,
    vs: nn::VarStore,
    optimizer: nn::Optimizer,
    vocab: Vocabulary,
    commands: CommandSet,
    encoding: Encoding,
    config: ModelConfig,
    train: Option<EncodedCorpus>,
    rng: Rng,
    device: Device,
}

/// The Single-RNN grounding model.
pub type RnnClassifier = SingleModel<Gru>;

impl<E: Encoder> SingleModel<E> {
    /// Builds the vocabulary from `corpus`, encodes it for training and
    /// initializes the network. `seed` drives the per-epoch shuffle.
    pub fn new(
        corpus: &ParallelCorpus,
        commands: CommandSet,
        config: ModelConfig,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus("training".into()));
        }

        let vocab = Vocabulary::build([corpus]);
        let encoding = E::encoding(corpus.max_len().max(1));
        let train = EncodedCorpus::new(corpus, &commands, &vocab, encoding)?;

        let mut model = Self::from_parts(vocab, commands, encoding, config, device)?;
        model.train = Some(train);
        model.rng = Rng::with_seed(seed);
        Ok(model)
    }

    /// Rebuilds an untrained network with a known vocabulary and label space.
    pub(crate) fn from_parts(
        vocab: Vocabulary,
        commands: CommandSet,
        encoding: Encoding,
        config: ModelConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        if commands.is_empty() {
            return Err(Error::InvalidConfig("command set is empty".into()));
        }

        debug!(
            "{} encoder over {} words, {} commands",
            E::NAME,
            vocab.len(),
            commands.len()
        );
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let stddev = config.init_stddev;

        let encoder = E::new(&root / "encoder", vocab.len() as i64, &config);
        let h1 = Dense::new(
            &root / "hidden1",
            E::output_size(&config),
            config.h1_size,
            stddev,
        );
        let h2 = Dense::new(&root / "hidden2", config.h1_size, config.h2_size, stddev);
        let output = Dense::new(
            &root / "output",
            config.h2_size,
            commands.len() as i64,
            stddev,
        );

        let optimizer = nn::Adam::default().build(&vs, config.learning_rate)?;

        Ok(Self {
            encoder,
            h1,
            h2,
            output,
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

    fn logits(&self, inputs: &Tensor, lengths: &Tensor, train: bool) -> Tensor {
        let features = self.encoder.forward(inputs, lengths, train);
        let h1 = self.h1.forward(&features).relu();
        let h2 = self.h2.forward(&h1).relu().dropout(self.config.dropout(), train);
        self.output.forward(&h2)
    }

    /// Trains on the first `chunk_size` rows (every row when `None`) for the
    /// configured number of epochs. Only full batches are used.
    pub fn fit(&mut self, chunk_size: Option<usize>) -> Result<Report> {
        let Some(train) = self.train.take() else {
            return Err(Error::EmptyCorpus("training".into()));
        };
        let result = self.fit_on(&train, chunk_size);
        self.train = Some(train);
        result
    }

    fn fit_on(&mut self, train: &EncodedCorpus, chunk_size: Option<usize>) -> Result<Report> {
        let rows = chunk_size.map_or(train.len(), |c| c.min(train.len()));
        let bsz = self.config.batch_size;
        if rows < bsz {
            warn!("{rows} training rows do not fill a batch of {bsz}, nothing to fit");
        }

        let mut indices: Vec<usize> = (0..rows).collect();
        let mut report = Report::titled("Training");

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                self.rng.shuffle(&mut indices);
            }

            let mut epoch_loss = AvgTracker::default();
            for start in batch_starts(rows, bsz) {
                let batch = train.batch(&indices[start..start + bsz], self.device);
                let logits = self.logits(&batch.inputs, &batch.lengths, true);
                let loss = logits.cross_entropy_for_logits(&batch.labels);
                self.optimizer.backward_step(&loss);

                let loss = loss.double_value(&[]);
                debug!("epoch {epoch} batch {start}: loss {loss:.4}");
                epoch_loss += loss;
            }

            info!("Epoch {epoch} average loss: {}", epoch_loss.get());
            report["Average loss"] = epoch_loss.into();
            report["Batches"] += epoch_loss.count().into();
        }
        report["Epochs"] = self.config.epochs.into();

        Ok(report)
    }

    /// The most probable command for `tokens` and its probability.
    pub fn score(&self, tokens: &[String]) -> Prediction {
        let encoded = self.encoding.encode(&self.vocab, tokens);
        let inputs = Tensor::from_slice(&encoded.ids)
            .view([1, -1])
            .to_device(self.device);
        let lengths = Tensor::from_slice(&[encoded.len]).to_device(self.device);

        let probs = tch::no_grad(|| {
            self.logits(&inputs, &lengths, false)
                .softmax(-1, Kind::Float)
                .squeeze_dim(0)
        });
        let label = probs.argmax(0, false).int64_value(&[]);

        Prediction {
            command: self.commands.commands()[label as usize].clone(),
            probability: probs.double_value(&[label]),
            level: None,
        }
    }

    /// Fraction of `corpus` whose predicted command matches the aligned
    /// reward function.
    pub fn evaluate(&self, corpus: &ParallelCorpus) -> Report {
        let mut accuracy = AvgTracker::default();
        for pair in &corpus.pairs {
            accuracy += self.score(&pair.nl).command == pair.ml;
        }

        let mut report = Report::titled("Evaluation");
        report["Accuracy"] = accuracy.into();
        report["Examples"] = corpus.len().into();
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

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Pair;

    fn corpus() -> ParallelCorpus {
        let pairs = [
            ("go to the red room", "agentInRoom agent0 room0"),
            ("move into the red room", "agentInRoom agent0 room0"),
            ("go to the blue room", "agentInRoom agent0 room1"),
            ("enter the blue room", "agentInRoom agent0 room1"),
        ];
        let pairs: Vec<_> = pairs
            .iter()
            .cycle()
            .take(32)
            .map(|(nl, ml)| Pair::new(nl, ml))
            .collect();
        ParallelCorpus::new(pairs)
    }

    fn config() -> ModelConfig {
        ModelConfig {
            embedding_size: 8,
            rnn_size: 8,
            h1_size: 8,
            h2_size: 8,
            epochs: 30,
            batch_size: 4,
            keep_prob: 1.0,
            init_stddev: 0.1,
            learning_rate: 1e-2,
            ..Default::default()
        }
    }

    #[test]
    fn learns_a_separable_corpus() {
        tch::manual_seed(7);
        let corpus = corpus();
        let commands = CommandSet::from_corpus(&corpus);
        let mut model = RnnClassifier::new(&corpus, commands, config(), 5, Device::Cpu).unwrap();

        let report = model.fit(None).unwrap();
        assert_eq!(report.get("Batches"), Some(8.0 * 30.0));
        assert!(report.get("Average loss").unwrap() < 0.5);

        let prediction = model.score(&crate::corpus::tokenize("go to the blue room"));
        assert_eq!(prediction.command.join(" "), "agentInRoom agent0 room1");
        assert!(prediction.probability > 0.5 && prediction.probability <= 1.0);
        assert!(prediction.level.is_none());

        assert_eq!(model.evaluate(&corpus).get("Accuracy"), Some(1.0));
    }

    #[test]
    fn small_chunk_fits_nothing() {
        let corpus = corpus();
        let commands = CommandSet::from_corpus(&corpus);
        let mut model = RnnClassifier::new(&corpus, commands, config(), 5, Device::Cpu).unwrap();

        let report = model.fit(Some(3)).unwrap();
        assert_eq!(report.get("Batches"), Some(0.0));
        assert!(report.get("Average loss").unwrap().is_nan());
    }

    #[test]
    fn rejects_empty_corpus() {
        let empty = ParallelCorpus::default();
        let result = RnnClassifier::new(&empty, CommandSet::default(), config(), 5, Device::Cpu);
        assert!(matches!(result, Err(Error::EmptyCorpus(_))));
    }

    #[test]
    fn scores_unknown_and_overlong_commands() {
        let corpus = corpus();
        let commands = CommandSet::from_corpus(&corpus);
        let model = RnnClassifier::new(&corpus, commands, config(), 5, Device::Cpu).unwrap();

        let long = crate::corpus::tokenize("please go to the big shiny blue room right now");
        let prediction = model.score(&long);
        assert!(model.commands().label(&prediction.command).is_some());

        let empty = model.score(&[]);
        assert!(empty.probability > 0.0);
    }
}
