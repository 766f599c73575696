mod config;
mod encoder;
mod layers;
mod multi;
mod single;

pub use config::ModelConfig;
pub use encoder::{BagOfWords, Encoder, Gru};
pub use multi::{MultiModel, NnMulti, RnnMulti};
pub use single::{RnnClassifier, SingleModel};

use crate::{
    corpus::{CommandSet, Encoding, Level, LeveledCorpus, Vocabulary},
    error::{Error, Result},
    util::Report,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tch::{Device, nn};

/// Start of every full batch among the first `rows` rows.
pub(crate) fn batch_starts(rows: usize, batch_size: usize) -> impl Iterator<Item = usize> {
    (0..)
        .step_by(batch_size)
        .take_while(move |start| start + batch_size <= rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// GRU encoder with one head
    SingleRnn,
    /// Bag-of-words encoder with per-level heads
    MultiNn,
    /// GRU encoder with per-level heads
    MultiRnn,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ModelKind::SingleRnn => "single-rnn",
            ModelKind::MultiNn => "multi-nn",
            ModelKind::MultiRnn => "multi-rnn",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChoice {
    pub level: Level,
    pub probability: f64,
}

/// A grounded command.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub command: Vec<String>,
    pub probability: f64,
    /// Chosen level, for models with a level-selection head
    pub level: Option<LevelChoice>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (p = {:.4})", self.command.join(" "), self.probability)?;
        if let Some(choice) = self.level {
            write!(f, " at {} (p = {:.4})", choice.level, choice.probability)?;
        }
        Ok(())
    }
}

/// Everything besides the weights needed to rebuild a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMeta {
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    pub vocab: Vocabulary,
    pub commands: Vec<Vec<Vec<String>>>,
    pub encoding: Encoding,
    pub config: ModelConfig,
}

pub enum GroundingModel {
    /// Trained on the corpus of a single level.
    SingleRnn { model: RnnClassifier, level: Level },
    MultiNn(NnMulti),
    MultiRnn(RnnMulti),
}

impl GroundingModel {
    pub fn build(
        kind: ModelKind,
        corpora: &LeveledCorpus,
        level: Level,
        config: ModelConfig,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        Ok(match kind {
            ModelKind::SingleRnn => GroundingModel::SingleRnn {
                model: RnnClassifier::new(
                    corpora.corpus(level),
                    corpora.commands(level).clone(),
                    config,
                    seed,
                    device,
                )?,
                level,
            },
            ModelKind::MultiNn => {
                GroundingModel::MultiNn(NnMulti::new(corpora, config, seed, device)?)
            }
            ModelKind::MultiRnn => {
                GroundingModel::MultiRnn(RnnMulti::new(corpora, config, seed, device)?)
            }
        })
    }

    /// Levels the model is trained and evaluated on.
    pub fn levels(&self) -> Vec<Level> {
        match self {
            GroundingModel::SingleRnn { level, .. } => vec![*level],
            GroundingModel::MultiNn(_) | GroundingModel::MultiRnn(_) => Level::ALL.to_vec(),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            GroundingModel::SingleRnn { .. } => ModelKind::SingleRnn,
            GroundingModel::MultiNn(_) => ModelKind::MultiNn,
            GroundingModel::MultiRnn(_) => ModelKind::MultiRnn,
        }
    }

    pub fn fit(&mut self, chunk_size: Option<usize>) -> Result<Report> {
        match self {
            GroundingModel::SingleRnn { model, .. } => model.fit(chunk_size),
            GroundingModel::MultiNn(model) => model.fit(chunk_size),
            GroundingModel::MultiRnn(model) => model.fit(chunk_size),
        }
    }

    pub fn score(&self, tokens: &[String]) -> Prediction {
        match self {
            GroundingModel::SingleRnn { model, .. } => model.score(tokens),
            GroundingModel::MultiNn(model) => model.score(tokens),
            GroundingModel::MultiRnn(model) => model.score(tokens),
        }
    }

    /// A single-level model is evaluated on its own level only.
    pub fn evaluate(&self, corpora: &LeveledCorpus) -> Report {
        match self {
            GroundingModel::SingleRnn { model, level } => model.evaluate(corpora.corpus(*level)),
            GroundingModel::MultiNn(model) => model.evaluate(corpora),
            GroundingModel::MultiRnn(model) => model.evaluate(corpora),
        }
    }

    pub fn var_store(&self) -> &nn::VarStore {
        match self {
            GroundingModel::SingleRnn { model, .. } => model.var_store(),
            GroundingModel::MultiNn(model) => model.var_store(),
            GroundingModel::MultiRnn(model) => model.var_store(),
        }
    }

    pub(crate) fn var_store_mut(&mut self) -> &mut nn::VarStore {
        match self {
            GroundingModel::SingleRnn { model, .. } => model.var_store_mut(),
            GroundingModel::MultiNn(model) => model.var_store_mut(),
            GroundingModel::MultiRnn(model) => model.var_store_mut(),
        }
    }

    pub fn meta(&self) -> ModelMeta {
        fn sets(commands: &[CommandSet]) -> Vec<Vec<Vec<String>>> {
            commands.iter().map(|set| set.commands().to_vec()).collect()
        }

        match self {
            GroundingModel::SingleRnn { model, level } => ModelMeta {
                kind: self.kind(),
                level: Some(*level),
                vocab: model.vocab().clone(),
                commands: sets(std::slice::from_ref(model.commands())),
                encoding: model.encoding(),
                config: model.config().clone(),
            },
            GroundingModel::MultiNn(model) => ModelMeta {
                kind: self.kind(),
                level: None,
                vocab: model.vocab().clone(),
                commands: sets(model.command_sets()),
                encoding: model.encoding(),
                config: model.config().clone(),
            },
            GroundingModel::MultiRnn(model) => ModelMeta {
                kind: self.kind(),
                level: None,
                vocab: model.vocab().clone(),
                commands: sets(model.command_sets()),
                encoding: model.encoding(),
                config: model.config().clone(),
            },
        }
    }

    /// An untrained model shaped like the one `meta` describes, ready to
    /// receive its weights.
    pub fn from_meta(meta: ModelMeta, device: Device) -> Result<Self> {
        let ModelMeta {
            kind,
            level,
            vocab,
            commands,
            encoding,
            config,
        } = meta;
        let mut sets = commands.into_iter().map(CommandSet::new);

        match kind {
            ModelKind::SingleRnn => {
                let commands = sets
                    .next()
                    .ok_or_else(|| Error::InvalidConfig("missing command set".into()))?;
                let model = RnnClassifier::from_parts(vocab, commands, encoding, config, device)?;
                Ok(GroundingModel::SingleRnn {
                    model,
                    level: level.unwrap_or(Level::L0),
                })
            }
            ModelKind::MultiNn | ModelKind::MultiRnn => {
                let sets: [CommandSet; 3] = sets
                    .collect::<Vec<_>>()
                    .try_into()
                    .map_err(|_| Error::InvalidConfig("expected three command sets".into()))?;
                Ok(if kind == ModelKind::MultiNn {
                    GroundingModel::MultiNn(NnMulti::from_parts(
                        vocab, sets, encoding, config, device,
                    )?)
                } else {
                    GroundingModel::MultiRnn(RnnMulti::from_parts(
                        vocab, sets, encoding, config, device,
                    )?)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_starts_cover_full_batches() {
        assert_eq!(batch_starts(10, 4).collect::<Vec<_>>(), [0, 4]);
        assert_eq!(batch_starts(8, 4).collect::<Vec<_>>(), [0, 4]);
        assert_eq!(batch_starts(3, 4).count(), 0);
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in [ModelKind::SingleRnn, ModelKind::MultiNn, ModelKind::MultiRnn] {
            let value = toml::Value::try_from(kind).unwrap();
            assert_eq!(value.as_str(), Some(kind.to_string().as_str()));
        }
    }

    #[test]
    fn prediction_display() {
        let prediction = Prediction {
            command: vec!["agentInRoom".into(), "room1".into()],
            probability: 0.5,
            level: Some(LevelChoice {
                level: Level::L2,
                probability: 0.25,
            }),
        };
        assert_eq!(
            prediction.to_string(),
            "agentInRoom room1 (p = 0.5000) at L2 (p = 0.2500)"
        );
    }

    #[test]
    fn meta_rebuilds_same_shapes() {
        use crate::corpus::{Pair, ParallelCorpus};

        let level = |nl: &str, ml: &str| ParallelCorpus::new(vec![Pair::new(nl, ml)]);
        let corpora =
            LeveledCorpus::from_corpora([level("a b", "x"), level("c", "y"), level("d e f", "z")]);
        let config = ModelConfig {
            embedding_size: 4,
            rnn_size: 4,
            h1_size: 4,
            h2_size: 4,
            level_hidden_size: 4,
            ..Default::default()
        };

        for kind in [ModelKind::SingleRnn, ModelKind::MultiNn, ModelKind::MultiRnn] {
            let model =
                GroundingModel::build(kind, &corpora, Level::L2, config.clone(), 1, Device::Cpu)
                    .unwrap();
            let expected_levels = if kind == ModelKind::SingleRnn {
                vec![Level::L2]
            } else {
                Level::ALL.to_vec()
            };
            assert_eq!(model.levels(), expected_levels);
            let rebuilt = GroundingModel::from_meta(model.meta(), Device::Cpu).unwrap();

            assert_eq!(rebuilt.kind(), kind);
            let mut names: Vec<_> = model.var_store().variables().into_keys().collect();
            let mut rebuilt_names: Vec<_> =
                rebuilt.var_store().variables().into_keys().collect();
            names.sort();
            rebuilt_names.sort();
            assert_eq!(names, rebuilt_names);
        }
    }
}
