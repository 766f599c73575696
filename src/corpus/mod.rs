mod encode;
mod loader;
mod vocab;

pub use encode::{Batch, Encoded, EncodedCorpus, Encoding};
pub use loader::{load_corpus, load_leveled};
pub use vocab::{PAD, PAD_ID, UNK, UNK_ID, Vocabulary};

use crate::error::{Error, Result};
use ahash::AHashMap;
use fastrand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Abstraction level of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    L0,
    L1,
    L2,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::L0, Level::L1, Level::L2];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.index())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L0" | "0" => Ok(Level::L0),
            "L1" | "1" => Ok(Level::L1),
            "L2" | "2" => Ok(Level::L2),
            other => Err(Error::InvalidConfig(format!("unknown level {other:?}"))),
        }
    }
}

/// Lowercases and splits on whitespace.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect()
}

/// One natural-language command aligned with its reward function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub nl: Vec<String>,
    pub ml: Vec<String>,
}

impl Pair {
    pub fn new(nl: &str, ml: &str) -> Self {
        Self {
            nl: tokenize(nl),
            ml: ml.split_whitespace().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelCorpus {
    pub pairs: Vec<Pair>,
}

impl ParallelCorpus {
    pub fn new(pairs: Vec<Pair>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Length of the longest command.
    pub fn max_len(&self) -> usize {
        self.pairs.iter().map(|p| p.nl.len()).max().unwrap_or(0)
    }

    /// Shuffles with `seed` and moves `test_fraction` of the pairs into a
    /// held-out corpus. Returns `(train, test)`.
    pub fn split(&self, test_fraction: f64, seed: u64) -> (ParallelCorpus, ParallelCorpus) {
        let mut indices: Vec<usize> = (0..self.pairs.len()).collect();
        Rng::with_seed(seed).shuffle(&mut indices);

        let n_test = (self.pairs.len() as f64 * test_fraction.clamp(0.0, 1.0)).round() as usize;
        let (test, train) = indices.split_at(n_test);

        let pick = |ids: &[usize]| {
            ParallelCorpus::new(ids.iter().map(|&i| self.pairs[i].clone()).collect())
        };
        (pick(train), pick(test))
    }
}

/// The label space of one classifier head. A command's label is its position.
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    commands: Vec<Vec<String>>,
    labels: AHashMap<String, usize>,
}

impl CommandSet {
    /// Duplicate commands keep their first label.
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        let mut set = Self::default();
        for command in commands {
            let key = command.join(" ");
            if !set.labels.contains_key(&key) {
                set.labels.insert(key, set.commands.len());
                set.commands.push(command);
            }
        }
        set
    }

    /// Every distinct reward function, in order of first appearance.
    pub fn from_corpus(corpus: &ParallelCorpus) -> Self {
        Self::new(corpus.pairs.iter().map(|p| p.ml.clone()).collect())
    }

    pub fn label(&self, ml: &[String]) -> Option<usize> {
        self.labels.get(&ml.join(" ")).copied()
    }

    pub fn command(&self, label: usize) -> Option<&[String]> {
        self.commands.get(label).map(Vec::as_slice)
    }

    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A corpus and its command set for each level.
#[derive(Debug, Clone, Default)]
pub struct LeveledCorpus {
    corpora: [ParallelCorpus; 3],
    commands: [CommandSet; 3],
}

impl LeveledCorpus {
    pub fn new(corpora: [ParallelCorpus; 3], commands: [CommandSet; 3]) -> Self {
        Self { corpora, commands }
    }

    /// Derives each level's command set from its corpus.
    pub fn from_corpora(corpora: [ParallelCorpus; 3]) -> Self {
        let commands = [
            CommandSet::from_corpus(&corpora[0]),
            CommandSet::from_corpus(&corpora[1]),
            CommandSet::from_corpus(&corpora[2]),
        ];
        Self { corpora, commands }
    }

    pub fn corpus(&self, level: Level) -> &ParallelCorpus {
        &self.corpora[level.index()]
    }

    pub fn commands(&self, level: Level) -> &CommandSet {
        &self.commands[level.index()]
    }

    pub fn command_sets(&self) -> &[CommandSet; 3] {
        &self.commands
    }

    pub fn max_len(&self) -> usize {
        self.corpora.iter().map(ParallelCorpus::max_len).max().unwrap_or(0)
    }

    /// Splits every level with the same fraction. Command sets are shared by
    /// both halves.
    pub fn split(&self, test_fraction: f64, seed: u64) -> (LeveledCorpus, LeveledCorpus) {
        let mut train: [ParallelCorpus; 3] = Default::default();
        let mut test: [ParallelCorpus; 3] = Default::default();
        for level in Level::ALL {
            let i = level.index();
            (train[i], test[i]) = self.corpora[i].split(test_fraction, seed.wrapping_add(i as u64));
        }

        (
            LeveledCorpus::new(train, self.commands.clone()),
            LeveledCorpus::new(test, self.commands.clone()),
        )
    }

    /// Checks that every level has data and every reward string is labelled.
    pub fn validate(&self) -> Result<()> {
        for level in Level::ALL {
            let corpus = self.corpus(level);
            if corpus.is_empty() {
                return Err(Error::EmptyCorpus(level.to_string()));
            }
            validate_labels(corpus, self.commands(level))?;
        }
        Ok(())
    }
}

fn validate_labels(corpus: &ParallelCorpus, commands: &CommandSet) -> Result<()> {
    match corpus.pairs.iter().find(|p| commands.label(&p.ml).is_none()) {
        Some(pair) => Err(Error::UnknownCommand(pair.ml.join(" "))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(pairs: &[(&str, &str)]) -> ParallelCorpus {
        ParallelCorpus::new(pairs.iter().map(|(nl, ml)| Pair::new(nl, ml)).collect())
    }

    #[test]
    fn tokenize_lowercases() {
        assert_eq!(tokenize("  Go to the RED room "), ["go", "to", "the", "red", "room"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn level_parsing() {
        assert_eq!("l1".parse::<Level>().unwrap(), Level::L1);
        assert_eq!("2".parse::<Level>().unwrap(), Level::L2);
        assert!("L3".parse::<Level>().is_err());
        assert_eq!(Level::L2.to_string(), "L2");
        assert_eq!(Level::from_index(0), Some(Level::L0));
        assert_eq!(Level::from_index(3), None);
    }

    #[test]
    fn command_labels_follow_first_appearance() {
        let c = corpus(&[
            ("go north", "agentInRoom agent0 room1"),
            ("go south", "agentInRoom agent0 room2"),
            ("head north", "agentInRoom agent0 room1"),
        ]);
        let set = CommandSet::from_corpus(&c);

        assert_eq!(set.len(), 2);
        assert_eq!(set.label(&c.pairs[2].ml), Some(0));
        assert_eq!(set.label(&c.pairs[1].ml), Some(1));
        assert_eq!(set.command(1).unwrap().join(" "), "agentInRoom agent0 room2");
        assert_eq!(set.label(&["nope".to_string()]), None);
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let pairs: Vec<_> = (0..20).map(|i| (format!("cmd {i}"), format!("rf{i}"))).collect();
        let c = ParallelCorpus::new(pairs.iter().map(|(n, m)| Pair::new(n, m)).collect());

        let (train, test) = c.split(0.25, 7);
        assert_eq!(test.len(), 5);
        assert_eq!(train.len(), 15);
        assert!(test.pairs.iter().all(|p| !train.pairs.contains(p)));

        let (train_again, _) = c.split(0.25, 7);
        assert_eq!(train, train_again);
    }

    #[test]
    fn validate_rejects_unknown_reward() {
        let l0 = corpus(&[("go", "a")]);
        let l1 = corpus(&[("go", "b")]);
        let l2 = corpus(&[("go", "c")]);
        let commands = [
            CommandSet::from_corpus(&l0),
            CommandSet::from_corpus(&l1),
            CommandSet::new(vec![vec!["d".to_string()]]),
        ];
        let leveled = LeveledCorpus::new([l0, l1, l2], commands);

        assert!(matches!(leveled.validate(), Err(Error::UnknownCommand(rf)) if rf == "c"));
    }

    #[test]
    fn validate_rejects_empty_level() {
        let leveled = LeveledCorpus::from_corpora([
            corpus(&[("go", "a")]),
            ParallelCorpus::default(),
            corpus(&[("go", "c")]),
        ]);

        assert!(matches!(leveled.validate(), Err(Error::EmptyCorpus(l)) if l == "L1"));
    }
}
