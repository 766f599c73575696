use super::ParallelCorpus;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const PAD: &str = "<<PAD>>";
pub const PAD_ID: usize = 0;
pub const UNK: &str = "<<UNK>>";
pub const UNK_ID: usize = 1;

/// Word ids for the command side of the corpora.
///
/// Ids 0 and 1 are reserved for padding and unknown words, the rest follow
/// the sorted order of the training words so a vocabulary rebuilt from the
/// same corpora always assigns the same ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    id2word: Vec<String>,
    word2id: AHashMap<String, usize>,
}

impl Vocabulary {
    pub fn build<'a, I>(corpora: I) -> Self
    where
        I: IntoIterator<Item = &'a ParallelCorpus>,
    {
        let words: BTreeSet<&str> = corpora
            .into_iter()
            .flat_map(|corpus| corpus.pairs.iter())
            .flat_map(|pair| pair.nl.iter().map(String::as_str))
            .filter(|word| *word != PAD && *word != UNK)
            .collect();

        let id2word: Vec<String> = [PAD, UNK]
            .into_iter()
            .chain(words)
            .map(str::to_string)
            .collect();

        Self::from(id2word)
    }

    pub fn id(&self, word: &str) -> usize {
        self.word2id.get(word).copied().unwrap_or(UNK_ID)
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.id2word.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2word.is_empty()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(id2word: Vec<String>) -> Self {
        let word2id = id2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        Self { id2word, word2id }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.id2word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Pair;

    #[test]
    fn reserved_ids_come_first() {
        let corpus = ParallelCorpus::new(vec![
            Pair::new("go to the red room", "a"),
            Pair::new("the blue room", "b"),
        ]);
        let vocab = Vocabulary::build([&corpus]);

        assert_eq!(vocab.word(PAD_ID), Some(PAD));
        assert_eq!(vocab.word(UNK_ID), Some(UNK));
        assert_eq!(vocab.len(), 2 + 6);
        assert_eq!(vocab.word(2), Some("blue"));
        assert_eq!(vocab.id("room"), 5);
        assert_eq!(vocab.id("green"), UNK_ID);
    }

    #[test]
    fn survives_toml_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            vocab: Vocabulary,
        }

        let corpus = ParallelCorpus::new(vec![Pair::new("move the chair", "x")]);
        let vocab = Vocabulary::build([&corpus]);
        let text = toml::to_string(&Wrapper { vocab }).unwrap();
        let back: Wrapper = toml::from_str(&text).unwrap();

        assert_eq!(back.vocab.len(), 5);
        assert_eq!(back.vocab.id("chair"), 2);
    }
}
