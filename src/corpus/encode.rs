use super::{CommandSet, ParallelCorpus, Vocabulary};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tch::{Device, Tensor};

/// How a tokenized command becomes a fixed-width row of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// Word counts over the whole vocabulary.
    BagOfWords,
    /// Word ids padded with `PAD_ID` up to `max_len`.
    Sequence { max_len: usize },
}

/// One encoded command. `len` is the number of real tokens the row holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub ids: Vec<i64>,
    pub len: i64,
}

impl Encoding {
    pub fn width(&self, vocab: &Vocabulary) -> usize {
        match self {
            Encoding::BagOfWords => vocab.len(),
            Encoding::Sequence { max_len } => *max_len,
        }
    }

    pub fn encode(&self, vocab: &Vocabulary, tokens: &[String]) -> Encoded {
        let mut ids = vec![0i64; self.width(vocab)];
        match self {
            Encoding::BagOfWords => {
                for word in tokens {
                    ids[vocab.id(word)] += 1;
                }
                Encoded {
                    ids,
                    len: tokens.len() as i64,
                }
            }
            Encoding::Sequence { max_len } => {
                let len = tokens.len().min(*max_len);
                for (slot, word) in ids.iter_mut().zip(&tokens[..len]) {
                    *slot = vocab.id(word) as i64;
                }
                Encoded {
                    ids,
                    len: len as i64,
                }
            }
        }
    }
}

/// A slice of an encoded corpus, on the training device.
pub struct Batch {
    /// `[batch, width]` Int64
    pub inputs: Tensor,
    /// `[batch]` Int64
    pub lengths: Tensor,
    /// `[batch]` Int64
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> i64 {
        self.labels.size()[0]
    }
}

/// A parallel corpus turned into flat id rows and labels.
#[derive(Debug, Clone)]
pub struct EncodedCorpus {
    width: usize,
    inputs: Vec<i64>,
    lengths: Vec<i64>,
    labels: Vec<i64>,
}

impl EncodedCorpus {
    pub fn new(
        corpus: &ParallelCorpus,
        commands: &CommandSet,
        vocab: &Vocabulary,
        encoding: Encoding,
    ) -> Result<Self> {
        let width = encoding.width(vocab);
        let mut inputs = Vec::with_capacity(corpus.len() * width);
        let mut lengths = Vec::with_capacity(corpus.len());
        let mut labels = Vec::with_capacity(corpus.len());

        for pair in &corpus.pairs {
            let encoded = encoding.encode(vocab, &pair.nl);
            inputs.extend(encoded.ids);
            lengths.push(encoded.len);

            let label = commands
                .label(&pair.ml)
                .ok_or_else(|| Error::UnknownCommand(pair.ml.join(" ")))?;
            labels.push(label as i64);
        }

        Ok(Self {
            width,
            inputs,
            lengths,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn batch(&self, indices: &[usize], device: Device) -> Batch {
        let mut inputs = Vec::with_capacity(indices.len() * self.width);
        for &i in indices {
            inputs.extend_from_slice(&self.inputs[i * self.width..(i + 1) * self.width]);
        }
        let lengths: Vec<i64> = indices.iter().map(|&i| self.lengths[i]).collect();
        let labels: Vec<i64> = indices.iter().map(|&i| self.labels[i]).collect();

        Batch {
            inputs: Tensor::from_slice(&inputs)
                .view([indices.len() as i64, self.width as i64])
                .to_device(device),
            lengths: Tensor::from_slice(&lengths).to_device(device),
            labels: Tensor::from_slice(&labels).to_device(device),
        }
    }
}
