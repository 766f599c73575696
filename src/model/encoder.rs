use super::{config::ModelConfig, layers::truncated_normal};
use crate::corpus::Encoding;
use tch::{
    Kind, Tensor,
    nn::{self, RNN},
};

/// Turns a batch of encoded commands into one feature row per command.
pub trait Encoder: Sized {
    /// Name used in logs and checkpoints.
    const NAME: &'static str;

    fn new(path: nn::Path, vocab_size: i64, config: &ModelConfig) -> Self;

    fn encoding(max_len: usize) -> Encoding;

    fn output_size(config: &ModelConfig) -> i64;

    /// `inputs` is `[batch, width]` Int64, `lengths` is `[batch]` Int64.
    fn forward(&self, inputs: &Tensor, lengths: &Tensor, train: bool) -> Tensor;
}

/// Word counts projected through the embedding matrix.
pub struct BagOfWords {
    embedding: Tensor,
    dropout: f64,
}

impl Encoder for BagOfWords {
    const NAME: &'static str = "bag-of-words";

    fn new(path: nn::Path, vocab_size: i64, config: &ModelConfig) -> Self {
        Self {
            embedding: truncated_normal(
                &path,
                "embedding",
                &[vocab_size, config.embedding_size],
                config.init_stddev,
            ),
            dropout: config.dropout(),
        }
    }

    fn encoding(_max_len: usize) -> Encoding {
        Encoding::BagOfWords
    }

    fn output_size(config: &ModelConfig) -> i64 {
        config.embedding_size
    }

    fn forward(&self, inputs: &Tensor, _lengths: &Tensor, train: bool) -> Tensor {
        inputs
            .to_kind(Kind::Float)
            .matmul(&self.embedding)
            .dropout(self.dropout, train)
    }
}

/// Embedded word ids run through a GRU; the feature row is the state after
/// each command's last real token.
pub struct Gru {
    embedding: Tensor,
    gru: nn::GRU,
    dropout: f64,
}

impl Encoder for Gru {
    const NAME: &'static str = "gru";

    fn new(path: nn::Path, vocab_size: i64, config: &ModelConfig) -> Self {
        let embedding = truncated_normal(
            &path,
            "embedding",
            &[vocab_size, config.embedding_size],
            config.init_stddev,
        );
        let gru = nn::gru(
            &path / "gru",
            config.embedding_size,
            config.rnn_size,
            Default::default(),
        );

        Self {
            embedding,
            gru,
            dropout: config.dropout(),
        }
    }

    fn encoding(max_len: usize) -> Encoding {
        Encoding::Sequence { max_len }
    }

    fn output_size(config: &ModelConfig) -> i64 {
        config.rnn_size
    }

    fn forward(&self, inputs: &Tensor, lengths: &Tensor, train: bool) -> Tensor {
        // [batch, steps, embedding]
        let embedded = Tensor::embedding(&self.embedding, inputs, -1, false, false)
            .dropout(self.dropout, train);

        // [batch, steps, rnn]
        let (outputs, _) = self.gru.seq(&embedded);
        let size = outputs.size();
        let (batch, hidden) = (size[0], size[2]);

        let last = (lengths - 1)
            .clamp_min(0)
            .view([batch, 1, 1])
            .expand([batch, 1, hidden], false);
        let state = outputs.gather(1, &last, false).squeeze_dim(1);

        // empty commands keep the zero initial state
        let not_empty = lengths.gt(0).to_kind(Kind::Float).unsqueeze(-1);
        state * not_empty
    }
}
