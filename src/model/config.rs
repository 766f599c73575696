use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub embedding_size: i64,
    /// GRU state size, unused by the bag-of-words encoder
    pub rnn_size: i64,
    pub h1_size: i64,
    pub h2_size: i64,
    /// Hidden layer of the level-selection head
    pub level_hidden_size: i64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Probability of keeping an activation during training
    pub keep_prob: f64,
    /// Stddev of the truncated normal every weight and bias starts from
    pub init_stddev: f64,
    pub learning_rate: f64,
    /// Shuffle the training rows every epoch instead of walking them in order
    pub shuffle: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_size: 30,
            rnn_size: 50,
            h1_size: 60,
            h2_size: 50,
            level_hidden_size: 20,
            epochs: 10,
            batch_size: 16,
            keep_prob: 0.5,
            init_stddev: 0.5,
            learning_rate: 1e-3,
            shuffle: false,
        }
    }
}

impl ModelConfig {
    pub fn dropout(&self) -> f64 {
        1.0 - self.keep_prob
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("embedding_size", self.embedding_size),
            ("rnn_size", self.rnn_size),
            ("h1_size", self.h1_size),
            ("h2_size", self.h2_size),
            ("level_hidden_size", self.level_hidden_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size <= 0) {
            return Err(Error::InvalidConfig(format!("{name} must be positive")));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(Error::InvalidConfig("keep_prob must be in (0, 1]".into()));
        }
        if self.init_stddev <= 0.0 || self.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(
                "init_stddev and learning_rate must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ModelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dropout(), 0.5);
    }

    #[test]
    fn rejects_bad_values() {
        let config = ModelConfig {
            keep_prob: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ModelConfig {
            h2_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(msg)) if msg.contains("h2_size")));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ModelConfig = toml::from_str("epochs = 3\nshuffle = true").unwrap();
        assert_eq!(config.epochs, 3);
        assert!(config.shuffle);
        assert_eq!(config.batch_size, 16);
    }
}
