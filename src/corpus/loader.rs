use super::{CommandSet, Level, LeveledCorpus, Pair, ParallelCorpus};
use crate::error::{Error, Result};
use std::{fs, path::Path};
use tracing::{info, warn};

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(Error::io(path))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Reads `<stem>.en` (one command per line) and `<stem>.ml` (the aligned
/// reward functions) from `dir`.
pub fn load_corpus<P: AsRef<Path>>(dir: P, stem: &str) -> Result<ParallelCorpus> {
    let dir = dir.as_ref();
    let en_path = dir.join(format!("{stem}.en"));
    let ml_path = dir.join(format!("{stem}.ml"));

    let commands = read_lines(&en_path)?;
    let rewards = read_lines(&ml_path)?;
    if commands.len() != rewards.len() {
        return Err(Error::LineMismatch {
            commands: en_path,
            command_lines: commands.len(),
            rewards: ml_path,
            reward_lines: rewards.len(),
        });
    }

    let mut pairs = Vec::with_capacity(commands.len());
    for (line, (nl, ml)) in commands.iter().zip(&rewards).enumerate() {
        match (nl.trim().is_empty(), ml.trim().is_empty()) {
            (true, true) => {}
            (false, false) => pairs.push(Pair::new(nl, ml)),
            _ => warn!("{stem}: skipping half-empty pair on line {}", line + 1),
        }
    }

    info!("Loaded {} pairs from {}", pairs.len(), en_path.display());
    Ok(ParallelCorpus::new(pairs))
}

fn load_commands(path: &Path) -> Result<Option<CommandSet>> {
    if !path.exists() {
        return Ok(None);
    }

    let commands = read_lines(path)?
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect();
    Ok(Some(CommandSet::new(commands)))
}

/// Loads `L0`, `L1` and `L2` corpora from `dir`. A `<level>.commands` file,
/// when present, fixes that level's label space; otherwise the labels are the
/// distinct reward functions of the corpus.
pub fn load_leveled<P: AsRef<Path>>(dir: P) -> Result<LeveledCorpus> {
    let dir = dir.as_ref();

    let mut corpora: [ParallelCorpus; 3] = Default::default();
    let mut commands: [CommandSet; 3] = Default::default();
    for level in Level::ALL {
        let stem = level.to_string();
        let corpus = load_corpus(dir, &stem)?;
        commands[level.index()] = match load_commands(&dir.join(format!("{stem}.commands")))? {
            Some(set) => set,
            None => CommandSet::from_corpus(&corpus),
        };
        corpora[level.index()] = corpus;
    }

    let leveled = LeveledCorpus::new(corpora, commands);
    leveled.validate()?;
    Ok(leveled)
}
