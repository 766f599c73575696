use crate::{
    error::{Error, Result},
    model::{GroundingModel, ModelMeta},
};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tch::Device;
use tracing::{info, warn};

const WEIGHTS_FILE: &str = "model.ot";
const META_FILE: &str = "meta.toml";

/// Saves `model` into a new timestamp-numbered folder under `base_folder`
/// and returns that folder. When `limit` is set, the oldest checkpoints
/// beyond it are removed.
pub fn save_checkpoint<P: AsRef<Path>>(
    model: &GroundingModel,
    base_folder: P,
    limit: Option<usize>,
) -> Result<PathBuf> {
    let base_folder = base_folder.as_ref();
    info!("Saving {} model...", model.kind());

    let mut timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    while base_folder.join(timestamp.to_string()).exists() {
        timestamp += 1;
    }

    let folder = base_folder.join(timestamp.to_string());
    fs::create_dir_all(&folder).map_err(Error::io(&folder))?;

    if let Err(err) = write_checkpoint(model, &folder) {
        if let Err(cleanup) = fs::remove_dir_all(&folder) {
            warn!("Failed to remove partial checkpoint {}: {cleanup}", folder.display());
        }
        return Err(err);
    }

    info!("Saved model to: {}", folder.display());

    if let Some(limit) = limit {
        prune(base_folder, limit)?;
    }

    Ok(folder)
}

fn write_checkpoint(model: &GroundingModel, folder: &Path) -> Result<()> {
    model.var_store().save(folder.join(WEIGHTS_FILE))?;

    let meta_path = folder.join(META_FILE);
    let toml_str = toml::to_string(&model.meta())?;
    fs::write(&meta_path, toml_str).map_err(Error::io(&meta_path))
}

fn is_complete(folder: &Path) -> bool {
    folder.join(META_FILE).is_file() && folder.join(WEIGHTS_FILE).is_file()
}

fn numbered_folders(base_folder: &Path) -> Result<Vec<(u128, PathBuf)>> {
    let entries = fs::read_dir(base_folder).map_err(Error::io(base_folder))?;

    let mut folders: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let number = entry.file_name().to_str()?.parse::<u128>().ok()?;
            Some((number, entry.path()))
        })
        .collect();
    folders.sort_by_key(|(number, _)| *number);
    Ok(folders)
}

fn prune(base_folder: &Path, limit: usize) -> Result<()> {
    let folders = numbered_folders(base_folder)?;
    if folders.len() <= limit {
        return Ok(());
    }

    let need_removal = folders.len() - limit;
    for (_, oldest) in folders.into_iter().take(need_removal) {
        fs::remove_dir_all(&oldest).map_err(Error::io(&oldest))?;
        info!("Removed old checkpoint: {}", oldest.display());
    }
    Ok(())
}

/// Loads the highest-numbered complete checkpoint under `base_folder`.
pub fn load_latest<P: AsRef<Path>>(base_folder: P, device: Device) -> Result<GroundingModel> {
    let base_folder = base_folder.as_ref();
    if !base_folder.is_dir() {
        warn!("Checkpoint folder {} does not exist", base_folder.display());
        return Err(Error::NoCheckpoint(base_folder.to_path_buf()));
    }

    for (_, folder) in numbered_folders(base_folder)?.into_iter().rev() {
        if is_complete(&folder) {
            return load_checkpoint(folder, device);
        }
        warn!("Skipping incomplete checkpoint {}", folder.display());
    }

    Err(Error::NoCheckpoint(base_folder.to_path_buf()))
}

/// Loads a checkpoint folder written by [`save_checkpoint`].
pub fn load_checkpoint<P: AsRef<Path>>(folder: P, device: Device) -> Result<GroundingModel> {
    let folder = folder.as_ref();
    if !is_complete(folder) {
        return Err(Error::NoCheckpoint(folder.to_path_buf()));
    }
    let meta_path = folder.join(META_FILE);
    let weights_path = folder.join(WEIGHTS_FILE);

    let toml_str = fs::read_to_string(&meta_path).map_err(Error::io(&meta_path))?;
    let meta: ModelMeta = toml::from_str(&toml_str)?;

    let mut model = GroundingModel::from_meta(meta, device)?;
    model.var_store_mut().load(&weights_path)?;

    info!("Loaded {} model from: {}", model.kind(), folder.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{Level, LeveledCorpus, Pair, ParallelCorpus, tokenize},
        model::{ModelConfig, ModelKind},
    };

    fn corpora() -> LeveledCorpus {
        let level = |pairs: &[(&str, &str)]| {
            ParallelCorpus::new(pairs.iter().map(|(nl, ml)| Pair::new(nl, ml)).collect())
        };
        LeveledCorpus::from_corpora([
            level(&[("go north", "north"), ("go south", "south")]),
            level(&[("open the door", "doorOpen door0")]),
            level(&[("put the box in the red room", "boxInRoom room0")]),
        ])
    }

    fn config() -> ModelConfig {
        ModelConfig {
            embedding_size: 4,
            rnn_size: 4,
            h1_size: 6,
            h2_size: 5,
            level_hidden_size: 3,
            ..Default::default()
        }
    }

    #[test]
    fn round_trip_keeps_predictions() {
        let dir = tempfile::tempdir().unwrap();

        for kind in [ModelKind::SingleRnn, ModelKind::MultiNn, ModelKind::MultiRnn] {
            let model =
                GroundingModel::build(kind, &corpora(), Level::L0, config(), 1, Device::Cpu)
                    .unwrap();
            let base = dir.path().join(kind.to_string());
            let folder = save_checkpoint(&model, &base, None).unwrap();

            let loaded = load_checkpoint(&folder, Device::Cpu).unwrap();
            assert_eq!(loaded.kind(), kind);

            for command in ["go south", "open the door", "put the box somewhere"] {
                let tokens = tokenize(command);
                let (a, b) = (model.score(&tokens), loaded.score(&tokens));
                assert_eq!(a.command, b.command);
                assert!((a.probability - b.probability).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn keeps_only_newest_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let model = GroundingModel::build(
            ModelKind::MultiNn,
            &corpora(),
            Level::L0,
            config(),
            1,
            Device::Cpu,
        )
        .unwrap();

        let mut saved = Vec::new();
        for _ in 0..4 {
            saved.push(save_checkpoint(&model, dir.path(), Some(2)).unwrap());
        }

        let remaining: Vec<_> = numbered_folders(dir.path())
            .unwrap()
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        assert_eq!(remaining, saved[2..].to_vec());

        let latest = load_latest(dir.path(), Device::Cpu).unwrap();
        assert_eq!(latest.kind(), ModelKind::MultiNn);
    }

    #[test]
    fn latest_skips_incomplete_folders() {
        let dir = tempfile::tempdir().unwrap();
        let model = GroundingModel::build(
            ModelKind::MultiRnn,
            &corpora(),
            Level::L0,
            config(),
            1,
            Device::Cpu,
        )
        .unwrap();
        save_checkpoint(&model, dir.path(), None).unwrap();

        let broken = dir.path().join("99999999999999");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join(WEIGHTS_FILE), b"").unwrap();

        let latest = load_latest(dir.path(), Device::Cpu).unwrap();
        assert_eq!(latest.kind(), ModelKind::MultiRnn);
        assert!(matches!(
            load_checkpoint(&broken, Device::Cpu),
            Err(Error::NoCheckpoint(_))
        ));
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_latest(dir.path(), Device::Cpu),
            Err(Error::NoCheckpoint(_))
        ));
        assert!(matches!(
            load_latest(dir.path().join("absent"), Device::Cpu),
            Err(Error::NoCheckpoint(_))
        ));
    }
}
