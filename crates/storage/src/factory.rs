//! Engine selection.

use tracing::debug;
use zinc_core::{EngineKind, IndexName, KvEngine, Result, StorageConfig};

use crate::lsm::LsmEngine;
use crate::ordered::OrderedEngine;

/// Open the store for `index` with the requested engine.
///
/// The store lives at [`StorageConfig::index_path`]; the directory is created
/// if missing.
///
/// # Errors
///
/// `EngineOpen` if the directory cannot be created, is locked by another
/// handle, or holds data the engine cannot read. `InvalidInput` if the
/// configuration's durability mode is invalid.
pub fn open_engine(
    kind: EngineKind,
    index: &IndexName,
    config: &StorageConfig,
) -> Result<Box<dyn KvEngine>> {
    let path = config.index_path(index);
    let durability = config.durability_mode()?;
    debug!(
        target: "zinc::storage",
        index = %index,
        engine = %kind,
        path = %path.display(),
        "Opening engine"
    );

    let engine: Box<dyn KvEngine> = match kind {
        EngineKind::Lsm => Box::new(LsmEngine::open(
            index.as_str(),
            &path,
            config.lsm.clone(),
            durability,
            config.id_lease_size,
        )?),
        EngineKind::OrderedLog => Box::new(OrderedEngine::open(
            index.as_str(),
            &path,
            config.ordered.clone(),
            durability,
        )?),
    };
    Ok(engine)
}
