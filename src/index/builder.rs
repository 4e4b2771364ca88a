use tracing::info;

use crate::node::{load_node, preorder};
use crate::trx::{PageWriteTrx, RecordReader};
use crate::types::{NodeKey, PalimpsestError, Result};

use super::avl::AvlTreeWriter;
use super::listener::{ChangeEvent, Listener};
use super::references::NodeReferences;
use super::{ChangeType, IndexController, IndexDef};

/// Registers `def` under the next free id, fills it from the current
/// document in pre-order and hands its listener to `controller`.
pub(crate) fn build_index(
    trx: &mut PageWriteTrx,
    controller: &mut IndexController,
    def: IndexDef,
) -> Result<IndexDef> {
    let id = trx
        .index_defs()
        .iter()
        .map(|existing| existing.id() + 1)
        .max()
        .unwrap_or(0);
    let def = def.with_id(id);
    trx.register_index(def.clone())?;
    AvlTreeWriter::<u64, NodeReferences>::create(trx, def.page_kind(), id)?;

    let mut listener = Listener::from_def(&def);
    let document = preorder(&*trx, NodeKey::ROOT)?;
    for key in &document {
        let node = load_node(&*trx, *key)?.ok_or(PalimpsestError::NotFound("document node"))?;
        let event = ChangeEvent::for_node(&*trx, &node)?;
        listener.listen(trx, ChangeType::Insert, &event)?;
    }
    controller.add(listener);
    info!(index = id, kind = ?def.index_type(), nodes = document.len(), "index.create");
    Ok(def)
}
