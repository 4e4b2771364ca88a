use tracing::trace;

use crate::node::{load_node, resolve_name, DocumentNode, NodeKind, QName};
use crate::page::PageKind;
use crate::summary::{PathSummaryReader, ROOT_PCR};
use crate::trx::{PageWriteTrx, RecordReader};
use crate::types::{NodeKey, PalimpsestError, Pcr, Result};

use super::avl::{AvlTreeWriter, KeyCodec, MoveCursor};
use super::cas::{CasValue, ContentType};
use super::name::NameFilter;
use super::path::PathFilter;
use super::references::NodeReferences;
use super::{ChangeType, IndexDef, IndexType};

/// What index listeners learn about an inserted or deleted node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub node_key: NodeKey,
    pub kind: NodeKind,
    pub name: Option<QName>,
    /// Raw (uncompressed) value.
    pub value: Option<Vec<u8>>,
    /// Own PCR for elements and attributes, the parent element's for text.
    pub pcr: Pcr,
}

impl ChangeEvent {
    /// Describes `node` as stored in `trx`.
    pub(crate) fn for_node<R: RecordReader + ?Sized>(trx: &R, node: &DocumentNode) -> Result<Self> {
        let kind = node.kind();
        let name = match node.name() {
            Some(name) => Some(resolve_name(trx, kind, name)?),
            None => None,
        };
        let value = match node.value() {
            Some(value) => Some(value.raw()?.into_owned()),
            None => None,
        };
        let pcr = match kind {
            NodeKind::Element | NodeKind::Attribute => {
                node.name().map_or(ROOT_PCR, |name| name.path_node_key)
            }
            NodeKind::Text => match node.parent_key() {
                Some(parent) => load_node(trx, parent)?
                    .ok_or(PalimpsestError::NotFound("parent node"))?
                    .name()
                    .map_or(ROOT_PCR, |name| name.path_node_key),
                None => ROOT_PCR,
            },
            _ => ROOT_PCR,
        };
        Ok(Self {
            node_key: node.node_key(),
            kind,
            name,
            value,
            pcr,
        })
    }
}

/// Keeps one index current.
#[derive(Debug)]
pub(crate) enum Listener {
    Path {
        index: u32,
        paths: PathFilter,
    },
    Name {
        index: u32,
        names: NameFilter,
    },
    Cas {
        index: u32,
        content_type: ContentType,
        paths: PathFilter,
    },
}

impl Listener {
    pub(crate) fn from_def(def: &IndexDef) -> Self {
        let index = def.id();
        match def.index_type() {
            IndexType::Path => Listener::Path {
                index,
                paths: PathFilter::new(def.paths().iter().cloned()),
            },
            IndexType::Name => Listener::Name {
                index,
                names: NameFilter::new(def.included().clone(), def.excluded().clone()),
            },
            IndexType::Cas => Listener::Cas {
                index,
                content_type: def.content_type(),
                paths: PathFilter::new(def.paths().iter().cloned()),
            },
        }
    }

    pub(crate) fn listen(
        &mut self,
        trx: &mut PageWriteTrx,
        change: ChangeType,
        event: &ChangeEvent,
    ) -> Result<()> {
        match self {
            Listener::Path { index, paths } => {
                if !matches!(event.kind, NodeKind::Element | NodeKind::Attribute) {
                    return Ok(());
                }
                if !paths.filter(&PathSummaryReader::new(&*trx), event.pcr)? {
                    return Ok(());
                }
                let mut writer = AvlTreeWriter::new(trx, PageKind::PathIndex, *index);
                apply(&mut writer, change, event.pcr, event.node_key)
            }
            Listener::Name { index, names } => {
                let (NodeKind::Element, Some(name)) = (event.kind, &event.name) else {
                    return Ok(());
                };
                if !names.accepts(name) {
                    return Ok(());
                }
                let mut writer = AvlTreeWriter::new(trx, PageKind::NameIndex, *index);
                apply(&mut writer, change, name.clone(), event.node_key)
            }
            Listener::Cas {
                index,
                content_type,
                paths,
            } => {
                let (NodeKind::Text | NodeKind::Attribute, Some(raw)) = (event.kind, &event.value)
                else {
                    return Ok(());
                };
                if !paths.filter(&PathSummaryReader::new(&*trx), event.pcr)? {
                    return Ok(());
                }
                let Some(value) = content_type.parse(raw) else {
                    return Ok(());
                };
                let mut writer = AvlTreeWriter::new(trx, PageKind::CasIndex, *index);
                apply(&mut writer, change, CasValue::new(value, event.pcr), event.node_key)
            }
        }
    }

    fn index(&self) -> u32 {
        match self {
            Listener::Path { index, .. }
            | Listener::Name { index, .. }
            | Listener::Cas { index, .. } => *index,
        }
    }
}

fn apply<K: KeyCodec>(
    writer: &mut AvlTreeWriter<'_, K, NodeReferences>,
    change: ChangeType,
    key: K,
    node_key: NodeKey,
) -> Result<()> {
    match change {
        ChangeType::Insert => {
            writer.index(key, NodeReferences::single(node_key), MoveCursor::NoMove)?;
        }
        ChangeType::Delete => {
            writer.remove(&key, node_key)?;
        }
    }
    Ok(())
}

/// Fans change events out to the listeners of every index of a resource.
#[derive(Debug, Default)]
pub struct IndexController {
    listeners: Vec<Listener>,
}

impl IndexController {
    /// Controller maintaining every index in `defs`.
    pub fn new(defs: &[IndexDef]) -> Self {
        Self {
            listeners: defs.iter().map(Listener::from_def).collect(),
        }
    }

    pub(crate) fn add(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Number of maintained indexes.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Reports one change to every listener, in index creation order.
    pub fn notify(
        &mut self,
        trx: &mut PageWriteTrx,
        change: ChangeType,
        event: &ChangeEvent,
    ) -> Result<()> {
        for listener in &mut self.listeners {
            trace!(
                index = listener.index(),
                node = event.node_key.0,
                ?change,
                "index.notify"
            );
            listener.listen(trx, change, event)?;
        }
        Ok(())
    }
}
