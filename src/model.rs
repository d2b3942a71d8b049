use std::collections::BTreeSet;

use crate::ids::{NodeId, QName};

/// Property value type tags (spec §3, `PropertyEntry.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyType {
    String = 1,
    Binary = 2,
    Long = 3,
    Double = 4,
    Date = 5,
    Boolean = 6,
    Name = 7,
    Path = 8,
    Reference = 9,
    Decimal = 10,
    Uri = 11,
    WeakReference = 12,
}

impl PropertyType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::String,
            2 => Self::Binary,
            3 => Self::Long,
            4 => Self::Double,
            5 => Self::Date,
            6 => Self::Boolean,
            7 => Self::Name,
            8 => Self::Path,
            9 => Self::Reference,
            10 => Self::Decimal,
            11 => Self::Uri,
            12 => Self::WeakReference,
            _ => return None,
        })
    }
}

/// A single property value. `Binary` values carry either the literal bytes
/// (pre-externalization, or decoded-and-inlined) or a resolved blob id.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Binary(BinaryValue),
    Long(i64),
    Double(f64),
    Date(String),
    Boolean(bool),
    Name(String),
    Path(String),
    Reference(String),
    Decimal(String),
    Uri(String),
    WeakReference(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryValue {
    Inline(Vec<u8>),
    External(String),
}

impl BinaryValue {
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            BinaryValue::Inline(b) => Some(b.len()),
            BinaryValue::External(_) => None,
        }
    }
}

/// One property entry within a bundle (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    pub prop_type: PropertyType,
    pub multi_valued: bool,
    pub mod_count: u16,
    pub values: Vec<Value>,
}

impl PropertyEntry {
    pub fn single(prop_type: PropertyType, value: Value) -> Self {
        Self {
            prop_type,
            multi_valued: false,
            mod_count: 0,
            values: vec![value],
        }
    }
}

/// `(name, id)` pair in a bundle's child list. Order is significant and
/// preserved; same-name siblings are permitted, duplicate ids within one
/// bundle are not (spec §3).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub struct ChildEntry {
    pub name: QName,
    pub id: NodeId,
}

/// The persisted unit (spec §3). `is_new` and `size_hint` are transient
/// bookkeeping supplied by the caller's change log; they are never
/// serialized by the codec.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePropBundle {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub node_type_name: QName,
    pub mixin_type_names: BTreeSet<QName>,
    /// Iteration order is insertion order, which is also encoding order.
    pub properties: Vec<(QName, PropertyEntry)>,
    pub child_entries: Vec<ChildEntry>,
    pub referenceable: bool,
    pub mod_count: u16,
    pub is_new: bool,
    pub size_hint: u64,
}

impl NodePropBundle {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, node_type_name: QName) -> Self {
        Self {
            id,
            parent_id,
            node_type_name,
            mixin_type_names: BTreeSet::new(),
            properties: Vec::new(),
            child_entries: Vec::new(),
            referenceable: false,
            mod_count: 0,
            is_new: true,
            size_hint: 0,
        }
    }

    pub fn property(&self, name: &QName) -> Option<&PropertyEntry> {
        self.properties.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn set_property(&mut self, name: QName, entry: PropertyEntry) {
        if let Some(slot) = self.properties.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = entry;
        } else {
            self.properties.push((name, entry));
        }
    }
}

/// A set of property ids referring to a target node; the target's node id
/// is the key this is stored under (spec §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeReferences {
    pub ref_property_ids: BTreeSet<String>,
}

impl NodeReferences {
    pub fn is_empty(&self) -> bool {
        self.ref_property_ids.is_empty()
    }
}

/// A batched set of mutations applied atomically by the write driver (C7).
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    pub added: Vec<NodePropBundle>,
    pub modified: Vec<NodePropBundle>,
    pub removed: Vec<NodePropBundle>,
    pub modified_refs: Vec<(NodeId, NodeReferences)>,
    pub removed_refs: Vec<NodeId>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.modified_refs.is_empty()
            && self.removed_refs.is_empty()
    }
}
