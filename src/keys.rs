//! Key-column binding for the two storage models (§3). Both the bundle
//! table and the references table bind keys the same way, uniformly.

use crate::config::StorageModel;
use crate::ids::NodeId;

pub fn key_columns(model: StorageModel) -> &'static str {
    match model {
        StorageModel::BinaryKeys => "NODE_ID",
        StorageModel::SplitLong => "NODE_ID_HI, NODE_ID_LO",
    }
}

pub fn key_where(model: StorageModel, first_placeholder: u32) -> String {
    match model {
        StorageModel::BinaryKeys => format!("NODE_ID = ?{first_placeholder}"),
        StorageModel::SplitLong => format!(
            "NODE_ID_HI = ?{} AND NODE_ID_LO = ?{}",
            first_placeholder,
            first_placeholder + 1
        ),
    }
}

/// Id bytes bound as a single parameter for the binary-keys model, or the
/// `(high, low)` pair for the split-long model.
pub enum KeyParam {
    Binary([u8; 16]),
    Split(i64, i64),
}

pub fn key_param(id: &NodeId, model: StorageModel) -> KeyParam {
    match model {
        StorageModel::BinaryKeys => KeyParam::Binary(*id.as_bytes()),
        StorageModel::SplitLong => {
            let (hi, lo) = id.high_low();
            KeyParam::Split(hi as i64, lo as i64)
        }
    }
}
