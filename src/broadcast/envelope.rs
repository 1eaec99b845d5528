use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire payload of one broadcast message: `{data, sender}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub data: Value,
    pub sender: String,
}
