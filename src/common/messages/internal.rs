use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "v", with = "serde_bytes")]
    pub version: Option<Vec<u8>>,

    #[serde(flatten)]
    pub variant: DHTMessageVariant,
}

impl DHTMessage {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes.as_ref())?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

/// The envelope fields of a message whose body failed to decode.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessageHeader {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "y", with = "serde_bytes")]
    pub kind: Vec<u8>,

    #[serde(default, rename = "q", with = "serde_bytes")]
    pub method: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum DHTMessageVariant {
    #[serde(rename = "q")]
    Request(DHTRequestSpecific),

    #[serde(rename = "r")]
    Response(DHTResponseSpecific),

    #[serde(rename = "e")]
    Error(DHTErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum DHTRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: DHTPingArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: DHTTargetRequestArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "a")]
        arguments: DHTTargetRequestArguments,
    },

    #[serde(rename = "store_init")]
    StoreInit {
        #[serde(rename = "a")]
        arguments: DHTTargetRequestArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: DHTStoreRequestArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)] // This means order matters! Order these from most to least detailed
pub enum DHTResponseSpecific {
    Value {
        #[serde(rename = "r")]
        arguments: DHTValueResponseArguments,
    },

    Nodes {
        #[serde(rename = "r")]
        arguments: DHTNodesResponseArguments,
    },

    StoreInit {
        #[serde(rename = "r")]
        arguments: DHTStoreInitResponseArguments,
    },

    Ping {
        #[serde(rename = "r")]
        arguments: DHTPingArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTErrorSpecific {
    #[serde(rename = "e")]
    pub error_info: (i32, String),
}

/// Peer entry in a `nodes` list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTPeer {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,
}

// === PING ===

/// Ping request and response, and the Store acknowledgement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTPingArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,
}

// === FIND NODE / FIND VALUE / STORE INIT ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTTargetRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,

    #[serde(with = "serde_bytes")]
    pub target: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTNodesResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,

    pub nodes: Vec<DHTPeer>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTValueResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,

    #[serde(with = "serde_bytes")]
    pub v: Vec<u8>,

    pub n: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStoreInitResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,

    /// 1 if the responder wants the chunk, 0 if it already holds it.
    pub c: u8,
}

// === STORE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStoreRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub ep: String,

    #[serde(with = "serde_bytes")]
    pub target: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub v: Vec<u8>,

    pub n: u64,

    /// Original publish time, milliseconds since the unix epoch.
    pub t: u64,
}
