//! Serialize and deserialize Krpc style messages exchanged between peers.

mod internal;

use bytes::Bytes;
use tracing::debug;

use crate::common::{Key, Peer};
use crate::{Error, Result};

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u16,

    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

impl ErrorSpecific {
    pub const GENERIC: i32 = 201;
    pub const PROTOCOL: i32 = 203;
    pub const METHOD_UNKNOWN: i32 = 204;
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    /// The sending peer, as it wants to be reached.
    pub requester: Peer,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(TargetRequestArguments),
    FindValue(TargetRequestArguments),
    StoreInit(TargetRequestArguments),
    Store(StoreRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    /// Answers Ping and acknowledges Store.
    Ping(PingResponseArguments),
    /// Answers FindNode, and FindValue when the responder doesn't hold the chunk.
    Nodes(NodesResponseArguments),
    Value(ValueResponseArguments),
    StoreInit(StoreInitResponseArguments),
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder: Peer,
}

// === FIND_NODE / FIND_VALUE / STORE_INIT ===

#[derive(Debug, PartialEq, Clone)]
pub struct TargetRequestArguments {
    pub target: Key,
}

#[derive(Debug, PartialEq, Clone)]
pub struct NodesResponseArguments {
    pub responder: Peer,
    pub nodes: Vec<Peer>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ValueResponseArguments {
    pub responder: Peer,
    pub v: Bytes,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StoreInitResponseArguments {
    pub responder: Peer,
    pub continue_store: bool,
}

// === STORE ===

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    pub target: Key,
    pub v: Bytes,
    /// Original publish time in milliseconds since the unix epoch.
    pub published_at: u64,
}

impl Message {
    fn into_serde_message(self) -> internal::DHTMessage {
        internal::DHTMessage {
            transaction_id: self.transaction_id.to_be_bytes().to_vec(),
            version: self.version,
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    requester,
                    request_type,
                }) => internal::DHTMessageVariant::Request(match request_type {
                    RequestTypeSpecific::Ping => internal::DHTRequestSpecific::Ping {
                        arguments: internal::DHTPingArguments {
                            id: requester.key.to_vec(),
                            ep: requester.endpoint,
                        },
                    },
                    RequestTypeSpecific::FindNode(arguments) => {
                        internal::DHTRequestSpecific::FindNode {
                            arguments: target_arguments(requester, arguments),
                        }
                    }
                    RequestTypeSpecific::FindValue(arguments) => {
                        internal::DHTRequestSpecific::FindValue {
                            arguments: target_arguments(requester, arguments),
                        }
                    }
                    RequestTypeSpecific::StoreInit(arguments) => {
                        internal::DHTRequestSpecific::StoreInit {
                            arguments: target_arguments(requester, arguments),
                        }
                    }
                    RequestTypeSpecific::Store(arguments) => internal::DHTRequestSpecific::Store {
                        arguments: internal::DHTStoreRequestArguments {
                            id: requester.key.to_vec(),
                            ep: requester.endpoint,
                            target: arguments.target.to_vec(),
                            n: arguments.v.len() as u64,
                            v: arguments.v.to_vec(),
                            t: arguments.published_at,
                        },
                    },
                }),

                MessageType::Response(res) => internal::DHTMessageVariant::Response(match res {
                    ResponseSpecific::Ping(arguments) => internal::DHTResponseSpecific::Ping {
                        arguments: internal::DHTPingArguments {
                            id: arguments.responder.key.to_vec(),
                            ep: arguments.responder.endpoint,
                        },
                    },
                    ResponseSpecific::Nodes(arguments) => internal::DHTResponseSpecific::Nodes {
                        arguments: internal::DHTNodesResponseArguments {
                            id: arguments.responder.key.to_vec(),
                            ep: arguments.responder.endpoint,
                            nodes: arguments
                                .nodes
                                .into_iter()
                                .map(|peer| internal::DHTPeer {
                                    id: peer.key.to_vec(),
                                    ep: peer.endpoint,
                                })
                                .collect(),
                        },
                    },
                    ResponseSpecific::Value(arguments) => internal::DHTResponseSpecific::Value {
                        arguments: internal::DHTValueResponseArguments {
                            id: arguments.responder.key.to_vec(),
                            ep: arguments.responder.endpoint,
                            n: arguments.v.len() as u64,
                            v: arguments.v.to_vec(),
                        },
                    },
                    ResponseSpecific::StoreInit(arguments) => {
                        internal::DHTResponseSpecific::StoreInit {
                            arguments: internal::DHTStoreInitResponseArguments {
                                id: arguments.responder.key.to_vec(),
                                ep: arguments.responder.endpoint,
                                c: arguments.continue_store as u8,
                            },
                        }
                    }
                }),

                MessageType::Error(err) => {
                    internal::DHTMessageVariant::Error(internal::DHTErrorSpecific {
                        error_info: (err.code, err.description),
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message> {
        Ok(Message {
            transaction_id: transaction_id(msg.transaction_id)?,
            version: msg.version,
            message_type: match msg.variant {
                internal::DHTMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::DHTRequestSpecific::Ping { arguments } => RequestSpecific {
                            requester: to_peer(arguments.id, arguments.ep)?,
                            request_type: RequestTypeSpecific::Ping,
                        },
                        internal::DHTRequestSpecific::FindNode { arguments } => RequestSpecific {
                            requester: to_peer(arguments.id, arguments.ep)?,
                            request_type: RequestTypeSpecific::FindNode(TargetRequestArguments {
                                target: Key::from_bytes(arguments.target)?,
                            }),
                        },
                        internal::DHTRequestSpecific::FindValue { arguments } => RequestSpecific {
                            requester: to_peer(arguments.id, arguments.ep)?,
                            request_type: RequestTypeSpecific::FindValue(TargetRequestArguments {
                                target: Key::from_bytes(arguments.target)?,
                            }),
                        },
                        internal::DHTRequestSpecific::StoreInit { arguments } => RequestSpecific {
                            requester: to_peer(arguments.id, arguments.ep)?,
                            request_type: RequestTypeSpecific::StoreInit(TargetRequestArguments {
                                target: Key::from_bytes(arguments.target)?,
                            }),
                        },
                        internal::DHTRequestSpecific::Store { arguments } => {
                            check_size(&arguments.v, arguments.n)?;

                            RequestSpecific {
                                requester: to_peer(arguments.id, arguments.ep)?,
                                request_type: RequestTypeSpecific::Store(StoreRequestArguments {
                                    target: Key::from_bytes(arguments.target)?,
                                    v: arguments.v.into(),
                                    published_at: arguments.t,
                                }),
                            }
                        }
                    })
                }

                internal::DHTMessageVariant::Response(res_variant) => {
                    MessageType::Response(match res_variant {
                        internal::DHTResponseSpecific::Ping { arguments } => {
                            ResponseSpecific::Ping(PingResponseArguments {
                                responder: to_peer(arguments.id, arguments.ep)?,
                            })
                        }
                        internal::DHTResponseSpecific::Nodes { arguments } => {
                            ResponseSpecific::Nodes(NodesResponseArguments {
                                responder: to_peer(arguments.id, arguments.ep)?,
                                nodes: to_peers(arguments.nodes),
                            })
                        }
                        internal::DHTResponseSpecific::Value { arguments } => {
                            check_size(&arguments.v, arguments.n)?;

                            ResponseSpecific::Value(ValueResponseArguments {
                                responder: to_peer(arguments.id, arguments.ep)?,
                                v: arguments.v.into(),
                            })
                        }
                        internal::DHTResponseSpecific::StoreInit { arguments } => {
                            ResponseSpecific::StoreInit(StoreInitResponseArguments {
                                responder: to_peer(arguments.id, arguments.ep)?,
                                continue_store: arguments.c != 0,
                            })
                        }
                    })
                }

                internal::DHTMessageVariant::Error(err) => MessageType::Error(ErrorSpecific {
                    code: err.error_info.0,
                    description: err.error_info.1,
                }),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes)?)
    }

    /// Build the error reply owed to an undecodable request, if the envelope is
    /// intact enough to address one.
    pub fn error_reply_for<T: AsRef<[u8]>>(bytes: T) -> Option<Message> {
        let header: internal::DHTMessageHeader = serde_bencode::from_bytes(bytes.as_ref()).ok()?;

        if header.kind != b"q" {
            return None;
        }

        let (code, description) = match header.method.as_deref() {
            Some(method) if KNOWN_METHODS.contains(&method) => {
                (ErrorSpecific::PROTOCOL, "Protocol Error")
            }
            _ => (ErrorSpecific::METHOD_UNKNOWN, "Method Unknown"),
        };

        Some(Message {
            transaction_id: transaction_id(header.transaction_id).ok()?,
            version: None,
            message_type: MessageType::Error(ErrorSpecific {
                code,
                description: description.to_string(),
            }),
        })
    }
}

const KNOWN_METHODS: [&[u8]; 5] = [b"ping", b"find_node", b"find_value", b"store_init", b"store"];

fn target_arguments(
    requester: Peer,
    arguments: TargetRequestArguments,
) -> internal::DHTTargetRequestArguments {
    internal::DHTTargetRequestArguments {
        id: requester.key.to_vec(),
        ep: requester.endpoint,
        target: arguments.target.to_vec(),
    }
}

fn to_peer(id: Vec<u8>, endpoint: String) -> Result<Peer> {
    Ok(Peer::new(Key::from_bytes(id)?, endpoint))
}

/// Decode a peer list, skipping malformed entries.
fn to_peers(nodes: Vec<internal::DHTPeer>) -> Vec<Peer> {
    nodes
        .into_iter()
        .filter_map(|node| match Key::from_bytes(&node.id) {
            Ok(key) => Some(Peer::new(key, node.ep)),
            Err(error) => {
                debug!(?error, endpoint = %node.ep, "Skipping malformed peer entry");
                None
            }
        })
        .collect()
}

fn check_size(v: &[u8], n: u64) -> Result<()> {
    if v.len() as u64 != n {
        return Err(Error::InvalidMessage("value size does not match its declared length"));
    }

    Ok(())
}

// Return the transaction Id as a u16
pub fn transaction_id(bytes: Vec<u8>) -> Result<u16> {
    if bytes.len() == 2 {
        return Ok(((bytes[0] as u16) << 8) | (bytes[1] as u16));
    } else if bytes.len() == 1 {
        return Ok(bytes[0] as u16);
    }

    Err(Error::InvalidTransactionId(bytes))
}
