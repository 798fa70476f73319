use super::bloom::BloomFilter;
use super::endpoint::Endpoint;
use super::error::DhtError;
use super::id::{Identifier, InfoHash};
use super::node::{Contact, COMPACT_NODE_V4_LEN, COMPACT_NODE_V6_LEN};
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::collections::BTreeMap;

pub type TransactionId = Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping,
    FindNode {
        target: Identifier,
    },
    GetPeers {
        info_hash: InfoHash,
        /// Ask for the `BFsd`/`BFpe` bloom filters (BEP-33).
        scrape: bool,
        /// Leave seeds out of `values` (BEP-33).
        noseed: bool,
    },
    AnnouncePeer {
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        seed: bool,
        implied_port: bool,
    },
    /// A method we do not serve; answered with error 204.
    Unknown {
        method: String,
    },
}

impl Query {
    pub fn method(&self) -> &str {
        match self {
            Query::Ping => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
            Query::Unknown { method } => method,
        }
    }
}

/// The `r` dictionary of a response. Fields a method does not use stay empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: Identifier,
    /// Split into `nodes` and `nodes6` by address family on the wire.
    pub nodes: Vec<Contact>,
    pub values: Option<Vec<Endpoint>>,
    pub token: Option<Bytes>,
    pub seeds_filter: Option<BloomFilter>,
    pub peers_filter: Option<BloomFilter>,
}

impl Response {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            values: None,
            token: None,
            seeds_filter: None,
            peers_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Query { sender: Identifier, query: Query },
    Response(Response),
    Error { code: i64, message: String },
    /// Self-addressed maintenance trigger. Only honoured when `token`
    /// matches the receiving server's own refresh token.
    Refresh { token: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub version: Option<Bytes>,
    pub body: MessageBody,
}

impl DhtMessage {
    pub fn query(
        transaction_id: TransactionId,
        version: Option<Bytes>,
        sender: Identifier,
        query: Query,
    ) -> Self {
        Self {
            transaction_id,
            version,
            body: MessageBody::Query { sender, query },
        }
    }

    pub fn response(
        transaction_id: TransactionId,
        version: Option<Bytes>,
        response: Response,
    ) -> Self {
        Self {
            transaction_id,
            version,
            body: MessageBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: impl Into<String>) -> Self {
        Self {
            transaction_id,
            version: None,
            body: MessageBody::Error {
                code,
                message: message.into(),
            },
        }
    }

    pub fn refresh(transaction_id: TransactionId, token: Bytes) -> Self {
        Self {
            transaction_id,
            version: None,
            body: MessageBody::Refresh { token },
        }
    }

    /// Decodes one datagram.
    ///
    /// Undecodable bencode surfaces as [`DhtError::Bencode`]; a query whose
    /// envelope is fine but whose arguments are not surfaces as
    /// [`DhtError::MalformedQuery`] carrying its transaction id.
    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;

        let dict = value
            .as_dict()
            .ok_or_else(|| DhtError::InvalidMessage("expected dict".into()))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let version = dict
            .get(b"v".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();

        let msg_type = dict
            .get(b"y".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        let body = match msg_type {
            "q" => Self::parse_query(dict).map_err(|reason| DhtError::MalformedQuery {
                transaction_id: transaction_id.clone(),
                reason,
            })?,
            "r" => Self::parse_response(dict)?,
            "e" => Self::parse_error(dict)?,
            _ => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type: {}",
                    msg_type
                )))
            }
        };

        Ok(Self {
            transaction_id,
            version,
            body,
        })
    }

    fn parse_query(dict: &BTreeMap<Bytes, Value>) -> Result<MessageBody, String> {
        let query_name = dict
            .get(b"q".as_slice())
            .and_then(|v| v.as_str())
            .ok_or("missing query name")?;

        let args = dict
            .get(b"a".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or("missing query args")?;

        if query_name == "refresh" {
            let token = args
                .get(b"token".as_slice())
                .and_then(|v| v.as_bytes())
                .cloned()
                .ok_or("missing refresh token")?;
            return Ok(MessageBody::Refresh { token });
        }

        let sender = args
            .get(b"id".as_slice())
            .and_then(|v| v.as_bytes())
            .and_then(|b| Identifier::from_bytes(b).ok())
            .ok_or("missing or invalid id")?;

        let query = match query_name {
            "ping" => Query::Ping,
            "find_node" => Query::FindNode {
                target: identifier_arg(args, b"target")?,
            },
            "get_peers" => Query::GetPeers {
                info_hash: identifier_arg(args, b"info_hash")?,
                scrape: flag_arg(args, b"scrape"),
                noseed: flag_arg(args, b"noseed"),
            },
            "announce_peer" => {
                let info_hash = identifier_arg(args, b"info_hash")?;
                let implied_port = flag_arg(args, b"implied_port");

                let port = match args.get(b"port".as_slice()).and_then(|v| v.as_integer()) {
                    Some(port) => u16::try_from(port).map_err(|_| "port out of range")?,
                    None if implied_port => 0,
                    None => return Err("missing port".into()),
                };

                let token = args
                    .get(b"token".as_slice())
                    .and_then(|v| v.as_bytes())
                    .cloned()
                    .ok_or("missing token")?;

                Query::AnnouncePeer {
                    info_hash,
                    port,
                    token,
                    seed: flag_arg(args, b"seed"),
                    implied_port,
                }
            }
            other => Query::Unknown {
                method: other.to_string(),
            },
        };

        Ok(MessageBody::Query { sender, query })
    }

    fn parse_response(dict: &BTreeMap<Bytes, Value>) -> Result<MessageBody, DhtError> {
        let resp = dict
            .get(b"r".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| DhtError::InvalidMessage("missing response dict".into()))?;

        let id = resp
            .get(b"id".as_slice())
            .and_then(|v| v.as_bytes())
            .and_then(|b| Identifier::from_bytes(b).ok())
            .ok_or_else(|| DhtError::InvalidMessage("missing id in response".into()))?;

        let mut nodes = Vec::new();
        if let Some(data) = resp.get(b"nodes".as_slice()).and_then(|v| v.as_bytes()) {
            nodes.extend(Contact::parse_all(data, COMPACT_NODE_V4_LEN));
        }
        if let Some(data) = resp.get(b"nodes6".as_slice()).and_then(|v| v.as_bytes()) {
            nodes.extend(Contact::parse_all(data, COMPACT_NODE_V6_LEN));
        }

        let values = resp
            .get(b"values".as_slice())
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_bytes())
                    .filter_map(|b| Endpoint::from_packed(b).ok())
                    .collect()
            });

        let token = resp
            .get(b"token".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();

        let filter = |key: &[u8]| {
            resp.get(key)
                .and_then(|v| v.as_bytes())
                .and_then(|b| BloomFilter::from_bytes(b).ok())
        };

        Ok(MessageBody::Response(Response {
            id,
            nodes,
            values,
            token,
            seeds_filter: filter(b"BFsd".as_slice()),
            peers_filter: filter(b"BFpe".as_slice()),
        }))
    }

    fn parse_error(dict: &BTreeMap<Bytes, Value>) -> Result<MessageBody, DhtError> {
        let error = dict
            .get(b"e".as_slice())
            .and_then(|v| v.as_list())
            .ok_or_else(|| DhtError::InvalidMessage("missing error list".into()))?;

        let code = error.first().and_then(|v| v.as_integer()).unwrap_or(0);

        let message = error
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();

        Ok(MessageBody::Error { code, message })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DhtError> {
        let mut dict = BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );

        if let Some(version) = &self.version {
            dict.insert(Bytes::from_static(b"v"), Value::Bytes(version.clone()));
        }

        match &self.body {
            MessageBody::Query { sender, query } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));
                dict.insert(Bytes::from_static(b"q"), Value::string(query.method()));

                let mut args = BTreeMap::new();
                args.insert(Bytes::from_static(b"id"), Value::bytes(sender.as_bytes()));

                match query {
                    Query::Ping | Query::Unknown { .. } => {}
                    Query::FindNode { target } => {
                        args.insert(Bytes::from_static(b"target"), Value::bytes(target.as_bytes()));
                    }
                    Query::GetPeers {
                        info_hash,
                        scrape,
                        noseed,
                    } => {
                        args.insert(
                            Bytes::from_static(b"info_hash"),
                            Value::bytes(info_hash.as_bytes()),
                        );
                        if *scrape {
                            args.insert(Bytes::from_static(b"scrape"), Value::Integer(1));
                        }
                        if *noseed {
                            args.insert(Bytes::from_static(b"noseed"), Value::Integer(1));
                        }
                    }
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        seed,
                        implied_port,
                    } => {
                        args.insert(
                            Bytes::from_static(b"info_hash"),
                            Value::bytes(info_hash.as_bytes()),
                        );
                        args.insert(Bytes::from_static(b"port"), Value::Integer(*port as i64));
                        args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
                        if *seed {
                            args.insert(Bytes::from_static(b"seed"), Value::Integer(1));
                        }
                        if *implied_port {
                            args.insert(Bytes::from_static(b"implied_port"), Value::Integer(1));
                        }
                    }
                }

                dict.insert(Bytes::from_static(b"a"), Value::Dict(args));
            }
            MessageBody::Refresh { token } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));
                dict.insert(Bytes::from_static(b"q"), Value::string("refresh"));

                let mut args = BTreeMap::new();
                args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
                dict.insert(Bytes::from_static(b"a"), Value::Dict(args));
            }
            MessageBody::Response(response) => {
                dict.insert(Bytes::from_static(b"y"), Value::string("r"));
                dict.insert(Bytes::from_static(b"r"), Value::Dict(encode_response(response)));
            }
            MessageBody::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        Ok(encode(&Value::Dict(dict))?)
    }
}

fn encode_response(response: &Response) -> BTreeMap<Bytes, Value> {
    let mut resp = BTreeMap::new();
    resp.insert(Bytes::from_static(b"id"), Value::bytes(response.id.as_bytes()));

    let (v4, v6): (Vec<&Contact>, Vec<&Contact>) = response
        .nodes
        .iter()
        .partition(|c| c.endpoint.is_ipv4());

    if !v4.is_empty() {
        let compact: Vec<u8> = v4.iter().flat_map(|c| c.to_compact()).collect();
        resp.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::from(compact)));
    }
    if !v6.is_empty() {
        let compact: Vec<u8> = v6.iter().flat_map(|c| c.to_compact()).collect();
        resp.insert(Bytes::from_static(b"nodes6"), Value::Bytes(Bytes::from(compact)));
    }

    if let Some(values) = &response.values {
        let values = values
            .iter()
            .map(|endpoint| Value::Bytes(endpoint.to_packed()))
            .collect();
        resp.insert(Bytes::from_static(b"values"), Value::List(values));
    }

    if let Some(token) = &response.token {
        resp.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
    }
    if let Some(filter) = &response.seeds_filter {
        resp.insert(Bytes::from_static(b"BFsd"), Value::bytes(filter.as_bytes()));
    }
    if let Some(filter) = &response.peers_filter {
        resp.insert(Bytes::from_static(b"BFpe"), Value::bytes(filter.as_bytes()));
    }

    resp
}

fn identifier_arg(args: &BTreeMap<Bytes, Value>, key: &[u8]) -> Result<Identifier, String> {
    args.get(key)
        .and_then(|v| v.as_bytes())
        .and_then(|b| Identifier::from_bytes(b).ok())
        .ok_or_else(|| format!("missing or invalid {}", String::from_utf8_lossy(key)))
}

fn flag_arg(args: &BTreeMap<Bytes, Value>, key: &[u8]) -> bool {
    args.get(key).and_then(|v| v.as_integer()) == Some(1)
}
