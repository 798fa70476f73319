//! Bencode encoding and decoding ([BEP-3]).
//!
//! Every DHT datagram is a single bencoded dictionary, so this codec sits
//! underneath all of [`crate::dht`].
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! Integers are not limited to machine width: values outside `i64` decode to
//! [`Value::BigInteger`], which keeps their digits whatever the magnitude.
//!
//! ```
//! use rdht::bencode::{decode, encode};
//!
//! let value = decode(b"d1:ai1e1:bl4:spamee").unwrap();
//! assert_eq!(encode(&value).unwrap(), b"d1:ai1e1:bl4:spamee");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::{BigInteger, Value};

#[cfg(test)]
mod tests;
