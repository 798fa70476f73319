use bytes::Bytes;
use primitive_types::U256;
use std::collections::BTreeMap;
use std::fmt;

/// An integer outside the signed 64-bit range.
///
/// Bencode integers are unbounded, so the decimal digits are kept as decoded
/// and any magnitude survives re-encoding. Arithmetic is available up to 256
/// bits through [`BigInteger::magnitude`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInteger {
    pub negative: bool,
    digits: String,
}

impl BigInteger {
    /// `digits` must be canonical: ASCII digits without leading zeros.
    pub(crate) fn from_digits(negative: bool, digits: &str) -> Self {
        Self {
            negative,
            digits: digits.to_string(),
        }
    }

    pub fn from_u256(magnitude: U256) -> Self {
        Self {
            negative: false,
            digits: magnitude.to_string(),
        }
    }

    /// Decimal digits of the magnitude, without sign.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// The magnitude, or `None` beyond 256 bits.
    pub fn magnitude(&self) -> Option<U256> {
        U256::from_dec_str(&self.digits).ok()
    }
}

impl fmt::Display for BigInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        f.write_str(&self.digits)
    }
}

/// A bencode value.
///
/// # Examples
///
/// ```
/// use rdht::bencode::Value;
///
/// let int: Value = 42i64.into();
/// let string = Value::string("hello");
///
/// assert_eq!(int.as_integer(), Some(42));
/// assert_eq!(string.as_str(), Some("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An integer that fits in `i64`.
    Integer(i64),
    /// An integer that does not fit in `i64`.
    BigInteger(BigInteger),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys, kept sorted by raw key bytes.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b.as_ref()))
    }

    /// Builds the narrowest integer value holding `n`.
    ///
    /// ```
    /// use primitive_types::U256;
    /// use rdht::bencode::Value;
    ///
    /// assert_eq!(Value::unsigned(U256::from(7u64)), Value::Integer(7));
    /// assert!(matches!(Value::unsigned(U256::MAX), Value::BigInteger(_)));
    /// ```
    pub fn unsigned(n: U256) -> Self {
        if n <= U256::from(i64::MAX as u64) {
            Value::Integer(n.low_u64() as i64)
        } else {
            Value::BigInteger(BigInteger::from_u256(n))
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a non-negative 256-bit integer, whatever width it
    /// was decoded with. Wider magnitudes give `None`.
    pub fn as_unsigned(&self) -> Option<U256> {
        match self {
            Value::Integer(i) if *i >= 0 => Some(U256::from(*i as u64)),
            Value::BigInteger(b) if !b.negative => b.magnitude(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    ///
    /// ```
    /// use rdht::bencode::decode;
    ///
    /// let value = decode(b"d1:y1:qe").unwrap();
    /// assert_eq!(value.get(b"y").and_then(|v| v.as_str()), Some("q"));
    /// assert_eq!(value.get(b"t"), None);
    /// ```
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}
