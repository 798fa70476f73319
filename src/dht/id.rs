use super::error::DhtError;
use primitive_types::U256;
use rand::Rng as _;
use std::fmt;
use std::str::FromStr;

pub const ID_LEN: usize = 20;

/// A 160-bit identifier naming either a node or a piece of content.
///
/// The byte array is big-endian, so the derived ordering is numeric
/// ordering and XOR distances compare the way Kademlia expects.
///
/// ```
/// use rdht::dht::Identifier;
///
/// let a: Identifier = "991b2fa313d425258ae99b7a9841940c0a0bc998".parse().unwrap();
/// let b = Identifier::from_bytes(a.as_bytes()).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.distance(&b), Identifier::ZERO);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identifier(pub [u8; ID_LEN]);

/// Content identifiers share the identifier space.
pub type InfoHash = Identifier;

impl Identifier {
    pub const ZERO: Identifier = Identifier([0u8; ID_LEN]);
    pub const MAX: Identifier = Identifier([0xFF; ID_LEN]);

    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != ID_LEN {
            return Err(DhtError::InvalidIdentifier(format!(
                "expected {} bytes, got {}",
                ID_LEN,
                bytes.len()
            )));
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        if s.len() != ID_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DhtError::InvalidIdentifier(format!(
                "expected {} hex characters",
                ID_LEN * 2
            )));
        }

        let mut id = [0u8; ID_LEN];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DhtError::InvalidIdentifier(format!("not hex: {}", s)))?;
        }
        Ok(Self(id))
    }

    /// Converts an integer back into an identifier. Fails for values of
    /// 2^160 and above.
    pub fn from_u256(value: U256) -> Result<Self, DhtError> {
        if value.bits() > ID_LEN * 8 {
            return Err(DhtError::InvalidIdentifier(format!(
                "{} does not fit in 160 bits",
                value
            )));
        }
        let mut wide = [0u8; 32];
        value.to_big_endian(&mut wide);
        Self::from_bytes(&wide[32 - ID_LEN..])
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(ID_LEN * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }

    /// XOR distance, itself a 160-bit unsigned value.
    pub fn distance(&self, other: &Identifier) -> Identifier {
        let mut dist = [0u8; ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Identifier(dist)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Identifier({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Identifier {
    type Err = DhtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; ID_LEN]> for Identifier {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Identifier(bytes)
    }
}
