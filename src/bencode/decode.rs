use super::error::BencodeError;
use super::value::{BigInteger, Value};
use bytes::Bytes;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 64;

/// Decodes exactly one value, rejecting anything left over.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, rest) = decode_prefix(data)?;

    if !rest.is_empty() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Decodes the value at the front of `data` and returns it together with the
/// unconsumed remainder.
///
/// ```
/// use rdht::bencode::{decode_prefix, Value};
///
/// let (value, rest) = decode_prefix(b"i7e4:spam").unwrap();
/// assert_eq!(value, Value::Integer(7));
/// assert_eq!(rest, b"4:spam");
/// ```
pub fn decode_prefix(data: &[u8]) -> Result<(Value, &[u8]), BencodeError> {
    if data.is_empty() {
        return Err(BencodeError::Empty);
    }
    decode_value(data, 0)
}

fn decode_value(data: &[u8], depth: usize) -> Result<(Value, &[u8]), BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.first() {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => decode_integer(&data[1..]),
        Some(b'l') => decode_list(&data[1..], depth),
        Some(b'd') => decode_dict(&data[1..], depth),
        Some(b'0'..=b'9') => decode_bytes(data),
        Some(&c) => Err(BencodeError::UnexpectedChar(c as char)),
    }
}

fn decode_integer(data: &[u8]) -> Result<(Value, &[u8]), BencodeError> {
    let end = data
        .iter()
        .position(|&b| b == b'e')
        .ok_or(BencodeError::Unterminated("integer"))?;

    let int_str = std::str::from_utf8(&data[..end])
        .map_err(|_| BencodeError::InvalidInteger("invalid utf8".into()))?;
    let rest = &data[end + 1..];

    let (negative, digits) = match int_str.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, int_str),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::InvalidInteger(int_str.into()));
    }

    if (digits.starts_with('0') && digits.len() > 1) || (negative && digits == "0") {
        return Err(BencodeError::InvalidInteger("leading zeros".into()));
    }

    if let Ok(value) = int_str.parse::<i64>() {
        return Ok((Value::Integer(value), rest));
    }

    Ok((Value::BigInteger(BigInteger::from_digits(negative, digits)), rest))
}

fn decode_bytes(data: &[u8]) -> Result<(Value, &[u8]), BencodeError> {
    let colon = data
        .iter()
        .position(|&b| b == b':')
        .ok_or(BencodeError::InvalidStringLength)?;

    let len_digits = &data[..colon];
    if !len_digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::InvalidStringLength);
    }

    let len: usize = std::str::from_utf8(len_digits)
        .map_err(|_| BencodeError::InvalidStringLength)?
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    let body = &data[colon + 1..];
    if len > body.len() {
        return Err(BencodeError::StringOverrun {
            declared: len,
            available: body.len(),
        });
    }

    let (bytes, rest) = body.split_at(len);
    Ok((Value::Bytes(Bytes::copy_from_slice(bytes)), rest))
}

fn decode_list(mut data: &[u8], depth: usize) -> Result<(Value, &[u8]), BencodeError> {
    let mut list = Vec::new();

    loop {
        match data.first() {
            None => return Err(BencodeError::Unterminated("list")),
            Some(b'e') => return Ok((Value::List(list), &data[1..])),
            Some(_) => {
                let (item, rest) = decode_value(data, depth + 1)?;
                list.push(item);
                data = rest;
            }
        }
    }
}

fn decode_dict(mut data: &[u8], depth: usize) -> Result<(Value, &[u8]), BencodeError> {
    let mut dict = BTreeMap::new();

    loop {
        match data.first() {
            None => return Err(BencodeError::Unterminated("dictionary")),
            Some(b'e') => return Ok((Value::Dict(dict), &data[1..])),
            Some(_) => {
                let key = match decode_value(data, depth + 1)? {
                    (Value::Bytes(key), rest) => {
                        data = rest;
                        key
                    }
                    _ => return Err(BencodeError::NonStringKey),
                };

                if data.is_empty() {
                    return Err(BencodeError::Unterminated("dictionary"));
                }

                let (value, rest) = decode_value(data, depth + 1)?;
                dict.insert(key, value);
                data = rest;
            }
        }
    }
}
