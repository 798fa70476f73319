use std::collections::BTreeMap;

use bytes::Bytes;
use primitive_types::U256;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i03e").is_err());
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i-e").is_err());
    assert!(decode(b"i+5e").is_err());
    assert!(decode(b"i12").is_err());
}

#[test]
fn test_decode_big_integer() {
    // 2^160 - 1, the largest identifier
    let max_id = U256::from(1u8) << 160;
    let max_id = max_id - U256::from(1u8);
    let text = format!("i{}e", max_id);

    let value = decode(text.as_bytes()).unwrap();
    assert_eq!(value.as_unsigned(), Some(max_id));
    assert!(value.as_integer().is_none());
    assert_eq!(encode(&value).unwrap(), text.as_bytes());
}

#[test]
fn test_decode_negative_big_integer() {
    let value = decode(b"i-99999999999999999999e").unwrap();
    match value {
        Value::BigInteger(b) => {
            assert!(b.negative);
            assert_eq!(b.digits(), "99999999999999999999");
            assert_eq!(
                b.magnitude(),
                Some(U256::from_dec_str("99999999999999999999").unwrap())
            );
        }
        other => panic!("expected big integer, got {:?}", other),
    }
    assert_eq!(
        encode(&decode(b"i-99999999999999999999e").unwrap()).unwrap(),
        b"i-99999999999999999999e"
    );
}

#[test]
fn test_decode_integer_wider_than_256_bits() {
    // 2^256, one past what fits in U256
    let digits = "115792089237316195423570985008687907853269984665640564039457584007913129639936";
    let text = format!("i{}e", digits);

    let value = decode(text.as_bytes()).unwrap();
    match &value {
        Value::BigInteger(b) => {
            assert!(!b.negative);
            assert_eq!(b.digits(), digits);
            assert!(b.magnitude().is_none());
        }
        other => panic!("expected big integer, got {:?}", other),
    }
    assert!(value.as_unsigned().is_none());
    assert_eq!(encode(&value).unwrap(), text.as_bytes());
}

#[test]
fn test_decode_i64_bounds_stay_small() {
    assert_eq!(
        decode(b"i9223372036854775807e").unwrap(),
        Value::Integer(i64::MAX)
    );
    assert_eq!(
        decode(b"i-9223372036854775808e").unwrap(),
        Value::Integer(i64::MIN)
    );
    assert!(matches!(
        decode(b"i9223372036854775808e").unwrap(),
        Value::BigInteger(_)
    ));
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(
        decode(b"0:").unwrap(),
        Value::Bytes(Bytes::from_static(b""))
    );
}

#[test]
fn test_decode_list() {
    let result = decode(b"l4:spami42ee").unwrap();
    match result {
        Value::List(l) => {
            assert_eq!(l.len(), 2);
            assert_eq!(l[0], Value::Bytes(Bytes::from_static(b"spam")));
            assert_eq!(l[1], Value::Integer(42));
        }
        _ => panic!("expected list"),
    }
}

#[test]
fn test_decode_dict() {
    let result = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    match result {
        Value::Dict(d) => {
            assert_eq!(d.len(), 2);
            assert_eq!(
                d.get(&Bytes::from_static(b"cow")),
                Some(&Value::Bytes(Bytes::from_static(b"moo")))
            );
        }
        _ => panic!("expected dict"),
    }
}

#[test]
fn test_decode_prefix_returns_remainder() {
    let (first, rest) = decode_prefix(b"l1:ae3:abci5e").unwrap();
    assert_eq!(first, Value::List(vec![Value::string("a")]));

    let (second, rest) = decode_prefix(rest).unwrap();
    assert_eq!(second, Value::string("abc"));

    let (third, rest) = decode_prefix(rest).unwrap();
    assert_eq!(third, Value::Integer(5));
    assert!(rest.is_empty());
}

#[test]
fn test_decode_rejects_empty() {
    assert!(matches!(decode(b""), Err(BencodeError::Empty)));
    assert!(matches!(decode_prefix(b""), Err(BencodeError::Empty)));
}

#[test]
fn test_decode_rejects_truncated_string() {
    assert!(matches!(
        decode(b"10:short"),
        Err(BencodeError::StringOverrun {
            declared: 10,
            available: 5
        })
    ));
    assert!(matches!(
        decode(b"4spam"),
        Err(BencodeError::InvalidStringLength)
    ));
}

#[test]
fn test_decode_rejects_unterminated_containers() {
    assert!(matches!(
        decode(b"l4:spam"),
        Err(BencodeError::Unterminated("list"))
    ));
    assert!(matches!(
        decode(b"d3:cow3:moo"),
        Err(BencodeError::Unterminated("dictionary"))
    ));
    assert!(matches!(
        decode(b"d3:cow"),
        Err(BencodeError::Unterminated("dictionary"))
    ));
}

#[test]
fn test_decode_rejects_non_string_keys() {
    assert!(matches!(decode(b"di1e3:mooe"), Err(BencodeError::NonStringKey)));
    assert!(matches!(decode(b"dle3:mooe"), Err(BencodeError::NonStringKey)));
}

#[test]
fn test_decode_rejects_unknown_prefix() {
    assert!(matches!(
        decode(b"x"),
        Err(BencodeError::UnexpectedChar('x'))
    ));
}

#[test]
fn test_nesting_limit() {
    let deep = "l".repeat(100) + &"e".repeat(100);
    assert!(matches!(
        decode(deep.as_bytes()),
        Err(BencodeError::NestingTooDeep)
    ));
}

#[test]
fn test_encode_integer() {
    assert_eq!(encode(&Value::Integer(42)).unwrap(), b"i42e");
    assert_eq!(encode(&Value::Integer(-42)).unwrap(), b"i-42e");
    assert_eq!(encode(&Value::Integer(0)).unwrap(), b"i0e");
}

#[test]
fn test_encode_list() {
    let list = Value::List(vec![
        Value::Bytes(Bytes::from_static(b"spam")),
        Value::Integer(42),
    ]);
    assert_eq!(encode(&list).unwrap(), b"l4:spami42ee");
}

#[test]
fn test_encode_sorts_keys_by_raw_bytes() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"zz"), Value::Integer(1));
    dict.insert(Bytes::from_static(b"a"), Value::Integer(2));
    dict.insert(Bytes::from_static(b"\xff"), Value::Integer(3));
    dict.insert(Bytes::from_static(b"B"), Value::Integer(4));

    assert_eq!(
        encode(&Value::Dict(dict)).unwrap(),
        b"d1:Bi4e1:ai2e2:zzi1e1:\xffi3ee".as_slice()
    );
}

#[test]
fn test_unsorted_input_reencodes_canonically() {
    let unsorted = b"d4:spam4:eggs3:cow3:mooe";
    let decoded = decode(unsorted).unwrap();
    assert_eq!(encode(&decoded).unwrap(), b"d3:cow3:moo4:spam4:eggse");
}

#[test]
fn test_roundtrip() {
    let original = b"d1:ad2:id20:abcdefghij01234567896:target20:mnopqrstuvwxyz123456e1:q9:find_node1:t2:aa1:y1:qe";
    let decoded = decode(original).unwrap();
    let encoded = encode(&decoded).unwrap();
    assert_eq!(encoded, original);
}

#[test]
fn test_trailing_data_error() {
    assert!(matches!(
        decode(b"i42eextra"),
        Err(BencodeError::TrailingData)
    ));
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert_eq!(value.as_unsigned(), Some(U256::from(42u64)));
    assert!(value.as_bytes().is_none());

    let value = Value::Integer(-1);
    assert_eq!(value.as_unsigned(), None);

    let value = Value::Bytes(Bytes::from_static(b"test"));
    assert_eq!(value.as_str(), Some("test"));
    assert!(value.as_integer().is_none());

    let value = Value::List(vec![]);
    assert!(value.as_list().is_some());
    assert!(value.as_dict().is_none());
}
