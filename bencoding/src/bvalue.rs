use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Dictionary keys are raw byte strings kept in a `BTreeMap`, so re-encoding
/// a decoded dictionary yields the canonical (sorted) form.
#[derive(PartialEq, Debug, Clone)]
pub enum BValue {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<BValue>),
    Dict(BTreeMap<Vec<u8>, BValue>),
}

/// Posible decoding errors.
#[derive(PartialEq, Debug)]
pub enum BValueError {
    UnexpectedEnd,
    InvalidPrefix(u8),
    InvalidInt,
    InvalidStringLength,
    InvalidDictKey,
    TrailingData,
}

impl BValue {
    /// Decodes a complete bencoded document.
    ///
    /// It returns a `BValueError` if:
    /// - The input is empty or truncated.
    /// - A length, integer or dictionary key is malformed.
    /// - Bytes remain after the first complete value.
    pub fn decode(data: &[u8]) -> Result<BValue, BValueError> {
        let (value, consumed) = Self::decode_at(data, 0)?;
        if consumed != data.len() {
            return Err(BValueError::TrailingData);
        }
        Ok(value)
    }

    /// Decodes the first complete value of a bencoded document, ignoring
    /// anything that follows it.
    pub fn decode_prefix(data: &[u8]) -> Result<(BValue, usize), BValueError> {
        Self::decode_at(data, 0)
    }

    fn decode_at(data: &[u8], pos: usize) -> Result<(BValue, usize), BValueError> {
        match data.get(pos) {
            None => Err(BValueError::UnexpectedEnd),
            Some(b'i') => Self::decode_int(data, pos),
            Some(b'l') => Self::decode_list(data, pos),
            Some(b'd') => Self::decode_dict(data, pos),
            Some(b'0'..=b'9') => Self::decode_bytes(data, pos),
            Some(other) => Err(BValueError::InvalidPrefix(*other)),
        }
    }

    fn decode_int(data: &[u8], pos: usize) -> Result<(BValue, usize), BValueError> {
        let end = Self::find(data, pos + 1, b'e')?;
        let digits =
            std::str::from_utf8(&data[pos + 1..end]).map_err(|_| BValueError::InvalidInt)?;
        let number = digits.parse::<i64>().map_err(|_| BValueError::InvalidInt)?;
        Ok((BValue::Int(number), end + 1))
    }

    fn decode_bytes(data: &[u8], pos: usize) -> Result<(BValue, usize), BValueError> {
        let colon = Self::find(data, pos, b':')?;
        let digits = std::str::from_utf8(&data[pos..colon])
            .map_err(|_| BValueError::InvalidStringLength)?;
        let length = digits
            .parse::<usize>()
            .map_err(|_| BValueError::InvalidStringLength)?;

        let start = colon + 1;
        let end = start.checked_add(length).ok_or(BValueError::UnexpectedEnd)?;
        if end > data.len() {
            return Err(BValueError::UnexpectedEnd);
        }
        Ok((BValue::Bytes(data[start..end].to_vec()), end))
    }

    fn decode_list(data: &[u8], pos: usize) -> Result<(BValue, usize), BValueError> {
        let mut cursor = pos + 1;
        let mut list = Vec::new();
        loop {
            match data.get(cursor) {
                None => return Err(BValueError::UnexpectedEnd),
                Some(b'e') => return Ok((BValue::List(list), cursor + 1)),
                Some(_) => {
                    let (value, next) = Self::decode_at(data, cursor)?;
                    list.push(value);
                    cursor = next;
                }
            }
        }
    }

    fn decode_dict(data: &[u8], pos: usize) -> Result<(BValue, usize), BValueError> {
        let mut cursor = pos + 1;
        let mut dict = BTreeMap::new();
        loop {
            match data.get(cursor) {
                None => return Err(BValueError::UnexpectedEnd),
                Some(b'e') => return Ok((BValue::Dict(dict), cursor + 1)),
                Some(_) => {
                    let (key, next) = Self::decode_at(data, cursor)?;
                    let key = match key {
                        BValue::Bytes(key) => key,
                        _ => return Err(BValueError::InvalidDictKey),
                    };
                    let (value, next) = Self::decode_at(data, next)?;
                    dict.insert(key, value);
                    cursor = next;
                }
            }
        }
    }

    fn find(data: &[u8], from: usize, needle: u8) -> Result<usize, BValueError> {
        data[from.min(data.len())..]
            .iter()
            .position(|b| *b == needle)
            .map(|offset| from + offset)
            .ok_or(BValueError::UnexpectedEnd)
    }

    /// Re-encodes the value into its bencoded byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            BValue::Int(n) => {
                out.push(b'i');
                out.extend(n.to_string().into_bytes());
                out.push(b'e');
            }
            BValue::Bytes(bytes) => {
                out.extend(bytes.len().to_string().into_bytes());
                out.push(b':');
                out.extend(bytes);
            }
            BValue::List(list) => {
                out.push(b'l');
                for value in list {
                    value.encode_into(out);
                }
                out.push(b'e');
            }
            BValue::Dict(dict) => {
                out.push(b'd');
                for (key, value) in dict {
                    BValue::Bytes(key.clone()).encode_into(out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the byte string, if this is a `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the byte string decoded as UTF-8, if this is a `Bytes`.
    pub fn as_str(&self) -> Option<String> {
        match self {
            BValue::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BValue]> {
        match self {
            BValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BValue>> {
        match self {
            BValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}
