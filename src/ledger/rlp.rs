// Minimal RLP encoder, enough for legacy transactions.

pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        encode_header(out, 0x80, bytes.len());
        out.extend_from_slice(bytes);
    }
}

/// Big-endian with leading zeros stripped; zero encodes as the empty string.
pub fn encode_uint(out: &mut Vec<u8>, value: u128) {
    let be = value.to_be_bytes();
    encode_bytes(out, trim_leading_zeros(&be));
}

pub fn encode_list(out: &mut Vec<u8>, items: &[Vec<u8>]) {
    let len = items.iter().map(Vec::len).sum();
    encode_header(out, 0xc0, len);
    for item in items {
        out.extend_from_slice(item);
    }
}

pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_header(out: &mut Vec<u8>, offset: u8, len: usize) {
    if len <= 55 {
        out.push(offset + len as u8);
    } else {
        let len_be = (len as u64).to_be_bytes();
        let len_bytes = trim_leading_zeros(&len_be);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}

pub fn bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 9);
    encode_bytes(&mut out, value);
    out
}

pub fn uint(value: u128) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    encode_uint(&mut out, value);
    out
}

pub fn list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_list(&mut out, items);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(bytes(b""), vec![0x80]);
        assert_eq!(bytes(&[0x0f]), vec![0x0f]);
        assert_eq!(bytes(&[0x80]), vec![0x81, 0x80]);
        assert_eq!(uint(0), vec![0x80]);
        assert_eq!(uint(15), vec![0x0f]);
        assert_eq!(uint(1024), vec![0x82, 0x04, 0x00]);
        assert_eq!(list(&[bytes(b"cat"), bytes(b"dog")]), vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']);
        assert_eq!(list(&[]), vec![0xc0]);
    }

    #[test]
    fn test_long_string_header() {
        let text = b"Lorem ipsum dolor sit amet, consectetur adipisicing elit";
        let encoded = bytes(text);
        assert_eq!(&encoded[..2], &[0xb8, 0x38]);
        assert_eq!(&encoded[2..], &text[..]);
    }
}
