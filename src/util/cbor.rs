use std::io::ErrorKind;

/// Whether a ciborium read stopped because the stream ran out, which ends a
/// sequence of concatenated items.
pub fn is_cbor_eof(err: &ciborium::de::Error<std::io::Error>) -> bool {
    matches!(err, ciborium::de::Error::Io(io_err) if io_err.kind() == ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stream_is_eof() {
        let err = ciborium::from_reader::<u32, _>(&[][..]).unwrap_err();
        assert!(is_cbor_eof(&err));
    }

    #[test]
    fn type_mismatch_is_not_eof() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&"text", &mut bytes).unwrap();
        let err = ciborium::from_reader::<u32, _>(bytes.as_slice()).unwrap_err();
        assert!(!is_cbor_eof(&err));
    }
}
