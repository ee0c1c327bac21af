use proptest::prelude::*;
use tilerpc_format::{decode, encode, DecodingError, FormatCode, FormatString, Value};

fn arb_code() -> impl Strategy<Value = FormatCode> {
    prop_oneof![
        Just(FormatCode::U8),
        Just(FormatCode::U16),
        Just(FormatCode::U32),
        Just(FormatCode::I8),
        Just(FormatCode::I16),
        Just(FormatCode::I32),
        Just(FormatCode::Pad),
        (1usize..24).prop_map(FormatCode::Bytes),
    ]
}

fn arb_value(code: FormatCode) -> BoxedStrategy<Option<Value>> {
    match code {
        FormatCode::Pad => Just(None).boxed(),
        FormatCode::Bytes(len) => proptest::collection::vec(any::<u8>(), len)
            .prop_map(|b| Some(Value::from(b)))
            .boxed(),
        other => {
            let (min, max) = other.int_range().expect("integer code has a range");
            (min..=max).prop_map(|v| Some(Value::Int(v))).boxed()
        }
    }
}

/// A format together with a value tuple that fits it.
fn arb_format_and_values() -> impl Strategy<Value = (FormatString, Vec<Value>)> {
    proptest::collection::vec(arb_code(), 0..12).prop_flat_map(|codes| {
        let values: Vec<_> = codes.iter().map(|&code| arb_value(code)).collect();
        let format = FormatString::from_codes(codes).expect("generated codes are within limits");
        (Just(format), values).prop_map(|(format, values)| {
            (format, values.into_iter().flatten().collect::<Vec<_>>())
        })
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode((format, values) in arb_format_and_values()) {
        let payload = encode(&format, &values).expect("valid values should encode");
        prop_assert_eq!(payload.len(), format.width());
        let decoded = decode(&format, &payload).expect("encoded payload should decode");
        prop_assert_eq!(decoded, values);
    }

    #[test]
    fn format_text_reparses_to_same_layout((format, _values) in arb_format_and_values()) {
        let reparsed = FormatString::parse(format.as_str()).expect("rendered format should parse");
        prop_assert_eq!(reparsed.codes(), format.codes());
    }

    #[test]
    fn wrong_length_always_fails(
        codes in proptest::collection::vec(arb_code(), 0..8),
        len in 0usize..64,
    ) {
        let format = FormatString::from_codes(codes).expect("generated codes are within limits");
        prop_assume!(len != format.width());
        let payload = vec![0u8; len];
        let err = decode(&format, &payload).unwrap_err();
        prop_assert_eq!(err, DecodingError::LengthMismatch { expected: format.width(), actual: len });
    }

    #[test]
    fn over_long_payload_fails((format, values) in arb_format_and_values(), extra in 1usize..8) {
        let mut payload = encode(&format, &values).expect("valid values should encode").to_vec();
        payload.extend(std::iter::repeat(0xAA).take(extra));
        let is_length_mismatch = matches!(
            decode(&format, &payload),
            Err(DecodingError::LengthMismatch { .. })
        );
        prop_assert!(is_length_mismatch);
    }

    #[test]
    fn out_of_range_integers_are_rejected(value in prop_oneof![i64::MIN..-1, 256i64..i64::MAX]) {
        let format = FormatString::parse("B").unwrap();
        prop_assert!(encode(&format, &[Value::Int(value)]).is_err());
    }
}
