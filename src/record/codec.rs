//! Encoding and schema-driven decoding of `Example` / `SequenceExample` payloads.
//!
//! The wire shape is the fixed protobuf layout:
//!
//! ```text
//! Example         { 1: Features }
//! SequenceExample { 1: Features context, 2: FeatureLists }
//! Features        { 1: repeated entry { 1: key, 2: Feature } }
//! FeatureLists    { 1: repeated entry { 1: key, 2: FeatureList } }
//! FeatureList     { 1: repeated Feature }
//! Feature         { oneof 1: BytesList, 2: FloatList, 3: Int64List }
//! ```
//!
//! Decoding first indexes a map's entries by key without touching their
//! values, then decodes only the fields the schema selects.

use super::wire::{
    put_len_delimited, put_tag, put_varint, WireReader, WIRE_FIXED32, WIRE_LEN, WIRE_VARINT,
};
use super::{Example, Feature, FeatureType, Schema, SequenceExample};
use crate::error::{Error, Result};
use bytes::BufMut;
use std::collections::BTreeMap;

const FEATURE_BYTES: u32 = 1;
const FEATURE_FLOAT: u32 = 2;
const FEATURE_INT64: u32 = 3;

// ============================================================================
// Encoding
// ============================================================================

fn encode_feature(feature: &Feature) -> Vec<u8> {
    let mut list = Vec::new();
    let field = match feature {
        Feature::BytesList(values) => {
            for v in values {
                put_len_delimited(&mut list, 1, v);
            }
            FEATURE_BYTES
        }
        Feature::FloatList(values) => {
            if !values.is_empty() {
                put_tag(&mut list, 1, WIRE_LEN);
                put_varint(&mut list, 4 * values.len() as u64);
                for v in values {
                    list.put_f32_le(*v);
                }
            }
            FEATURE_FLOAT
        }
        Feature::Int64List(values) => {
            if !values.is_empty() {
                let mut packed = Vec::with_capacity(values.len());
                for v in values {
                    // int64 is encoded as its two's complement bit pattern.
                    put_varint(&mut packed, *v as u64);
                }
                put_len_delimited(&mut list, 1, &packed);
            }
            FEATURE_INT64
        }
    };
    let mut out = Vec::with_capacity(list.len() + 2);
    put_len_delimited(&mut out, field, &list);
    out
}

fn encode_map_entry(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 4);
    put_len_delimited(&mut entry, 1, key.as_bytes());
    put_len_delimited(&mut entry, 2, value);
    put_len_delimited(out, 1, &entry);
}

fn encode_features<'a>(fields: impl Iterator<Item = (&'a str, &'a Feature)>) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, feature) in fields {
        encode_map_entry(&mut out, key, &encode_feature(feature));
    }
    out
}

pub(super) fn encode_example(example: &Example) -> Vec<u8> {
    let mut out = Vec::new();
    put_len_delimited(&mut out, 1, &encode_features(example.iter()));
    out
}

pub(super) fn encode_sequence_example(seq: &SequenceExample) -> Vec<u8> {
    let mut lists = Vec::new();
    for (key, steps) in &seq.feature_lists {
        let mut list = Vec::new();
        for step in steps {
            put_len_delimited(&mut list, 1, &encode_feature(step));
        }
        encode_map_entry(&mut lists, key, &list);
    }

    let mut out = Vec::new();
    put_len_delimited(&mut out, 1, &encode_features(seq.context.iter()));
    put_len_delimited(&mut out, 2, &lists);
    out
}

// ============================================================================
// Decoding
// ============================================================================

/// Raw, undecoded map values keyed by field name. Later entries win.
type RawMap<'a> = BTreeMap<&'a str, &'a [u8]>;

fn index_map_entries<'a>(bytes: &'a [u8], into: &mut RawMap<'a>) -> Result<()> {
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        let (field, wire_type) = r.read_tag()?;
        if field == 1 && wire_type == WIRE_LEN {
            let (key, value) = read_map_entry(r.read_len_delimited()?)?;
            into.insert(key, value);
        } else {
            r.skip(wire_type)?;
        }
    }
    Ok(())
}

fn read_map_entry(bytes: &[u8]) -> Result<(&str, &[u8])> {
    let mut key: &[u8] = &[];
    let mut value: &[u8] = &[];
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => key = r.read_len_delimited()?,
            (2, WIRE_LEN) => value = r.read_len_delimited()?,
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    let key = std::str::from_utf8(key)
        .map_err(|e| Error::malformed_record(format!("feature name is not UTF-8: {e}")))?;
    Ok((key, value))
}

fn decode_bytes_list(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => out.push(r.read_len_delimited()?.to_vec()),
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(out)
}

fn decode_float_list(bytes: &[u8]) -> Result<Vec<f32>> {
    let mut out = Vec::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => {
                let packed = r.read_len_delimited()?;
                if packed.len() % 4 != 0 {
                    return Err(Error::malformed_record(format!(
                        "packed float list of {} bytes is not a multiple of 4",
                        packed.len()
                    )));
                }
                out.extend(
                    packed
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                );
            }
            (1, WIRE_FIXED32) => out.push(f32::from_bits(r.read_fixed32()?)),
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(out)
}

fn decode_int64_list(bytes: &[u8]) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => {
                let mut packed = WireReader::new(r.read_len_delimited()?);
                while !packed.is_empty() {
                    out.push(packed.read_varint()? as i64);
                }
            }
            (1, WIRE_VARINT) => out.push(r.read_varint()? as i64),
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(out)
}

/// Decode a `Feature` message; `None` if no list kind is set.
fn decode_feature(bytes: &[u8]) -> Result<Option<Feature>> {
    let mut feature = None;
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        let (field, wire_type) = r.read_tag()?;
        if wire_type != WIRE_LEN {
            r.skip(wire_type)?;
            continue;
        }
        let body = r.read_len_delimited()?;
        // oneof: the last kind on the wire wins.
        match field {
            FEATURE_BYTES => feature = Some(Feature::BytesList(decode_bytes_list(body)?)),
            FEATURE_FLOAT => feature = Some(Feature::FloatList(decode_float_list(body)?)),
            FEATURE_INT64 => feature = Some(Feature::Int64List(decode_int64_list(body)?)),
            _ => {}
        }
    }
    Ok(feature)
}

/// Decode one feature and check it against the declared type.
fn resolve_feature(name: &str, bytes: &[u8], declared: Option<FeatureType>) -> Result<Feature> {
    match (decode_feature(bytes)?, declared) {
        (Some(f), Some(expected)) if f.feature_type() != expected => {
            Err(Error::type_mismatch(name, expected, f.feature_type()))
        }
        (Some(f), _) => Ok(f),
        (None, Some(expected)) => Ok(Feature::empty(expected)),
        (None, None) => Err(Error::malformed_record(format!(
            "field '{name}' carries no value and has no declared type"
        ))),
    }
}

fn resolve_feature_list(name: &str, bytes: &[u8], declared: Option<FeatureType>) -> Result<Vec<Feature>> {
    let mut steps = Vec::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => steps.push(resolve_feature(name, r.read_len_delimited()?, declared)?),
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(steps)
}

/// Apply `schema` to the indexed entries, decoding only the selected ones.
fn project<T>(
    raw: &RawMap<'_>,
    schema: &Schema,
    decode: impl Fn(&str, &[u8], Option<FeatureType>) -> Result<T>,
) -> Result<BTreeMap<String, T>> {
    let mut out = BTreeMap::new();
    if schema.selects_all() {
        for (name, bytes) in raw {
            out.insert((*name).to_string(), decode(name, bytes, None)?);
        }
        return Ok(out);
    }
    for spec in schema.fields() {
        let bytes = raw
            .get(spec.name.as_str())
            .ok_or_else(|| Error::unknown_field(&spec.name))?;
        out.insert(spec.name.clone(), decode(&spec.name, bytes, spec.kind)?);
    }
    Ok(out)
}

/// Decode an `Example` payload through `schema`.
///
/// # Errors
/// [`Error::UnknownField`], [`Error::TypeMismatch`] or
/// [`Error::MalformedRecord`].
pub fn decode_example(bytes: &[u8], schema: &Schema) -> Result<Example> {
    let mut raw = RawMap::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            // Repeated occurrences of an embedded message merge.
            (1, WIRE_LEN) => index_map_entries(r.read_len_delimited()?, &mut raw)?,
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(Example::from(project(&raw, schema, resolve_feature)?))
}

/// Decode a `SequenceExample` payload, projecting `context` and
/// `feature_lists` through their own schemas.
///
/// # Errors
/// [`Error::UnknownField`], [`Error::TypeMismatch`] or
/// [`Error::MalformedRecord`].
pub fn decode_sequence_example(
    bytes: &[u8],
    context_schema: &Schema,
    sequence_schema: &Schema,
) -> Result<SequenceExample> {
    let mut context = RawMap::new();
    let mut lists = RawMap::new();
    let mut r = WireReader::new(bytes);
    while !r.is_empty() {
        match r.read_tag()? {
            (1, WIRE_LEN) => index_map_entries(r.read_len_delimited()?, &mut context)?,
            (2, WIRE_LEN) => index_map_entries(r.read_len_delimited()?, &mut lists)?,
            (_, wire_type) => r.skip(wire_type)?,
        }
    }
    Ok(SequenceExample {
        context: Example::from(project(&context, context_schema, resolve_feature)?),
        feature_lists: project(&lists, sequence_schema, resolve_feature_list)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Example {
        Example::builder()
            .bytes("image", [b"\x00\x01".as_slice(), b"".as_slice()])
            .float("weights", [1.0, -2.5, f32::MAX])
            .int64("label", [0, 1, -1, i64::MIN, i64::MAX])
            .int64("empty", Vec::new())
            .build()
    }

    #[test]
    fn example_roundtrip_with_empty_schema() {
        let ex = sample();
        let decoded = decode_example(&ex.encode(), &Schema::new()).unwrap();
        assert_eq!(decoded, ex);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(sample().encode(), sample().encode());
    }

    #[test]
    fn known_wire_bytes_for_single_int() {
        let ex = Example::builder().int64("a", [1]).build();
        // Example{1: Features{1: entry{1:"a", 2: Feature{3: Int64List{1: [1]}}}}}
        let expected = vec![
            0x0a, 0x0c, // features
            0x0a, 0x0a, // entry
            0x0a, 0x01, b'a', // key
            0x12, 0x05, // value
            0x1a, 0x03, // int64_list
            0x0a, 0x01, 0x01, // packed [1]
        ];
        assert_eq!(ex.encode(), expected);
    }

    #[test]
    fn projection_skips_unlisted_fields() {
        let schema = Schema::new().field("label", FeatureType::Int);
        let decoded = decode_example(&sample().encode(), &schema).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded.contains("label"));
    }

    #[test]
    fn missing_field_is_unknown_field() {
        let schema = Schema::new().field("nope", FeatureType::Int);
        match decode_example(&sample().encode(), &schema) {
            Err(Error::UnknownField { field }) => assert_eq!(field, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn declared_type_must_match_wire() {
        let schema = Schema::new().field("weights", FeatureType::Int);
        match decode_example(&sample().encode(), &schema) {
            Err(Error::TypeMismatch {
                field,
                expected,
                found,
            }) => {
                assert_eq!(field, "weights");
                assert_eq!(expected, FeatureType::Int);
                assert_eq!(found, FeatureType::Float);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn accepts_unpacked_numeric_lists() {
        // FloatList{1: fixed32 1.5, 1: fixed32 2.0}, Int64List{1: varint 5, 1: varint 6}
        let mut floats = Vec::new();
        for v in [1.5f32, 2.0] {
            put_tag(&mut floats, 1, WIRE_FIXED32);
            floats.put_f32_le(v);
        }
        let mut ints = Vec::new();
        for v in [5u64, 6] {
            put_tag(&mut ints, 1, WIRE_VARINT);
            put_varint(&mut ints, v);
        }
        let mut f_msg = Vec::new();
        put_len_delimited(&mut f_msg, FEATURE_FLOAT, &floats);
        let mut i_msg = Vec::new();
        put_len_delimited(&mut i_msg, FEATURE_INT64, &ints);

        let mut features = Vec::new();
        encode_map_entry(&mut features, "f", &f_msg);
        encode_map_entry(&mut features, "i", &i_msg);
        let mut payload = Vec::new();
        put_len_delimited(&mut payload, 1, &features);

        let decoded = decode_example(&payload, &Schema::new()).unwrap();
        assert_eq!(decoded.get("f"), Some(&Feature::FloatList(vec![1.5, 2.0])));
        assert_eq!(decoded.get("i"), Some(&Feature::Int64List(vec![5, 6])));
    }

    #[test]
    fn empty_feature_takes_declared_type() {
        let mut features = Vec::new();
        encode_map_entry(&mut features, "x", &[]);
        let mut payload = Vec::new();
        put_len_delimited(&mut payload, 1, &features);

        let typed = Schema::new().field("x", FeatureType::Float);
        let decoded = decode_example(&payload, &typed).unwrap();
        assert_eq!(decoded.get("x"), Some(&Feature::FloatList(vec![])));

        assert!(matches!(
            decode_example(&payload, &Schema::new()),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn garbage_is_malformed_not_panic() {
        for payload in [&[0x0a, 0xff][..], &[0x0a, 0x02, 0x0a], &[0x0f]] {
            assert!(matches!(
                decode_example(payload, &Schema::new()),
                Err(Error::MalformedRecord(_))
            ));
        }
    }

    #[test]
    fn sequence_steps_keep_their_order() {
        let seq = SequenceExample::builder()
            .context_int64("length", [3])
            .int64_sequence("tokens", [vec![0, 0, 1], vec![0, 1, 0], vec![1, 0, 0]])
            .float_sequence("scores", [vec![0.5], vec![], vec![0.25, 0.75]])
            .build();
        let decoded = decode_sequence_example(
            &seq.encode(),
            &Schema::new().field("length", FeatureType::Int),
            &Schema::new()
                .field("tokens", FeatureType::Int)
                .field("scores", FeatureType::Float),
        )
        .unwrap();
        assert_eq!(decoded, seq);
    }

    #[test]
    fn sequence_step_type_mismatch_names_field() {
        let seq = SequenceExample::builder()
            .int64_sequence("tokens", [vec![1]])
            .build();
        let err = decode_sequence_example(
            &seq.encode(),
            &Schema::new(),
            &Schema::new().field("tokens", FeatureType::Bytes),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { ref field, .. } if field == "tokens"));
    }
}
