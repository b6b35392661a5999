use crate::*;

fn ty(tag: &str) -> Type {
    Type::parse(tag).expect("valid tag")
}

/// Packs one value against one tag and unpacks it again.
fn roundtrip(tag: &str, value: Value) -> Vec<Value> {
    let container = pack(&[ty(tag)], vec![value]).expect("pack failed");
    unpack(container)
}

// ============================================================================
//  TYPE TAGS
// ============================================================================

#[test]
fn test_parse_renders_canonical_tags() {
    for tag in ["y", "s", "as", "aas", "a{sv}", "a(ii)", "(sia{sv})", "v", "ay", "a{oa{sv}}"] {
        assert_eq!(ty(tag).to_string(), tag);
    }
}

#[test]
fn test_parse_many_counts_complete_types() {
    assert_eq!(signature_len("").unwrap(), 0);
    assert_eq!(signature_len("si").unwrap(), 2);
    assert_eq!(signature_len("a{sv}(ii)as").unwrap(), 3);
    assert_eq!(signature_len("iiiii").unwrap(), 5);
}

#[test]
fn test_parse_rejects_malformed_tags() {
    for bad in ["", "z", "a", "(ii", "a{vs}", "a{(i)s}", "a{s}", "ss"] {
        assert!(Type::parse(bad).is_err(), "'{}' should not parse", bad);
    }
}

#[test]
fn test_parse_is_bounded() {
    let deep = format!("{}i", "a".repeat(types::MAX_DEPTH + 2));
    assert_eq!(Type::parse(&deep), Err(Error::RecursionLimitExceeded));
}

// ============================================================================
//  PACKING
// ============================================================================

#[test]
fn test_roundtrip_canonical_values() {
    assert_eq!(roundtrip("s", "hello".into()), vec![Value::from("hello")]);
    assert_eq!(roundtrip("i", Value::Int32(-42)), vec![Value::Int32(-42)]);
    assert_eq!(roundtrip("b", true.into()), vec![Value::Bool(true)]);
    assert_eq!(roundtrip("d", 1.5.into()), vec![Value::Double(1.5)]);

    let strings = Value::from(vec!["Hello", "World", "!"]);
    assert_eq!(roundtrip("as", strings.clone()), vec![strings]);

    let pairs = Value::Array(vec![
        Value::Struct(vec![Value::Int32(128), Value::Int32(123456)]),
        Value::Struct(vec![Value::Int32(42), Value::Int32(654321)]),
    ]);
    assert_eq!(roundtrip("a(ii)", pairs.clone()), vec![pairs]);

    assert_eq!(roundtrip("n", Value::Int16(-7)), vec![Value::Int16(-7)]);
    assert_eq!(roundtrip("q", Value::UInt16(65535)), vec![Value::UInt16(65535)]);
    assert_eq!(roundtrip("x", Value::Int64(i64::MIN)), vec![Value::Int64(i64::MIN)]);
    assert_eq!(roundtrip("t", Value::UInt64(u64::MAX)), vec![Value::UInt64(u64::MAX)]);

    let path = Value::ObjectPath("/org/example/Test".into());
    assert_eq!(roundtrip("o", path.clone()), vec![path]);
    let sig = Value::Signature("a{sv}".into());
    assert_eq!(roundtrip("g", sig.clone()), vec![sig]);

    let counts = Value::Dict(vec![
        ("one".into(), Value::Int32(1)),
        ("two".into(), Value::Int32(2)),
    ]);
    assert_eq!(roundtrip("a{si}", counts.clone()), vec![counts]);
}

#[test]
fn test_scalar_accessors() {
    let packed = roundtrip("(bd)", Value::Struct(vec![true.into(), Value::Int32(3)]));
    let fields = packed[0].as_slice().expect("struct");
    assert_eq!(fields[0].as_bool(), Some(true));
    assert_eq!(fields[1].as_f64(), Some(3.0));
    assert_eq!(fields[0].as_f64(), None);
    assert_eq!(fields[1].as_bool(), None);
}

#[test]
fn test_integers_coerce_when_in_range() {
    assert_eq!(roundtrip("u", Value::Int32(7)), vec![Value::UInt32(7)]);
    assert_eq!(roundtrip("y", Value::Int32(255)), vec![Value::Byte(255)]);
    assert_eq!(roundtrip("d", Value::Int32(3)), vec![Value::Double(3.0)]);

    let err = pack(&[ty("y")], vec![Value::Int32(256)]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));

    let err = pack(&[ty("u")], vec![Value::Int32(-1)]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn test_array_packs_into_struct_of_same_arity() {
    let packed = roundtrip("(si)", Value::Array(vec!["a".into(), Value::Int32(1)]));
    assert_eq!(packed, vec![Value::Struct(vec!["a".into(), Value::Int32(1)])]);

    let err = pack(&[ty("(si)")], vec![Value::Array(vec!["a".into()])]).unwrap_err();
    assert_eq!(err, Error::ArityMismatch { expected: 2, found: 1 });
}

#[test]
fn test_variant_wraps_inferable_values() {
    let packed = roundtrip("v", Value::UInt32(58));
    let variant = packed[0].as_variant().expect("variant");
    assert_eq!(variant.ty(), &Type::UInt32);
    assert_eq!(variant.value(), &Value::UInt32(58));

    let err = pack(&[ty("v")], vec![Value::Array(vec![])]).unwrap_err();
    assert!(matches!(err, Error::CannotInfer(_)));
}

#[test]
fn test_variant_contents_are_validated() {
    let err = pack(&[ty("v")], vec![Value::ObjectPath("not a path".into())]).unwrap_err();
    assert_eq!(err, Error::InvalidObjectPath("not a path".into()));

    let err = pack(&[ty("v")], vec![Value::Signature("a{vs}".into())]).unwrap_err();
    assert_eq!(err, Error::InvalidSignature("a{vs}".into()));

    let err = Variant::infer(Value::Struct(vec![Value::ObjectPath("/ok".into()), Value::ObjectPath("bad".into())]))
        .unwrap_err();
    assert_eq!(err, Error::InvalidObjectPath("bad".into()));
}

fn nested_arrays(levels: usize) -> Value {
    (0..levels).fold(Value::Int32(1), |inner, _| Value::Array(vec![inner]))
}

#[test]
fn test_variant_nesting_is_bounded() {
    let err = pack(&[ty("v")], vec![nested_arrays(types::MAX_DEPTH + 10)]).unwrap_err();
    assert_eq!(err, Error::RecursionLimitExceeded);
    assert_eq!(nested_arrays(types::MAX_DEPTH + 10).infer_type(), None);

    let shallow = roundtrip("v", nested_arrays(8));
    let variant = shallow[0].as_variant().expect("variant");
    let tag = variant.ty().to_string();
    assert_eq!(tag, format!("{}i", "a".repeat(8)));
    assert_eq!(Type::parse(&tag).as_ref(), Ok(variant.ty()));
}

#[test]
fn test_dict_of_variants() {
    let dict = Value::Dict(vec![("hello".into(), Value::from(Variant::new(Type::String, "world".into()).unwrap()))]);
    let packed = roundtrip("a{sv}", dict.clone());
    assert_eq!(packed, vec![dict]);
    let hello = packed[0].lookup("hello").and_then(Value::as_variant).unwrap();
    assert_eq!(hello.value().as_str(), Some("world"));
}

#[test]
fn test_array_where_integer_expected_is_rejected() {
    let err = pack(&[ty("i")], vec![Value::from(vec!["Hello", "World", "!"])]).unwrap_err();
    assert_eq!(
        err,
        Error::TypeMismatch { expected: "i".into(), found: "array".into() }
    );
}

#[test]
fn test_arity_is_checked_before_values() {
    let err = pack_str("si", vec!["only".into()]).unwrap_err();
    assert_eq!(err, Error::ArityMismatch { expected: 2, found: 1 });
}

#[test]
fn test_object_paths_are_validated() {
    assert_eq!(roundtrip("o", "/org/example/Test".into()), vec![Value::ObjectPath("/org/example/Test".into())]);
    assert!(matches!(pack_str("o", vec!["no/leading".into()]), Err(Error::InvalidObjectPath(_))));
    assert!(matches!(pack_str("o", vec!["/trailing/".into()]), Err(Error::InvalidObjectPath(_))));
}

#[test]
fn test_unpack_as_checks_signature() {
    let container = pack_str("si", vec!["hello".into(), Value::Int32(42)]).unwrap();
    assert_eq!(container.signature(), "(si)");

    let err = unpack_as(container.clone(), &[Type::String]).unwrap_err();
    assert_eq!(err, Error::SignatureMismatch { expected: "(s)".into(), found: "(si)".into() });

    let values = unpack_as(container, &[Type::String, Type::Int32]).unwrap();
    assert_eq!(values, vec![Value::from("hello"), Value::Int32(42)]);
}

#[test]
fn test_empty_container() {
    let empty = Container::empty();
    assert!(empty.is_empty());
    assert_eq!(empty.signature(), "()");
    assert_eq!(pack(&[], vec![]).unwrap(), empty);
}
