// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests: descriptors through the registry, compiler and runtime.

use crate::descriptor::{checksum, ClassDescriptorBuilder, Element, FieldDescriptor};
use crate::meta::ScalarKind;
use crate::value::IntoValue;
use crate::*;
use std::sync::Arc;
use std::thread;

// ===== Helpers =====

fn register(
    registry: &Registry,
    desc: std::result::Result<ClassDescriptor, SchemaError>,
) -> Arc<ClassDescriptor> {
    registry
        .add(desc.expect("valid descriptor"))
        .expect("registration")
}

fn encode(codec: &Codec, rec: &Record) -> Vec<u8> {
    let mut w = WBuffer::new();
    let n = codec.encode(&mut w, rec).expect("encode");
    assert_eq!(n, w.len(), "encode reports every byte written");
    w.into_bytes()
}

fn decode(codec: &Codec, bytes: &[u8]) -> Result<Record> {
    let mut r = RBuffer::new(bytes);
    let rec = codec.read(&mut r)?;
    assert!(r.is_eof(), "decode consumed {} of {} bytes", r.pos(), bytes.len());
    Ok(rec)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn p2_and_particle(registry: &Registry) -> Arc<ClassDescriptor> {
    register(
        registry,
        ClassDescriptorBuilder::new("P2", 1)
            .field(FieldDescriptor::scalar("px", "", ScalarKind::Double))
            .field(FieldDescriptor::scalar("py", "", ScalarKind::Double))
            .build(),
    );
    register(
        registry,
        ClassDescriptorBuilder::new("Particle", 1)
            .field(FieldDescriptor::object("Pos", "", "P2"))
            .field(FieldDescriptor::tstring("Name", ""))
            .build(),
    )
}

// ===== Concrete scenarios =====

#[test]
fn test_scalar_int32() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Scalar", 1)
            .field(FieldDescriptor::scalar("I32", "", ScalarKind::Int))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let rec = Record::new("Scalar").with("I32", -132i32);
    let bytes = encode(&codec, &rec);
    assert_eq!(&bytes[6..], (-132i32).to_be_bytes());
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);
}

#[test]
fn test_fixed_array_f64() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Arr", 1)
            .field(FieldDescriptor::fixed_array("F64s", "[3]", ScalarKind::Double, &[3]))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let rec = Record::new("Arr").with("F64s", [42.0f64, 43.0, 44.0].into_value());
    let bytes = encode(&codec, &rec);
    assert_eq!(bytes.len(), 6 + 3 * 8);
    let out = decode(&codec, &bytes).expect("decode");
    assert_eq!(out.get_as::<[f64; 3]>("F64s").expect("array"), [42.0, 43.0, 44.0]);

    // wrong length never reaches the wire
    let short = Record::new("Arr").with("F64s", vec![1.0f64]);
    match codec.encode(&mut WBuffer::new(), &short) {
        Err(Error::Wire(WireError::LengthMismatch { field, expected, actual, .. })) => {
            assert_eq!(field, "F64s");
            assert_eq!((expected, actual), (3, 1));
        }
        other => panic!("Expected LengthMismatch, got {:?}", other),
    }
}

#[test]
fn test_counted_array_and_altered_count() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Counted", 1)
            .field(FieldDescriptor::scalar("N", "", ScalarKind::Int))
            .field(FieldDescriptor::counted_array("Bools", "[N]", ScalarKind::Bool, "N"))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let rec = Record::new("Counted")
        .with("N", 3i32)
        .with("Bools", vec![true, false, true]);
    let mut bytes = encode(&codec, &rec);
    // header, N, is-array marker, payload
    assert_eq!(&bytes[6..], [0, 0, 0, 3, 1, 1, 0, 1]);
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);

    bytes[9] = 4;
    match decode(&codec, &bytes) {
        Err(e) => assert!(e.is_wire(), "Expected wire error, got {:?}", e),
        Ok(rec) => panic!("Altered count decoded as {}", rec),
    }

    // the live counter must agree with the array on encode too
    let stale = Record::new("Counted")
        .with("N", 2i32)
        .with("Bools", vec![true, false, true]);
    assert!(matches!(
        codec.encode(&mut WBuffer::new(), &stale),
        Err(Error::Wire(WireError::LengthMismatch { .. }))
    ));
}

#[test]
fn test_map_blocks_are_contiguous() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Dict", 1)
            .field(FieldDescriptor::stl("Map", "", "map<int,string>").expect("map member"))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let entries = Value::Map(vec![
        (Value::I32(1), "one".into()),
        (Value::I32(2), "two".into()),
        (Value::I32(3), "three".into()),
    ]);
    let rec = Record::new("Dict").with("Map", entries);
    let bytes = encode(&codec, &rec);

    let keys = find(&bytes, &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]).expect("contiguous key block");
    let one = find(&bytes, b"\x03one").expect("one");
    let two = find(&bytes, b"\x03two").expect("two");
    let three = find(&bytes, b"\x05three").expect("three");
    assert!(keys + 12 <= one && one < two && two < three);

    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);
}

#[test]
fn test_nested_particle() {
    let registry = Registry::new();
    let desc = p2_and_particle(&registry);
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let pos = Record::new("P2").with("px", 142.0).with("py", 166.0);
    let rec = Record::new("Particle").with("Pos", pos).with("Name", "HEP-1");
    let bytes = encode(&codec, &rec);
    // outer header, inner header + 2 doubles, 1 + 5 string bytes
    assert_eq!(bytes.len(), 6 + 6 + 16 + 6);

    let out = decode(&codec, &bytes).expect("decode");
    assert_eq!(out, rec);
    let pos = out.get("Pos").and_then(Value::as_record).expect("nested record");
    assert_eq!(pos.get_as::<f64>("py").expect("py"), 166.0);
}

#[test]
fn test_loop_array_elements() {
    let registry = Registry::new();
    p2_and_particle(&registry);
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Track", 1)
            .field(FieldDescriptor::scalar("fN", "", ScalarKind::Int))
            .field(FieldDescriptor::loop_array("fPoints", "[fN]", "P2", "fN"))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let p2 = |px: f64, py: f64| Record::new("P2").with("px", px).with("py", py);
    let rec = Record::new("Track")
        .with("fN", 2i32)
        .with("fPoints", vec![p2(1.0, 2.0), p2(3.0, 4.0)]);
    let bytes = encode(&codec, &rec);

    // header 6, fN 4, is-array marker, then two full P2 records
    assert_eq!(bytes.len(), 6 + 4 + 1 + 2 * (6 + 16));
    assert_eq!(&bytes[6..11], [0, 0, 0, 2, 1]);
    let element_header = [0x40, 0, 0, 18, 0, 1];
    assert_eq!(&bytes[11..17], element_header);
    assert_eq!(&bytes[17..25], 1.0f64.to_be_bytes());
    assert_eq!(&bytes[33..39], element_header);
    assert_eq!(&bytes[47..55], 4.0f64.to_be_bytes());

    let out = decode(&codec, &bytes).expect("decode");
    assert_eq!(out, rec);
    let points = out.get_as::<Vec<Record>>("fPoints").expect("points");
    assert_eq!(points[1].get_as::<f64>("px").expect("px"), 3.0);

    // each element is checked against its own byte count
    let mut bad = bytes.clone();
    bad[36] = 17;
    match decode(&codec, &bad) {
        Err(Error::Wire(WireError::ByteCount { class, .. })) => assert_eq!(class, "P2"),
        other => panic!("Expected byte count failure, got {:?}", other),
    }
}

#[test]
fn test_latest_version_lookup() {
    let registry = Registry::new();
    for version in [1, 3, 2] {
        register(
            &registry,
            ClassDescriptorBuilder::new("Evolving", version)
                .field(FieldDescriptor::scalar("x", "", ScalarKind::Float))
                .build(),
        );
    }
    let latest = registry.get("Evolving", -1).expect("latest");
    assert_eq!(latest.version(), 3);
    assert_eq!(registry.get("Evolving", 2).expect("exact").version(), 2);
    assert!(registry.get("Evolving", 4).is_none());

    let codec = registry
        .codec("Evolving", -1, StreamMode::ObjectWise)
        .expect("latest codec");
    assert_eq!(codec.version(), 3);
}

// ===== Properties =====

#[test]
fn test_concurrent_compile_once() {
    let registry = Registry::new();
    let desc = p2_and_particle(&registry);

    let codecs: Vec<Arc<Codec>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| compile(&registry, &desc, StreamMode::ObjectWise).expect("compile"))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("compile thread"))
            .collect()
    });

    let cached = desc.compiled(StreamMode::ObjectWise).expect("cached codec");
    for codec in &codecs {
        assert!(Arc::ptr_eq(codec, &cached), "every caller shares one build");
    }
    assert!(desc.compiled(StreamMode::MemberWise).is_none());
}

#[test]
fn test_concurrent_decode_shares_codec() {
    let registry = Registry::new();
    let desc = p2_and_particle(&registry);
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    thread::scope(|s| {
        for i in 0..4 {
            let codec = &codec;
            s.spawn(move || {
                let pos = Record::new("P2").with("px", f64::from(i)).with("py", 0.5);
                let rec = Record::new("Particle").with("Pos", pos).with("Name", format!("p{}", i));
                let bytes = encode(codec, &rec);
                assert_eq!(decode(codec, &bytes).expect("decode"), rec);
            });
        }
    });
}

#[test]
fn test_checksum_determinism() {
    let fields = |name: &str, kind: ScalarKind, dims: &[i32]| {
        vec![
            FieldDescriptor::scalar("fN", "", ScalarKind::Int),
            FieldDescriptor::fixed_array(name, "", kind, dims),
        ]
    };
    let base = checksum("Calo", &fields("fE", ScalarKind::Float, &[4]));
    assert_eq!(base, checksum("Calo", &fields("fE", ScalarKind::Float, &[4])));
    assert_ne!(base, checksum("Calo2", &fields("fE", ScalarKind::Float, &[4])));
    assert_ne!(base, checksum("Calo", &fields("fEnergy", ScalarKind::Float, &[4])));
    assert_ne!(base, checksum("Calo", &fields("fE", ScalarKind::Double, &[4])));
    assert_ne!(base, checksum("Calo", &fields("fE", ScalarKind::Float, &[5])));
    assert_ne!(base, checksum("Calo", &fields("fE", ScalarKind::Float, &[2, 2])));

    let built = ClassDescriptorBuilder::new("Calo", 1)
        .fields(fields("fE", ScalarKind::Float, &[4]))
        .build()
        .expect("Calo");
    assert_eq!(built.checksum(), base);
}

#[test]
fn test_missing_counter_fails_at_compile() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("NoCounter", 1)
            .field(FieldDescriptor::counted_array("x", "[n]", ScalarKind::Float, "n"))
            .build(),
    );
    match compile(&registry, &desc, StreamMode::ObjectWise) {
        Err(Error::Schema(SchemaError::UnresolvedCounter { .. })) => {}
        other => panic!("Expected UnresolvedCounter, got {:?}", other),
    }
}

#[test]
fn test_byte_count_detects_corruption() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Blob", 1)
            .field(FieldDescriptor::tstring("name", ""))
            .field(FieldDescriptor::stl("v", "", "vector<int>").expect("vector"))
            .field(FieldDescriptor::scalar("x", "", ScalarKind::Double))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");
    let rec = Record::new("Blob")
        .with("name", "calo")
        .with("v", vec![7i32, 8, 9])
        .with("x", 0.25);
    let bytes = encode(&codec, &rec);

    // declared byte count
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..32 {
        let mut bad = bytes.clone();
        let at = rng.usize(2..4);
        bad[at] ^= rng.u8(1..=255);
        match decode(&codec, &bad) {
            Err(Error::Wire(WireError::ByteCount { class, .. })) => assert_eq!(class, "Blob"),
            Err(Error::Wire(WireError::UnexpectedEof { .. })) => {}
            other => panic!("Expected byte count failure, got {:?}", other),
        }
    }

    // vector length: class header 6, name 5, vector header 6
    for n in [2u8, 4] {
        let mut bad = bytes.clone();
        bad[20] = n;
        match decode(&codec, &bad) {
            Err(Error::Wire(WireError::ByteCount { class, .. })) => {
                assert_eq!(class, "vector<int>");
            }
            other => panic!("Expected byte count failure for n={}, got {:?}", n, other),
        }
    }
}

#[test]
fn test_roundtrip_random_payloads() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Random", 1)
            .field(FieldDescriptor::scalar("n", "", ScalarKind::Counter).with_size(8))
            .field(FieldDescriptor::counted_array("u", "[n]", ScalarKind::UShort, "n"))
            .field(FieldDescriptor::stl("s", "", "vector<string>").expect("strings"))
            .field(FieldDescriptor::stl("d", "", "deque<Long64_t>").expect("deque"))
            .field(FieldDescriptor::scalar("f", "[-1,1,20]", ScalarKind::Double32))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let mut rng = fastrand::Rng::with_seed(0x524f_4f54);
    for _ in 0..64 {
        let n = rng.usize(0..40);
        let strings: Vec<String> = (0..rng.usize(0..5))
            .map(|_| (0..rng.usize(0..300)).map(|_| rng.alphanumeric()).collect())
            .collect();
        let rec = Record::new("Random")
            .with("n", n as i64)
            .with("u", (0..n).map(|_| rng.u16(..)).collect::<Vec<_>>())
            .with("s", strings)
            .with("d", (0..rng.usize(0..8)).map(|_| rng.i64(..)).collect::<Vec<_>>())
            .with("f", 0.0);
        let bytes = encode(&codec, &rec);
        assert_eq!(decode(&codec, &bytes).expect("decode"), rec);
    }
}

// ===== Built-in classes =====

#[test]
fn test_tobject_custom_streamer() {
    let registry = Registry::with_builtins();
    let codec = registry
        .codec("TObject", 1, StreamMode::ObjectWise)
        .expect("TObject codec");

    let rec = Record::new("TObject")
        .with("fUniqueID", 7u32)
        .with("fBits", 0x0300_0000u32);
    let bytes = encode(&codec, &rec);
    assert_eq!(bytes, [0, 1, 0, 0, 0, 7, 3, 0, 0, 0]);
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);

    // referenced objects carry a process id
    let rec = Record::new("TObject")
        .with("fUniqueID", 1u32)
        .with("fBits", 1u32 << 4);
    assert_eq!(encode(&codec, &rec).len(), 12);
}

#[test]
fn test_tnamed_base() {
    let registry = Registry::with_builtins();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Histo", 2)
            .title("histogram")
            .field(FieldDescriptor::base("TNamed", 1))
            .field(FieldDescriptor::scalar("fEntries", "", ScalarKind::Double))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");
    assert_eq!(codec.slot_names(), ["fUniqueID", "fBits", "fName", "fTitle", "fEntries"]);

    let mut rec = codec.new_record();
    rec.set("fBits", 0x0300_0000u32);
    rec.set("fName", "h1");
    rec.set("fTitle", "energy");
    rec.set("fEntries", 12.0);
    let bytes = encode(&codec, &rec);
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);

    // the alias answers for the class too
    let mut aliased = rec.clone();
    aliased.class = "histogram".into();
    assert_eq!(encode(&codec, &aliased), bytes);
}

#[test]
fn test_global_registry_has_builtins() {
    let global = Registry::global();
    assert!(global.contains("TObject", 1));
    assert!(global.contains("TNamed", 1));
}

// ===== Descriptor wire form =====

#[test]
fn test_descriptor_marshal_roundtrip() {
    let registry = Registry::with_builtins();
    p2_and_particle(&registry);
    let desc = ClassDescriptorBuilder::new("Event", 4)
        .field(FieldDescriptor::base("TNamed", 1))
        .field(FieldDescriptor::scalar("fN", "", ScalarKind::Int))
        .field(FieldDescriptor::counted_array("fE", "[fN]", ScalarKind::Float, "fN"))
        .field(FieldDescriptor::loop_array("fTracks", "[fN]", "P2", "fN"))
        .field(FieldDescriptor::fixed_array("fM", "[2][3]", Element::String, &[2, 3]))
        .field(FieldDescriptor::object("fLead", "", "Particle"))
        .field(FieldDescriptor::object_pointer("fBest", "", "Particle"))
        .field(FieldDescriptor::stl("fTags", "", "set<string>").expect("set"))
        .field(FieldDescriptor::std_string("fLabel", ""))
        .field(FieldDescriptor::scalar("fQ", "[0,1,12]", ScalarKind::Float16))
        .build()
        .expect("Event");

    let mut w = WBuffer::new();
    desc.marshal(&mut w).expect("marshal");
    let bytes = w.into_bytes();
    let back = ClassDescriptor::unmarshal(&mut RBuffer::new(&bytes)).expect("unmarshal");
    assert_eq!(back, desc);
    assert!(back.to_string().contains("fTracks"));

    let back = registry.add(back).expect("register");
    let codec = compile(&registry, &back, StreamMode::ObjectWise).expect("compile");
    let rec = codec.new_record();
    let bytes = encode(&codec, &rec);
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);
}

// ===== Unsupported paths =====

#[test]
fn test_unsupported_features_are_labeled() {
    let registry = Registry::new();
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Stl", 1)
            .field(FieldDescriptor::stl("v", "", "vector<float>").expect("vector"))
            .build(),
    );
    match compile(&registry, &desc, StreamMode::MemberWise) {
        Err(e) => assert!(e.is_unsupported(), "Expected Unsupported, got {:?}", e),
        Ok(_) => panic!("member-wise STL compiled"),
    }
    // object-wise still works and the failure was not cached
    compile(&registry, &desc, StreamMode::ObjectWise).expect("object-wise");
    assert!(desc.compiled(StreamMode::MemberWise).is_none());
}

#[test]
fn test_member_wise_header_rejected_for_objects() {
    let registry = Registry::new();
    p2_and_particle(&registry);
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Cloud", 1)
            .field(FieldDescriptor::stl("pts", "", "vector<P2>").expect("vector"))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let mut w = WBuffer::new();
    let outer = w.write_header(1);
    let inner = w.write_header(crate::rbytes::STL_VERSION | crate::rbytes::STREAMED_MEMBER_WISE);
    w.write_i16(1);
    w.write_i32(0);
    w.set_header(&inner).expect("inner");
    w.set_header(&outer).expect("outer");
    let bytes = w.into_bytes();
    match decode(&codec, &bytes) {
        Err(e) => assert!(e.is_unsupported(), "Expected Unsupported, got {:?}", e),
        Ok(rec) => panic!("member-wise payload decoded as {}", rec),
    }
}

#[test]
fn test_null_and_polymorphic_pointers() {
    let registry = Registry::new();
    p2_and_particle(&registry);
    register(
        &registry,
        ClassDescriptorBuilder::new("P3", 1)
            .field(FieldDescriptor::scalar("px", "", ScalarKind::Double))
            .field(FieldDescriptor::scalar("py", "", ScalarKind::Double))
            .field(FieldDescriptor::scalar("pz", "", ScalarKind::Double))
            .build(),
    );
    let desc = register(
        &registry,
        ClassDescriptorBuilder::new("Holder", 1)
            .field(FieldDescriptor::object_pointer("a", "", "P2"))
            .field(FieldDescriptor::object_pointer("b", "", "P2"))
            .build(),
    );
    let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("compile");

    let p3 = Record::new("P3").with("px", 1.0).with("py", 2.0).with("pz", 3.0);
    let rec = Record::new("Holder")
        .with("a", Value::Pointer(Some(Box::new(Value::Record(p3)))))
        .with("b", Value::Pointer(None));
    let bytes = encode(&codec, &rec);
    assert_eq!(&bytes[bytes.len() - 4..], [0, 0, 0, 0], "null pointer tag");
    assert_eq!(decode(&codec, &bytes).expect("decode"), rec);
}

#[test]
fn test_descriptor_source_object() {
    fn latest_names(source: &dyn DescriptorSource) -> Vec<String> {
        source
            .all_descriptors()
            .iter()
            .filter_map(|d| source.lookup(d.name(), -1))
            .map(|d| format!("{} v{}", d.name(), d.version()))
            .collect()
    }

    let registry = Registry::new();
    let source: &dyn DescriptorSource = &registry;
    for version in [1, 2] {
        source
            .register(
                ClassDescriptorBuilder::new("Track", version)
                    .field(FieldDescriptor::scalar("fPt", "", ScalarKind::Float))
                    .build()
                    .expect("Track"),
            )
            .expect("register");
    }
    assert_eq!(latest_names(source), ["Track v2", "Track v2"]);
}
