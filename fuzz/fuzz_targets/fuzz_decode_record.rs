// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use rootdict::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
use rootdict::meta::ScalarKind;
use rootdict::{CodecConfig, RBuffer, Registry, StreamMode};
use std::sync::{Arc, OnceLock};

fn codec() -> &'static (Registry, Arc<rootdict::Codec>) {
    static CODEC: OnceLock<(Registry, Arc<rootdict::Codec>)> = OnceLock::new();
    CODEC.get_or_init(|| {
        let config = CodecConfig {
            max_collection_len: 1 << 16,
            ..CodecConfig::default()
        };
        let registry = Registry::with_config(config);
        let hit = ClassDescriptorBuilder::new("Hit", 1)
            .field(FieldDescriptor::scalar("fE", "[0,10,12]", ScalarKind::Double32))
            .build()
            .expect("Hit");
        registry.add(hit).expect("register Hit");
        let event = ClassDescriptorBuilder::new("Event", 2)
            .field(FieldDescriptor::scalar("fN", "", ScalarKind::Int))
            .field(FieldDescriptor::counted_array("fE", "[fN]", ScalarKind::Float, "fN"))
            .field(FieldDescriptor::tstring("fName", ""))
            .field(FieldDescriptor::stl("fHits", "", "vector<Hit>").expect("vector"))
            .field(FieldDescriptor::stl("fTags", "", "map<int,string>").expect("map"))
            .field(FieldDescriptor::object_pointer("fLead", "", "Hit"))
            .build()
            .expect("Event");
        registry.add(event).expect("register Event");
        let codec = registry
            .codec("Event", -1, StreamMode::ObjectWise)
            .expect("Event codec");
        (registry, codec)
    })
}

fuzz_target!(|data: &[u8]| {
    // Corrupt input must surface as an error, never a panic
    let (_, codec) = codec();
    let _ = codec.read(&mut RBuffer::new(data));
});
