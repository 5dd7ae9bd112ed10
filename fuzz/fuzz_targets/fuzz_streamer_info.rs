// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use rootdict::{ClassDescriptor, RBuffer, WBuffer};

fuzz_target!(|data: &[u8]| {
    // Descriptors that parse must marshal back
    if let Ok(desc) = ClassDescriptor::unmarshal(&mut RBuffer::new(data)) {
        let mut w = WBuffer::new();
        let _ = desc.marshal(&mut w);
    }
});
