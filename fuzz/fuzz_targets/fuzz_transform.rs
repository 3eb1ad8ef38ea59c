//! Fuzz target: write transforms
//!
//! Reversing arbitrary bytes must fail cleanly for every codec, and
//! anything applied must reverse to the original.
//!
//! cargo fuzz run fuzz_transform

#![no_main]

use libfuzzer_sys::fuzz_target;
use rpcbridge::rpc::transform::{TransformId, apply, reverse};

const CODECS: [TransformId; 3] = [TransformId::Zlib, TransformId::Snappy, TransformId::Zstd];

fuzz_target!(|data: &[u8]| {
    for codec in CODECS {
        let _ = reverse(data.to_vec(), &[codec]);
    }
    if data.is_empty() {
        return;
    }

    let out = apply(data.to_vec(), &CODECS, 0).expect("codecs are supported");
    let back = reverse(out, &CODECS).expect("own output must decode");
    assert_eq!(back, data);
});
