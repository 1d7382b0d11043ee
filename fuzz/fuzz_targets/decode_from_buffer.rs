#![no_main]

use imgconv::engine::{decode_heic, decode_image};
use imgconv::ops::InputKind;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    match InputKind::classify(None, "upload", data) {
        InputKind::Heic => {
            let _ = decode_heic(data);
        }
        InputKind::Raster => {
            let _ = decode_image(data);
        }
    }
});
