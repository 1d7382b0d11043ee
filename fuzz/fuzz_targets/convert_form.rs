#![no_main]

//! Multipart text fields as a browser might send them.

use arbitrary::Arbitrary;
use imgconv::server::form::ConvertForm;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FormSeed {
    file: Option<Vec<u8>>,
    filename: Option<String>,
    content_type: Option<String>,
    format: Option<String>,
    quality: Option<String>,
    width: Option<String>,
    height: Option<String>,
    target_file_size: Option<String>,
}

fuzz_target!(|seed: FormSeed| {
    let form = ConvertForm {
        file: seed.file,
        filename: seed.filename,
        content_type: seed.content_type,
        format: seed.format,
        quality: seed.quality,
        width: seed.width,
        height: seed.height,
        target_file_size: seed.target_file_size,
    };
    if let Ok(request) = form.into_request() {
        assert!((1..=100).contains(&request.quality));
        let _ = request.strategy();
        let _ = request.input_kind();
    }
});
