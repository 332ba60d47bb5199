#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing never fails; it must not panic either
    let doc = kdex::index::entry::parse_document(data);
    for section in &doc.sections {
        let _ = kdex::utils::tokenize(&section.body);
    }
});
