#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    for link in kdex::backlink::parse_backlinks(data) {
        // Rendering a parsed link must parse back to the same link
        let rendered = link.to_string();
        let reparsed = kdex::backlink::Backlink::parse(&rendered).expect("rendered link must parse");
        assert_eq!(reparsed, link);
    }
    let _ = kdex::backlink::Backlink::parse(data);
});
