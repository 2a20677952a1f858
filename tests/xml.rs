use imgquery::config::ServiceConfig;
use imgquery::matcher::{MatchResult, Threshold};
use imgquery::thumbnail::Thumbnail;
use imgquery::xml::{error_document, escape, MatchXmlRenderer, XmlRenderer};
use std::path::PathBuf;

fn thumb() -> Thumbnail {
    Thumbnail {
        path: PathBuf::from("/srv/thumbs/abc.jpg"),
        name: "abc.jpg".into(),
        original_name: "cat & dog.jpg".into(),
        width: 150,
        height: 100,
    }
}

fn renderer() -> MatchXmlRenderer {
    MatchXmlRenderer::new(vec![
        ServiceConfig { id: 0, name: "danbooru".into() },
        ServiceConfig { id: 3, name: "konachan".into() },
    ])
}

#[test]
fn escapes_markup() {
    assert_eq!(escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#039;&amp;&#039;&lt;/a&gt;");
    assert_eq!(escape("plain"), "plain");
}

#[test]
fn error_document_shape() {
    assert_eq!(
        error_document("Upload error code 4"),
        "<?xml version='1.0' encoding='UTF-8'?>\n<error message=\"Upload error code 4\" info=\"\"></error>"
    );
    assert!(error_document("a < b").contains("message=\"a &lt; b\""));
}

#[test]
fn renders_matches_best_first() {
    let matches = vec![
        MatchResult { service: 0, id: 0x10, score: 55.0, width: 640, height: 480 },
        MatchResult { service: 3, id: 0xabcdef, score: 92.346, width: 800, height: 600 },
    ];
    let threshold = Threshold { min_similarity: 80.0, best: Some(92.346), relevant: 1 };
    let xml = renderer().render(&matches, &thumb(), &threshold).unwrap();

    let expected = "<?xml version='1.0' encoding='UTF-8'?>\n\
        <matches preview=\"/thumbs/abc.jpg\" name=\"cat &amp; dog.jpg\" width=\"150\" height=\"100\" threshold=\"80.0\" relevant=\"1\">\n\
        <match service=\"konachan\" dbid=\"3\" id=\"00abcdef\" sim=\"92.35\" width=\"800\" height=\"600\" relevant=\"1\"/>\n\
        <match service=\"danbooru\" dbid=\"0\" id=\"00000010\" sim=\"55.00\" width=\"640\" height=\"480\" relevant=\"0\"/>\n\
        </matches>\n";
    assert_eq!(xml, expected);
}

#[test]
fn empty_result_set_still_renders() {
    let threshold = Threshold { min_similarity: 80.0, best: None, relevant: 0 };
    let xml = renderer().with_thumb_prefix("https://cdn.example/t/").render(&[], &thumb(), &threshold).unwrap();
    assert!(xml.contains("preview=\"https://cdn.example/t/abc.jpg\""));
    assert!(xml.ends_with("relevant=\"0\">\n</matches>\n"));
}

#[test]
fn unknown_service_is_an_error() {
    let matches = vec![MatchResult { service: 9, id: 1, score: 90.0, width: 1, height: 1 }];
    let threshold = Threshold { min_similarity: 80.0, best: Some(90.0), relevant: 1 };
    assert!(renderer().render(&matches, &thumb(), &threshold).is_err());
}
