use imgquery::fetch::error::kb;
use imgquery::fetch::progress::{progress_text, render_script, summary_text};
use imgquery::fetch::{ProgressEvent, ProgressReporter, ScriptReporter, TransferError};
use std::time::Duration;

#[test]
fn size_lines() {
    let early = ProgressEvent::SizeKnownEarly { size_kb: 10, status: "0 of 10 KB".into() };
    assert_eq!(render_script(&early), " (10 KB)... <span id='urlstat'>0 of 10 KB</span></div>\n");

    let unknown = ProgressEvent::SizeUnknown { status: "connecting".into() };
    assert_eq!(
        render_script(&unknown),
        " (<span id='urlsize'>?</span> KB)... <span id='urlstat'>connecting</span></div>\n"
    );

    let late = ProgressEvent::SizeKnownLate { size_kb: 42 };
    assert_eq!(render_script(&late), "<script type='text/javascript'>url_size('42');</script>\n");
}

#[test]
fn update_and_final_scripts() {
    let update = ProgressEvent::PeriodicUpdate { progress: "12 of 40 KB".into(), extra: "JPEG 800x600".into() };
    assert_eq!(
        render_script(&update),
        "<script type='text/javascript'>progress('12 of 40 KB','JPEG 800x600');</script>\n"
    );

    let done = ProgressEvent::Final { summary: "failed".into() };
    assert_eq!(render_script(&done), "<script type='text/javascript'>progress('failed','');</script>\n");
}

#[test]
fn script_arguments_are_escaped() {
    let ev = ProgressEvent::PeriodicUpdate { progress: "it's".into(), extra: "</script>".into() };
    assert_eq!(
        render_script(&ev),
        "<script type='text/javascript'>progress('it\\'s','\\x3c/script>');</script>\n"
    );
}

#[test]
fn progress_and_summary_text() {
    assert_eq!(progress_text(12 * 1024, Some(40 * 1024)), "12 of 40 KB");
    assert_eq!(progress_text(1500, None), "1 KB");
    assert_eq!(progress_text(0, Some(0)), "0 of 0 KB");

    assert_eq!(summary_text(false, Duration::from_secs(3), 2), "failed");
    assert_eq!(summary_text(true, Duration::from_millis(1240), 0), "OK, 1.2 seconds.");
    assert_eq!(summary_text(true, Duration::from_millis(500), 1), "OK, 0.5 seconds. [Followed 1 redirect]");
    assert_eq!(summary_text(true, Duration::from_secs(2), 3), "OK, 2.0 seconds. [Followed 3 redirects]");
}

#[test]
fn script_reporter_writes_in_order() {
    let mut reporter = ScriptReporter::new(Vec::new());
    reporter.report(&ProgressEvent::SizeUnknown { status: "0 KB".into() });
    reporter.report(&ProgressEvent::Final { summary: "failed".into() });
    let out = String::from_utf8(reporter.into_inner()).unwrap();
    assert_eq!(
        out,
        " (<span id='urlsize'>?</span> KB)... <span id='urlstat'>0 KB</span></div>\n\
         <script type='text/javascript'>progress('failed','');</script>\n"
    );
}

#[test]
fn user_messages() {
    assert_eq!(TransferError::NoMemory.describe("a.jpg"), "Out of memory");
    assert_eq!(TransferError::NoTempFile.describe("a.jpg"), "Can't make temp file.");
    assert_eq!(TransferError::TooManyRedirects(5).describe("a.jpg"), "Transfer failed... too many redirections.");
    assert_eq!(
        TransferError::RequestFailed("HTTP 404 Not Found".into()).describe("a.jpg"),
        "Request failed: HTTP 404 Not Found"
    );
    assert_eq!(
        TransferError::NetworkError("connection reset".into()).describe("a.jpg"),
        "Transfer failed: connection reset"
    );
    assert_eq!(
        TransferError::UnsupportedType("text/html".into()).describe("a.jpg"),
        "Failed: a.jpg has unsupported type text/html"
    );
    assert_eq!(TransferError::NoData.describe("a.jpg"), "No data received.");
    assert_eq!(TransferError::TooLarge(20 * 1024).describe("a.jpg"), "a.jpg is too large: 20 KB");
    assert_eq!(
        TransferError::AbortedTooLarge(17_000).describe("a.jpg"),
        "Aborted a.jpg after receiving 17 KB: too large."
    );
    assert_eq!(
        TransferError::DimensionTooLarge(5000, 4000).describe("a.jpg"),
        "Image a.jpg too large (5000 x 4000)"
    );
}

#[test]
fn rejections_and_hints() {
    assert!(TransferError::TooLarge(1).is_rejection());
    assert!(TransferError::DimensionTooLarge(1, 1).is_rejection());
    assert!(!TransferError::NoData.is_rejection());
    assert!(!TransferError::Cancelled.is_rejection());

    assert_eq!(TransferError::UnsupportedType("x".into()).hint(), Some("Check the URL"));
    assert_eq!(TransferError::DimensionTooLarge(1, 1).hint(), Some("Try downloading a thumbnail version."));
    assert_eq!(TransferError::NoData.hint(), None);
    assert_eq!(TransferError::TooManyRedirects(5).code(), "TooManyRedirects");
}

#[test]
fn kilobytes_round_without_overflow() {
    assert_eq!(kb(0), 0);
    assert_eq!(kb(511), 0);
    assert_eq!(kb(512), 1);
    assert_eq!(kb(1535), 1);
    assert_eq!(kb(1536), 2);
    assert_eq!(kb(u64::MAX), 18_014_398_509_481_984);
    assert_eq!(progress_text(0, Some(u64::MAX - 3)), "0 of 18014398509481984 KB");
}
