use imgquery::fetch::sniff::{sniff_dimensions, sniff_kind, Dimensions, Kind};
use imgquery::fetch::{ImageKind, IncrementalValidator, TransferError, Verdict};

fn jpeg(w: u32, h: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(w, h);
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg).unwrap();
    out
}

/// Signature and IHDR only; enough for the header parser.
fn png_header(w: u32, h: u32) -> Vec<u8> {
    let mut out = b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR".to_vec();
    out.extend_from_slice(&w.to_be_bytes());
    out.extend_from_slice(&h.to_be_bytes());
    out.extend_from_slice(&[8, 2, 0, 0, 0, 0, 0, 0, 0]);
    out
}

fn gif_header(w: u16, h: u16) -> Vec<u8> {
    let mut out = b"GIF89a".to_vec();
    out.extend_from_slice(&w.to_le_bytes());
    out.extend_from_slice(&h.to_le_bytes());
    out.extend_from_slice(&[0xf7, 0, 0]);
    out
}

fn webp_vp8x(w: u32, h: u32) -> Vec<u8> {
    let mut out = b"RIFF\x24\0\0\0WEBPVP8X\x0a\0\0\0\0\0\0\0".to_vec();
    out.extend_from_slice(&(w - 1).to_le_bytes()[..3]);
    out.extend_from_slice(&(h - 1).to_le_bytes()[..3]);
    out
}

fn webp_vp8l(w: u32, h: u32) -> Vec<u8> {
    let mut out = b"RIFF\x1a\0\0\0WEBPVP8L\x0d\0\0\0\x2f".to_vec();
    let bits = (w - 1) | ((h - 1) << 14);
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(&[0; 8]);
    out
}

#[test]
fn sniffs_supported_kinds() {
    assert_eq!(sniff_kind(&jpeg(8, 8), false), Kind::Supported(ImageKind::Jpeg));
    assert_eq!(sniff_kind(&png_header(1, 1), false), Kind::Supported(ImageKind::Png));
    assert_eq!(sniff_kind(&gif_header(1, 1), false), Kind::Supported(ImageKind::Gif));
    assert_eq!(sniff_kind(&webp_vp8x(1, 1), false), Kind::Supported(ImageKind::WebP));
}

#[test]
fn short_prefix_waits_until_stream_ends() {
    assert_eq!(sniff_kind(b"\x89PNG", false), Kind::NeedMore);
    assert_eq!(sniff_kind(b"abc", true), Kind::Unsupported(None));
}

#[test]
fn recognised_but_unaccepted_kind_reports_its_mime() {
    let mut bmp = b"BM".to_vec();
    bmp.resize(64, 0);
    assert_eq!(sniff_kind(&bmp, false), Kind::Unsupported(Some("image/bmp")));
    assert_eq!(sniff_kind(b"<!DOCTYPE html><html>", false), Kind::Unsupported(None));
}

#[test]
fn header_dimensions() {
    assert_eq!(sniff_dimensions(ImageKind::Jpeg, &jpeg(64, 48)), Dimensions::Found(64, 48));
    assert_eq!(sniff_dimensions(ImageKind::Png, &png_header(640, 480)), Dimensions::Found(640, 480));
    assert_eq!(sniff_dimensions(ImageKind::Gif, &gif_header(320, 200)), Dimensions::Found(320, 200));
    assert_eq!(sniff_dimensions(ImageKind::WebP, &webp_vp8x(1920, 1080)), Dimensions::Found(1920, 1080));
    assert_eq!(sniff_dimensions(ImageKind::WebP, &webp_vp8l(300, 200)), Dimensions::Found(300, 200));
}

#[test]
fn truncated_headers_need_more() {
    let full = jpeg(64, 48);
    assert_eq!(sniff_dimensions(ImageKind::Jpeg, &full[..20]), Dimensions::NeedMore);
    assert_eq!(sniff_dimensions(ImageKind::Png, &png_header(1, 1)[..20]), Dimensions::NeedMore);
    assert_eq!(sniff_dimensions(ImageKind::WebP, &webp_vp8x(2, 2)[..26]), Dimensions::NeedMore);
}

#[test]
fn zero_sized_canvas_is_malformed() {
    assert_eq!(sniff_dimensions(ImageKind::Png, &png_header(0, 10)), Dimensions::Malformed);
}

#[test]
fn validator_latches_type_and_dimensions() {
    let data = png_header(800, 600);
    let mut v = IncrementalValidator::new(3000);

    assert_eq!(v.check(&data[..6], false), Verdict::Continue);
    assert_eq!(v.kind(), None);
    assert!(v.wants_data());

    assert_eq!(v.check(&data[..16], false), Verdict::Continue);
    assert_eq!(v.kind(), Some(ImageKind::Png));
    assert_eq!(v.dimensions(), None);

    assert_eq!(v.check(&data, false), Verdict::Continue);
    assert_eq!(v.dimensions(), Some((800, 600)));
    assert!(!v.wants_data());

    // Later data never revises the latched answer.
    assert_eq!(v.check(&png_header(9000, 9000), true), Verdict::Continue);
    let info = v.info().unwrap();
    assert_eq!((info.kind, info.width, info.height), (ImageKind::Png, 800, 600));
}

#[test]
fn oversized_dimensions_abort() {
    let mut v = IncrementalValidator::new(3000);
    let expected = Verdict::Abort(TransferError::DimensionTooLarge(5000, 5000));
    assert_eq!(v.check(&png_header(5000, 5000), false), expected);
    assert_eq!(v.dimensions(), Some((5000, 5000)));
    assert!(v.info().is_none());
    assert!(!v.wants_data());
}

#[test]
fn abort_is_sticky() {
    let mut v = IncrementalValidator::new(3000);
    let first = v.check(b"<html><body>not an image</body></html>", false);
    assert_eq!(first, Verdict::Abort(TransferError::UnsupportedType("application/octet-stream".into())));
    assert_eq!(v.check(&png_header(10, 10), true), first);
}

#[test]
fn unrecognised_content_reports_declared_type() {
    let mut v = IncrementalValidator::new(3000).with_declared_type(Some("text/html".into()));
    assert_eq!(
        v.check(b"<html><body>not an image</body></html>", false),
        Verdict::Abort(TransferError::UnsupportedType("text/html".into()))
    );
}

#[test]
fn incomplete_header_at_end_of_stream_is_unsupported() {
    let full = jpeg(64, 48);
    let mut v = IncrementalValidator::new(3000);
    assert_eq!(v.check(&full[..20], false), Verdict::Continue);
    assert_eq!(
        v.check(&full[..20], true),
        Verdict::Abort(TransferError::UnsupportedType("image/jpeg".into()))
    );
}

#[test]
fn short_body_is_judged_at_end_of_stream() {
    let mut v = IncrementalValidator::new(3000);
    assert_eq!(v.check(b"GIF8", false), Verdict::Continue);
    assert!(matches!(v.check(b"GIF8", true), Verdict::Abort(TransferError::UnsupportedType(_))));
}
