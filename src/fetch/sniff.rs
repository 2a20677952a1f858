//! Image type and dimension detection from a possibly incomplete prefix.
//!
//! Nothing here decodes pixel data. Each parser only walks the container
//! header far enough to find the canvas size, and reports `NeedMore` when
//! the prefix stops short of it.

/// Shortest prefix that can tell every supported format apart.
pub const MIN_SNIFF_LEN: usize = 12;

/// Formats accepted for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
        }
    }

    fn from_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::Gif => Some(ImageKind::Gif),
            image::ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageKind::Jpeg => write!(f, "JPEG"),
            ImageKind::Png => write!(f, "PNG"),
            ImageKind::Gif => write!(f, "GIF"),
            ImageKind::WebP => write!(f, "WebP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    NeedMore,
    Supported(ImageKind),
    /// Recognised but not accepted (`Some(mime)`), or not recognised at all.
    Unsupported(Option<&'static str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensions {
    NeedMore,
    Found(u32, u32),
    Malformed,
}

/// Identify the format from its magic prefix. Short prefixes are only
/// judged once the stream has ended.
pub fn sniff_kind(buf: &[u8], finished: bool) -> Kind {
    if buf.len() < MIN_SNIFF_LEN && !finished {
        return Kind::NeedMore;
    }
    match image::guess_format(buf) {
        Ok(format) => match ImageKind::from_format(format) {
            Some(kind) => Kind::Supported(kind),
            None => Kind::Unsupported(Some(format.to_mime_type())),
        },
        Err(_) => Kind::Unsupported(None),
    }
}

pub fn sniff_dimensions(kind: ImageKind, buf: &[u8]) -> Dimensions {
    let dims = match kind {
        ImageKind::Jpeg => jpeg_dimensions(buf),
        ImageKind::Png => png_dimensions(buf),
        ImageKind::Gif => gif_dimensions(buf),
        ImageKind::WebP => webp_dimensions(buf),
    };
    match dims {
        Dimensions::Found(0, _) | Dimensions::Found(_, 0) => Dimensions::Malformed,
        other => other,
    }
}

fn be16(b: &[u8], at: usize) -> u32 {
    u32::from(u16::from_be_bytes([b[at], b[at + 1]]))
}

fn be32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le16(b: &[u8], at: usize) -> u32 {
    u32::from(u16::from_le_bytes([b[at], b[at + 1]]))
}

fn le24(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], 0])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Walk marker segments after SOI until a start-of-frame marker.
fn jpeg_dimensions(buf: &[u8]) -> Dimensions {
    let mut pos = 2;
    loop {
        if buf.len() < pos + 2 {
            return Dimensions::NeedMore;
        }
        if buf[pos] != 0xff {
            return Dimensions::Malformed;
        }
        let marker = buf[pos + 1];
        match marker {
            // fill byte before a marker
            0xff => pos += 1,
            // standalone markers carry no length
            0x01 | 0xd0..=0xd8 => pos += 2,
            0xd9 => return Dimensions::Malformed,
            0xc0..=0xc3 | 0xc5..=0xc7 | 0xc9..=0xcb | 0xcd..=0xcf | 0xf7 => {
                if buf.len() < pos + 9 {
                    return Dimensions::NeedMore;
                }
                let height = be16(buf, pos + 5);
                let width = be16(buf, pos + 7);
                return Dimensions::Found(width, height);
            }
            m if m < 0xc0 => return Dimensions::Malformed,
            _ => {
                if buf.len() < pos + 4 {
                    return Dimensions::NeedMore;
                }
                let len = be16(buf, pos + 2) as usize;
                if len < 2 {
                    return Dimensions::Malformed;
                }
                pos += 2 + len;
            }
        }
    }
}

fn png_dimensions(buf: &[u8]) -> Dimensions {
    if buf.len() < 24 {
        return Dimensions::NeedMore;
    }
    if &buf[8..16] != b"\0\0\0\x0dIHDR" {
        return Dimensions::Malformed;
    }
    Dimensions::Found(be32(buf, 16), be32(buf, 20))
}

fn gif_dimensions(buf: &[u8]) -> Dimensions {
    if buf.len() < 10 {
        return Dimensions::NeedMore;
    }
    Dimensions::Found(le16(buf, 6), le16(buf, 8))
}

fn webp_dimensions(buf: &[u8]) -> Dimensions {
    if buf.len() < 16 {
        return Dimensions::NeedMore;
    }
    match &buf[12..16] {
        b"VP8 " => {
            if buf.len() < 30 {
                return Dimensions::NeedMore;
            }
            if buf[23..26] != [0x9d, 0x01, 0x2a] {
                return Dimensions::Malformed;
            }
            Dimensions::Found(le16(buf, 26) & 0x3fff, le16(buf, 28) & 0x3fff)
        }
        b"VP8L" => {
            if buf.len() < 25 {
                return Dimensions::NeedMore;
            }
            if buf[20] != 0x2f {
                return Dimensions::Malformed;
            }
            let bits = le32(buf, 21);
            Dimensions::Found((bits & 0x3fff) + 1, ((bits >> 14) & 0x3fff) + 1)
        }
        b"VP8X" => {
            if buf.len() < 30 {
                return Dimensions::NeedMore;
            }
            Dimensions::Found(le24(buf, 24) + 1, le24(buf, 27) + 1)
        }
        _ => Dimensions::Malformed,
    }
}
