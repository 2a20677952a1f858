use crate::config::ServiceConfig;
use crate::matcher::{MatchResult, Threshold};
use crate::thumbnail::Thumbnail;
use std::fmt::Write as _;

pub const XML_DECLARATION: &str = "<?xml version='1.0' encoding='UTF-8'?>\n";

/// Escape text for use in element content and quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// The complete document returned for any failed request.
pub fn error_document(message: &str) -> String {
    format!("{}<error message=\"{}\" info=\"\"></error>", XML_DECLARATION, escape(message))
}

pub trait XmlRenderer: Send + Sync {
    fn render(&self, matches: &[MatchResult], thumb: &Thumbnail, threshold: &Threshold) -> Result<String, String>;
}

/// Renders results as `<matches>` with one `<match>` per hit, best first.
pub struct MatchXmlRenderer {
    services: Vec<ServiceConfig>,
    thumb_prefix: String,
}

impl MatchXmlRenderer {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        Self { services, thumb_prefix: "/thumbs/".into() }
    }

    pub fn with_thumb_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thumb_prefix = prefix.into();
        self
    }
}

impl XmlRenderer for MatchXmlRenderer {
    fn render(&self, matches: &[MatchResult], thumb: &Thumbnail, threshold: &Threshold) -> Result<String, String> {
        let mut sorted: Vec<&MatchResult> = matches.iter().collect();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut out = String::from(XML_DECLARATION);
        writeln!(
            out,
            "<matches preview=\"{}{}\" name=\"{}\" width=\"{}\" height=\"{}\" threshold=\"{:.1}\" relevant=\"{}\">",
            escape(&self.thumb_prefix),
            escape(&thumb.name),
            escape(&thumb.original_name),
            thumb.width,
            thumb.height,
            threshold.min_similarity,
            threshold.relevant,
        )
        .map_err(|e| e.to_string())?;

        for m in sorted {
            let service = self
                .services
                .iter()
                .find(|s| s.id == m.service)
                .ok_or_else(|| format!("Unknown service id {} in match results", m.service))?;
            writeln!(
                out,
                "<match service=\"{}\" dbid=\"{}\" id=\"{:08x}\" sim=\"{:.2}\" width=\"{}\" height=\"{}\" relevant=\"{}\"/>",
                escape(&service.name),
                m.service,
                m.id,
                m.score,
                m.width,
                m.height,
                u8::from(m.score >= threshold.min_similarity),
            )
            .map_err(|e| e.to_string())?;
        }
        out.push_str("</matches>\n");
        Ok(out)
    }
}
