use std::fmt;

/// Styled text: a run of segments, each with an optional RGB color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RichText {
    segments: Vec<TextSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextSegment {
    pub content: String,
    pub color: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    #[error("invalid color tag at byte {offset}: expected <#rrggbb>")]
    InvalidColor { offset: usize },
    #[error("color {0:#x} does not fit in 24 bits")]
    ColorOutOfRange(u32),
}

impl RichText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uncolored text.
    pub fn plain(content: impl Into<String>) -> Self {
        let mut text = Self::new();
        text.push(content, None);
        text
    }

    /// Parse `<#rrggbb>` color markup; `</>` returns to uncolored text.
    /// Anything else, including a lone `<`, is literal content.
    pub fn parse_markup(markup: &str) -> Result<Self, MarkupError> {
        let mut text = Self::new();
        let mut color = None;
        let mut run = String::new();
        let mut rest = markup;
        let mut offset = 0;

        while let Some(ch) = rest.chars().next() {
            if let Some(after) = rest.strip_prefix("</>") {
                text.push(std::mem::take(&mut run), color);
                color = None;
                rest = after;
                offset += 3;
                continue;
            }
            if let Some(after) = rest.strip_prefix("<#") {
                let rgb = after
                    .get(..6)
                    .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .filter(|_| after.as_bytes().get(6) == Some(&b'>'))
                    .ok_or(MarkupError::InvalidColor { offset })?;
                text.push(std::mem::take(&mut run), color);
                color = Some(rgb);
                rest = after.get(7..).unwrap_or_default();
                offset += 9;
                continue;
            }
            run.push(ch);
            rest = rest.get(ch.len_utf8()..).unwrap_or_default();
            offset += ch.len_utf8();
        }
        text.push(run, color);
        Ok(text)
    }

    /// Append a segment. Empty content is dropped and a segment with the
    /// same color as the previous one is merged into it.
    pub fn push(&mut self, content: impl Into<String>, color: Option<u32>) {
        let content = content.into();
        if content.is_empty() {
            return;
        }
        if let Some(last) = self.segments.last_mut() {
            if last.color == color {
                last.content.push_str(&content);
                return;
            }
        }
        self.segments.push(TextSegment { content, color });
    }

    pub fn append(&mut self, other: &RichText) {
        for seg in &other.segments {
            self.push(seg.content.clone(), seg.color);
        }
    }

    /// Same content, every segment recolored.
    pub fn with_color(&self, rgb: u32) -> Result<RichText, MarkupError> {
        if rgb > 0x00FF_FFFF {
            return Err(MarkupError::ColorOutOfRange(rgb));
        }
        let mut out = RichText::new();
        for seg in &self.segments {
            out.push(seg.content.clone(), Some(rgb));
        }
        Ok(out)
    }

    /// Plain content with styling stripped.
    pub fn contents(&self) -> String {
        self.segments.iter().map(|s| s.content.as_str()).collect()
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.segments
    }

    pub fn from_segments(segments: impl IntoIterator<Item = TextSegment>) -> Self {
        let mut text = Self::new();
        for seg in segments {
            text.push(seg.content, seg.color);
        }
        text
    }

    /// Inverse of [`RichText::parse_markup`].
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg.color {
                Some(rgb) => {
                    out.push_str(&format!("<#{rgb:06x}>"));
                    out.push_str(&seg.content);
                    out.push_str("</>");
                }
                None => out.push_str(&seg.content),
            }
        }
        out
    }
}

impl fmt::Display for RichText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_markup())
    }
}

/// Parse a `#rrggbb` or `rrggbb` hex color.
pub fn parse_hex_color(s: &str) -> Option<u32> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn markup_splits_colored_runs() {
        let text = RichText::parse_markup("hi <#ff0000>red</> there").unwrap();
        assert_eq!(
            text.segments(),
            &[
                TextSegment { content: "hi ".into(), color: None },
                TextSegment { content: "red".into(), color: Some(0xff0000) },
                TextSegment { content: " there".into(), color: None },
            ]
        );
        assert_eq!(text.contents(), "hi red there");
    }

    #[test]
    fn lone_angle_bracket_is_literal() {
        let text = RichText::parse_markup("a < b").unwrap();
        assert_eq!(text, RichText::plain("a < b"));
    }

    #[test]
    fn bad_color_tag_is_rejected() {
        let err = RichText::parse_markup("x<#zz0000>y").unwrap_err();
        assert_eq!(err, MarkupError::InvalidColor { offset: 1 });
        assert!(RichText::parse_markup("<#ff00").is_err());
    }

    #[test]
    fn markup_roundtrips() {
        let src = "<#00ff00>go</> now";
        let text = RichText::parse_markup(src).unwrap();
        assert_eq!(text.to_markup(), src);
    }

    #[test]
    fn with_color_recolors_everything() {
        let text = RichText::parse_markup("a<#ff0000>b</>").unwrap();
        let blue = text.with_color(0x0000ff).unwrap();
        assert_eq!(blue.segments().len(), 1);
        assert_eq!(blue.contents(), "ab");
        assert!(text.with_color(0x0100_0000).is_err());
    }

    #[test]
    fn hex_color_parsing() {
        assert_eq!(parse_hex_color("#ff8800"), Some(0xff8800));
        assert_eq!(parse_hex_color("ff8800"), Some(0xff8800));
        assert_eq!(parse_hex_color("#f80"), None);
    }
}
