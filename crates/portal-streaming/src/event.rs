//! Structured markup events produced by markup units.

use std::fmt::Write;

/// One structured markup event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupEvent {
    /// Opening tag with attributes in document order.
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    /// Closing tag.
    EndElement { name: String },
    /// Text content, escaped on serialization.
    Text(String),
    /// Comment.
    Comment(String),
    /// Pre-serialized markup written verbatim.
    Raw(String),
}

impl MarkupEvent {
    /// Opening tag without attributes.
    pub fn start(name: impl Into<String>) -> Self {
        Self::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Opening tag with attributes.
    pub fn start_with(name: impl Into<String>, attributes: &[(&str, &str)]) -> Self {
        Self::StartElement {
            name: name.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Closing tag.
    pub fn end(name: impl Into<String>) -> Self {
        Self::EndElement { name: name.into() }
    }

    /// Text node.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Append the serialized form of this event.
    pub fn write_to(&self, out: &mut String) {
        match self {
            Self::StartElement { name, attributes } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attributes {
                    let _ = write!(out, " {}=\"{}\"", key, escape_attribute(value));
                }
                out.push('>');
            }
            Self::EndElement { name } => {
                let _ = write!(out, "</{}>", name);
            }
            Self::Text(text) => out.push_str(&escape_text(text)),
            Self::Comment(text) => {
                let _ = write!(out, "<!--{}-->", text);
            }
            Self::Raw(markup) => out.push_str(markup),
        }
    }

    /// Serialized form of this event.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    /// Length of the serialized form, used for size accounting.
    pub fn serialized_len(&self) -> usize {
        self.to_markup().len()
    }
}

/// Escape text content.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value.
pub fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
