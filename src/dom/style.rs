//! Inline style declarations and element geometry.

use std::fmt;

/// Ordered `property: value` declarations from a `style` attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct InlineStyle {
    declarations: Vec<(String, String)>,
}

impl InlineStyle {
    pub(crate) fn parse(style: &str) -> Self {
        let declarations = split_declarations(style)
            .into_iter()
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim().to_ascii_lowercase();
                let value = value.trim();
                if prop.is_empty() || value.is_empty() {
                    return None;
                }
                Some((prop, value.to_string()))
            })
            .collect();
        Self { declarations }
    }

    pub(crate) fn get(&self, property: &str) -> Option<&str> {
        self.declarations
            .iter()
            .rev()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v.as_str())
    }

    /// Set `property`, keeping its position if it is already declared.
    pub(crate) fn set(&mut self, property: &str, value: &str) {
        match self.declarations.iter().position(|(p, _)| p == property) {
            Some(i) => {
                self.declarations[i].1 = value.to_string();
                let mut seen = false;
                self.declarations.retain(|(p, _)| {
                    if p != property {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self
                .declarations
                .push((property.to_string(), value.to_string())),
        }
    }

    pub(crate) fn remove(&mut self, property: &str) {
        self.declarations.retain(|(p, _)| p != property);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// Split a declaration block at top-level `;`, leaving semicolons inside
/// parentheses and quoted strings alone.
fn split_declarations(style: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote = None;
    let mut escaped = false;

    for (i, c) in style.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            (c, Some(q)) if c == q => quote = None,
            (_, Some(_)) => {}
            ('"' | '\'', None) => quote = Some(c),
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            (';', None) if depth == 0 => {
                parts.push(&style[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&style[start..]);
    parts
}

impl fmt::Display for InlineStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (prop, value)) in self.declarations.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{prop}: {value};")?;
        }
        Ok(())
    }
}

/// User-agent value of a property when no inline declaration overrides it.
pub(crate) fn default_value(property: &str) -> Option<&'static str> {
    match property {
        "position" => Some("static"),
        "background-image" => Some("none"),
        "display" => Some("inline"),
        "filter" => Some("none"),
        "opacity" => Some("1"),
        "pointer-events" => Some("auto"),
        _ => None,
    }
}

/// Parse a CSS length in pixels, or a bare number as found in the
/// `width`/`height` attributes.
pub(crate) fn parse_px(value: &str) -> Option<f64> {
    let value = value.trim();
    value.strip_suffix("px").unwrap_or(value).trim().parse().ok()
}

/// Border box of an element, in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Returns `true` if the box covers no area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}
