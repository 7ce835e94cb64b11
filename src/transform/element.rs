//! Class-specific transformation of elements matched by a selector rule.
//!
//! Every matched element falls into exactly one [`ElementClass`], tested in
//! priority order: form field, media, visible text, opaque. Each class has a
//! masking and a replacement direction. Writes are skipped when the element
//! already holds the target state, and all state lives on the element itself
//! (a marker attribute, inline style, or an overlay child).

use crate::dom::{Document, NodeId};
use crate::error::Result;
use crate::rules::{Mode, mask_of};

/// Attribute flagging a form field whose value was masked.
pub const MASKED_MARKER: &str = "data-pii-masked";

/// Attribute flagging an element whose `position` was changed to anchor an
/// overlay.
pub const POSITIONED_MARKER: &str = "data-pii-positioned";

/// Class of the synthetic overlay child.
pub const OVERLAY_CLASS: &str = "__pii_mask_overlay__";

const OVERLAY_MARKUP: &str = concat!(
    r#"<div class="__pii_mask_overlay__" "#,
    r#"style="position: absolute; inset: 0; background: rgba(0,0,0,0.6); "#,
    r#"z-index: 99999; pointer-events: none"></div>"#,
);

const FORM_FIELD_TAGS: &[&str] = &["input", "textarea"];
const MEDIA_TAGS: &[&str] = &["img", "video", "canvas"];

/// Style declarations that obscure media while keeping its box.
const MEDIA_MASK_STYLE: &[(&str, &str)] = &[
    ("filter", "blur(18px)"),
    ("opacity", "0.15"),
    ("pointer-events", "none"),
];

/// The transformation class of a matched element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementClass {
    /// `input` or `textarea`.
    FormField,
    /// `img`, `video`, `canvas`, or anything painting a background image.
    Media,
    /// Anything else with non-whitespace rendered text.
    Text,
    /// Nothing directly editable: covered by an overlay.
    Opaque,
}

/// Decide which class `el` belongs to.
///
/// Returns `None` for non-elements and for overlay elements, which are never
/// transformed themselves.
pub fn classify(doc: &Document, el: NodeId) -> Option<ElementClass> {
    let tag = doc.tag(el)?;
    if doc.has_class(el, OVERLAY_CLASS) {
        return None;
    }

    let class = if FORM_FIELD_TAGS.contains(&tag) {
        ElementClass::FormField
    } else if MEDIA_TAGS.contains(&tag)
        || doc
            .computed_style(el, "background-image")
            .is_some_and(|bg| bg != "none")
    {
        ElementClass::Media
    } else if !doc.inner_text(el).trim().is_empty() {
        ElementClass::Text
    } else {
        ElementClass::Opaque
    };
    Some(class)
}

/// Apply the policy for `el`'s class in the given direction.
///
/// `replacement` is the matching rule's replacement string and is ignored
/// under [`Mode::Masking`]. Returns the class that was applied, or `None` if
/// the node was skipped.
pub fn transform_element(
    doc: &mut Document,
    el: NodeId,
    replacement: &str,
    mode: Mode,
) -> Result<Option<ElementClass>> {
    let Some(class) = classify(doc, el) else {
        return Ok(None);
    };

    match class {
        ElementClass::FormField => form_field(doc, el, replacement, mode)?,
        ElementClass::Media => media(doc, el, replacement, mode)?,
        ElementClass::Text => visible_text(doc, el, replacement, mode)?,
        ElementClass::Opaque => opaque(doc, el, mode)?,
    }
    Ok(Some(class))
}

/// Secret-class fields are never read or written.
fn is_secret_field(doc: &Document, el: NodeId) -> bool {
    doc.tag(el) == Some("input")
        && doc
            .attr(el, "type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("password"))
}

fn form_field(doc: &mut Document, el: NodeId, replacement: &str, mode: Mode) -> Result<()> {
    if is_secret_field(doc, el) {
        return Ok(());
    }

    let value = doc.form_value(el).unwrap_or_default();
    match mode {
        Mode::Masking => {
            if !value.is_empty() {
                set_attribute_if_changed(doc, el, MASKED_MARKER, "true")?;
                set_attribute_if_changed(doc, el, "value", &mask_of(&value))?;
            }
        }
        Mode::Replacement => {
            let flagged = doc.remove_attribute(el, MASKED_MARKER)?;
            if flagged || !value.is_empty() {
                set_attribute_if_changed(doc, el, "value", replacement)?;
            }
        }
    }

    // Label text mirrored inside the control (a textarea's content).
    let label = doc.inner_text(el);
    if !label.trim().is_empty() {
        let target = match mode {
            Mode::Masking => mask_of(&label),
            Mode::Replacement => replacement.to_string(),
        };
        set_inner_text_if_changed(doc, el, &label, &target)?;
    }
    Ok(())
}

fn media(doc: &mut Document, el: NodeId, replacement: &str, mode: Mode) -> Result<()> {
    let is_img = doc.tag(el) == Some("img");
    match mode {
        Mode::Masking => {
            for (property, value) in MEDIA_MASK_STYLE {
                doc.set_style_property(el, property, value)?;
            }
            if is_img {
                set_attribute_if_changed(doc, el, "alt", "")?;
            }
        }
        Mode::Replacement => {
            for (property, _) in MEDIA_MASK_STYLE {
                doc.remove_style_property(el, property)?;
            }
            if is_img {
                set_attribute_if_changed(doc, el, "alt", replacement)?;
            }
        }
    }
    Ok(())
}

fn visible_text(doc: &mut Document, el: NodeId, replacement: &str, mode: Mode) -> Result<()> {
    let text = doc.inner_text(el);
    let target = match mode {
        Mode::Masking => mask_of(&text),
        Mode::Replacement => replacement.to_string(),
    };
    set_inner_text_if_changed(doc, el, &text, &target)
}

fn opaque(doc: &mut Document, el: NodeId, mode: Mode) -> Result<()> {
    match mode {
        Mode::Masking => {
            if overlays(doc, el).is_empty() {
                doc.append_html(el, OVERLAY_MARKUP)?;
            }
            if doc.computed_style(el, "position").as_deref() == Some("static") {
                doc.set_style_property(el, "position", "relative")?;
                set_attribute_if_changed(doc, el, POSITIONED_MARKER, "true")?;
            }
        }
        Mode::Replacement => {
            for overlay in overlays(doc, el) {
                doc.remove(overlay)?;
            }
            if doc.remove_attribute(el, POSITIONED_MARKER)? {
                doc.remove_style_property(el, "position")?;
            }
        }
    }
    Ok(())
}

/// Overlay children of `el` (direct children only).
fn overlays(doc: &Document, el: NodeId) -> Vec<NodeId> {
    doc.children(el)
        .into_iter()
        .filter(|child| doc.has_class(*child, OVERLAY_CLASS))
        .collect()
}

fn set_attribute_if_changed(doc: &mut Document, el: NodeId, name: &str, value: &str) -> Result<()> {
    if doc.attr(el, name) != Some(value) {
        doc.set_attribute(el, name, value)?;
    }
    Ok(())
}

fn set_inner_text_if_changed(
    doc: &mut Document,
    el: NodeId,
    current: &str,
    target: &str,
) -> Result<()> {
    if current != target {
        doc.set_inner_text(el, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Document {
        Document::parse(
            &format!("<html><body>{body}</body></html>"),
            "https://example.com/",
        )
        .unwrap()
    }

    #[test]
    fn classification_follows_priority_order() {
        let d = doc(concat!(
            r#"<textarea>notes</textarea><img src="a.png">"#,
            r#"<div id="bg" style="background-image: url(a.png)">text</div>"#,
            r#"<p>hello</p><div id="empty">   </div>"#,
        ));
        assert_eq!(classify(&d, d.query("textarea").unwrap()), Some(ElementClass::FormField));
        assert_eq!(classify(&d, d.query("img").unwrap()), Some(ElementClass::Media));
        assert_eq!(classify(&d, d.query("#bg").unwrap()), Some(ElementClass::Media));
        assert_eq!(classify(&d, d.query("p").unwrap()), Some(ElementClass::Text));
        assert_eq!(classify(&d, d.query("#empty").unwrap()), Some(ElementClass::Opaque));
    }

    #[test]
    fn masks_form_value_and_flags_it() {
        let mut d = doc(r#"<input class="email" value="a@b.com">"#);
        let input = d.query("input").unwrap();
        transform_element(&mut d, input, "", Mode::Masking).unwrap();
        assert_eq!(d.form_value(input).as_deref(), Some("*******"));
        assert_eq!(d.attr(input, MASKED_MARKER), Some("true"));
    }

    #[test]
    fn empty_form_value_is_left_alone() {
        let mut d = doc(r#"<input value="">"#);
        let input = d.query("input").unwrap();
        transform_element(&mut d, input, "", Mode::Masking).unwrap();
        assert_eq!(d.attr(input, MASKED_MARKER), None);
    }

    #[test]
    fn replacement_clears_marker_and_sets_value() {
        let mut d = doc(r#"<input value="*******" data-pii-masked="true">"#);
        let input = d.query("input").unwrap();
        transform_element(&mut d, input, "[redacted]", Mode::Replacement).unwrap();
        assert_eq!(d.form_value(input).as_deref(), Some("[redacted]"));
        assert_eq!(d.attr(input, MASKED_MARKER), None);
    }

    #[test]
    fn password_fields_are_never_touched() {
        let mut d = doc(r#"<input type="Password" value="hunter2">"#);
        let input = d.query("input").unwrap();
        let before = d.html();
        for mode in [Mode::Masking, Mode::Replacement] {
            transform_element(&mut d, input, "x", mode).unwrap();
            assert_eq!(d.html(), before);
        }
    }

    #[test]
    fn textarea_value_and_label_are_masked() {
        let mut d = doc("<textarea>my notes</textarea>");
        let area = d.query("textarea").unwrap();
        transform_element(&mut d, area, "", Mode::Masking).unwrap();
        assert_eq!(d.form_value(area).as_deref(), Some("********"));
        assert_eq!(d.inner_text(area), "********");
    }

    #[test]
    fn media_masking_round_trip() {
        let mut d = doc(r#"<img src="face.jpg" alt="Jane Doe" width="120" height="80">"#);
        let img = d.query("img").unwrap();
        let rect = d.bounding_rect(img);

        transform_element(&mut d, img, "", Mode::Masking).unwrap();
        assert_eq!(d.style_property(img, "filter").as_deref(), Some("blur(18px)"));
        assert_eq!(d.style_property(img, "opacity").as_deref(), Some("0.15"));
        assert_eq!(d.style_property(img, "pointer-events").as_deref(), Some("none"));
        assert_eq!(d.attr(img, "alt"), Some(""));
        assert_eq!(d.bounding_rect(img), rect);

        transform_element(&mut d, img, "[photo]", Mode::Replacement).unwrap();
        assert_eq!(d.attr(img, "style"), None);
        assert_eq!(d.attr(img, "alt"), Some("[photo]"));
    }

    #[test]
    fn text_container_is_replaced_wholesale() {
        let mut d = doc("<p>Jane <b>Doe</b></p>");
        let p = d.query("p").unwrap();
        transform_element(&mut d, p, "", Mode::Masking).unwrap();
        assert_eq!(d.inner_text(p), "********");
        assert!(d.query("b").is_none());

        transform_element(&mut d, p, "[name]", Mode::Replacement).unwrap();
        assert_eq!(d.inner_text(p), "[name]");
    }

    #[test]
    fn overlay_is_injected_once() {
        let mut d = doc(r#"<div id="map"></div>"#);
        let map = d.query("#map").unwrap();
        transform_element(&mut d, map, "", Mode::Masking).unwrap();
        transform_element(&mut d, map, "", Mode::Masking).unwrap();

        assert_eq!(overlays(&d, map).len(), 1);
        assert_eq!(d.style_property(map, "position").as_deref(), Some("relative"));
    }

    #[test]
    fn positioned_elements_keep_their_position() {
        let mut d = doc(r#"<div id="map" style="position: absolute"></div>"#);
        let map = d.query("#map").unwrap();
        transform_element(&mut d, map, "", Mode::Masking).unwrap();
        assert_eq!(d.style_property(map, "position").as_deref(), Some("absolute"));
        assert_eq!(d.attr(map, POSITIONED_MARKER), None);
    }

    #[test]
    fn replacement_removes_overlay_and_reverts_position() {
        let mut d = doc(r#"<div id="map"></div>"#);
        let map = d.query("#map").unwrap();
        transform_element(&mut d, map, "", Mode::Masking).unwrap();
        transform_element(&mut d, map, "", Mode::Replacement).unwrap();

        assert!(overlays(&d, map).is_empty());
        assert_eq!(d.attr(map, "style"), None);
        assert_eq!(d.attr(map, POSITIONED_MARKER), None);
    }

    #[test]
    fn replacement_without_overlay_is_a_no_op() {
        let mut d = doc(r#"<div id="map" style="position: static"></div>"#);
        let map = d.query("#map").unwrap();
        let before = d.html();
        transform_element(&mut d, map, "", Mode::Replacement).unwrap();
        assert_eq!(d.html(), before);
    }

    #[test]
    fn overlays_are_skipped() {
        let mut d = doc(r#"<div id="map"></div>"#);
        let map = d.query("#map").unwrap();
        transform_element(&mut d, map, "", Mode::Masking).unwrap();
        let overlay = overlays(&d, map)[0];
        assert_eq!(transform_element(&mut d, overlay, "", Mode::Masking).unwrap(), None);
        assert!(d.children(overlay).is_empty());
    }
}
