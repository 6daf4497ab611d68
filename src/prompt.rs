//! Prompt builder.
//!
//! Maps one candidate record plus its table's template to the text prompt
//! sent to the image provider. Pure and infallible: absent fields are
//! simply omitted, never an error.

use crate::config::{PromptTemplate, TableDescriptor};
use crate::store::{CandidateRecord, FieldValue};

/// Appended to every prompt regardless of template.
const CLOSING_SENTENCE: &str = "High quality, professional, bright lighting, elegant atmosphere.";

/// Known content-policy triggers and their de-sensitized replacements.
/// Replacement order matters: later entries see the output of earlier ones.
const SANITIZE_RULES: &[(&str, &str)] = &[
    ("SEXY", "Sophisticated"),
    ("sexy", "sophisticated"),
    ("SEXY_ELEGANT", "Elegant and Sophisticated"),
    ("Sexy Elegant", "Elegant and Sophisticated"),
];

/// How a recognized field name is turned into a sentence fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRender {
    /// Free-text fields expected to carry Korean text the provider cannot
    /// usefully render; emitted as nothing.
    Suppressed,
    /// "Label: value." with optional underscore-to-space title-casing.
    Label {
        label: &'static str,
        title_case: bool,
    },
    /// Like `Label`, but only emitted when the value is pure ASCII.
    AsciiOnly { label: &'static str },
    /// Numeric capacity or boolean availability sentence.
    Parking,
}

fn render_rule(field: &str) -> FieldRender {
    match field {
        "venue_type" => FieldRender::Label {
            label: "Venue type",
            title_case: true,
        },
        "type" => FieldRender::Label {
            label: "Style",
            title_case: true,
        },
        "mood" => FieldRender::Label {
            label: "Mood",
            title_case: true,
        },
        "neck_line" => FieldRender::Label {
            label: "Neckline",
            title_case: true,
        },
        "fabric" => FieldRender::Label {
            label: "Fabric",
            title_case: false,
        },
        "color" => FieldRender::AsciiOnly { label: "Color" },
        "shape" => FieldRender::AsciiOnly { label: "Silhouette" },
        "parking" => FieldRender::Parking,
        // name, shop_name, description, features, specialty and anything
        // unrecognized.
        _ => FieldRender::Suppressed,
    }
}

fn opening_sentence(template: PromptTemplate) -> &'static str {
    match template {
        PromptTemplate::WeddingDress => {
            "A professional product photograph of a beautiful wedding dress on a display."
        }
        PromptTemplate::WeddingDressShop => {
            "A professional photograph of a wedding dress shop interior."
        }
        PromptTemplate::WeddingHall => "A professional photograph of a wedding venue.",
        PromptTemplate::MakeupShop => {
            "A professional photograph of a wedding makeup salon interior."
        }
    }
}

/// Replace known content-policy triggers via ordered exact substring
/// replacement.
pub fn sanitize_value(value: &str) -> String {
    let mut sanitized = value.to_string();
    for (from, to) in SANITIZE_RULES {
        sanitized = sanitized.replace(from, to);
    }
    sanitized
}

/// Underscore-to-space plus capitalization at every word boundary, where
/// any non-alphabetic character starts a new word ("a_line" -> "A Line",
/// "a-line" -> "A-Line").
fn title_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut at_word_start = true;
    for ch in value.replace('_', " ").chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                result.extend(ch.to_uppercase());
            } else {
                result.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            result.push(ch);
            at_word_start = true;
        }
    }
    result
}

fn render_field(field: &str, value: &FieldValue) -> Option<String> {
    match render_rule(field) {
        FieldRender::Suppressed => None,
        FieldRender::Label { label, title_case: cased } => {
            let FieldValue::Text(text) = value else {
                return None;
            };
            if text.is_empty() {
                return None;
            }
            let sanitized = sanitize_value(text);
            let rendered = if cased {
                title_case(&sanitized)
            } else {
                sanitized
            };
            Some(format!("{label}: {rendered}."))
        }
        FieldRender::AsciiOnly { label } => {
            let FieldValue::Text(text) = value else {
                return None;
            };
            if text.is_empty() {
                return None;
            }
            let sanitized = sanitize_value(text);
            if !sanitized.is_ascii() {
                return None;
            }
            Some(format!("{label}: {sanitized}."))
        }
        FieldRender::Parking => render_parking(value),
    }
}

fn render_parking(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Integer(count) if *count > 0 => {
            Some(format!("Parking available for {count} cars."))
        }
        FieldValue::Real(count) if *count > 0.0 => {
            Some(format!("Parking available for {} cars.", *count as i64))
        }
        FieldValue::Text(text) => {
            let lowered = text.to_lowercase();
            if matches!(lowered.as_str(), "true" | "yes" | "1") {
                Some("With parking available.".to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Build the full prompt for one record: template opening sentence, one
/// fragment per rendered field in declared order, fixed closing sentence,
/// all joined with single spaces.
pub fn build_prompt(descriptor: &TableDescriptor, record: &CandidateRecord) -> String {
    let mut parts = vec![opening_sentence(descriptor.template).to_string()];

    for field in descriptor.prompt_fields {
        if let Some(value) = record.field(field) {
            if let Some(fragment) = render_field(field, value) {
                parts.push(fragment);
            }
        }
    }

    parts.push(CLOSING_SENTENCE.to_string());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::descriptor_for;
    use std::collections::BTreeMap;

    fn record(id: i64, fields: &[(&str, FieldValue)]) -> CandidateRecord {
        let mut map = BTreeMap::new();
        for (name, value) in fields {
            map.insert(name.to_string(), value.clone());
        }
        CandidateRecord { id, fields: map }
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    #[test]
    fn dress_prompt_renders_fields_in_order_with_boilerplate() {
        let descriptor = descriptor_for("tb_dress").unwrap();
        let record = record(
            7,
            &[
                ("name", text("드레스하우스")),
                ("type", text("a_line")),
                ("color", text("Ivory")),
                ("mood", text("romantic")),
            ],
        );

        let prompt = build_prompt(descriptor, &record);

        assert!(prompt.starts_with(
            "A professional product photograph of a beautiful wedding dress on a display."
        ));
        assert!(prompt.ends_with(
            "High quality, professional, bright lighting, elegant atmosphere."
        ));
        assert!(prompt.contains("Style: A Line."));
        assert!(prompt.contains("Color: Ivory."));
        assert!(prompt.contains("Mood: Romantic."));
        // Identifying fields never leak into the prompt.
        assert!(!prompt.contains('7'));
        assert!(!prompt.contains("드레스하우스"));
        // Field order follows the descriptor's declared order.
        let style = prompt.find("Style:").unwrap();
        let color = prompt.find("Color:").unwrap();
        let mood = prompt.find("Mood:").unwrap();
        assert!(style < color && color < mood);
    }

    #[test]
    fn build_prompt_is_deterministic() {
        let descriptor = descriptor_for("tb_dress").unwrap();
        let record = record(
            1,
            &[("type", text("mermaid")), ("fabric", text("silk chiffon"))],
        );

        assert_eq!(
            build_prompt(descriptor, &record),
            build_prompt(descriptor, &record)
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_value("SEXY_ELEGANT mood, very sexy");
        let twice = sanitize_value(&once);
        assert_eq!(once, twice);
        assert!(!once.contains("SEXY"));
        assert!(!once.contains("sexy"));
    }

    #[test]
    fn ascii_only_fields_drop_non_ascii_values() {
        let descriptor = descriptor_for("tb_dress").unwrap();
        let korean = record(1, &[("color", text("아이보리"))]);
        let english = record(2, &[("color", text("Ivory"))]);

        assert!(!build_prompt(descriptor, &korean).contains("아이보리"));
        assert!(!build_prompt(descriptor, &korean).contains("Color:"));
        assert!(build_prompt(descriptor, &english).contains("Color: Ivory."));
    }

    #[test]
    fn free_text_fields_are_suppressed() {
        let descriptor = descriptor_for("tb_dress_shop").unwrap();
        let record = record(
            4,
            &[
                ("shop_name", text("Atelier Blanc")),
                ("description", text("Famous for lace work")),
                ("specialty", text("custom fittings")),
            ],
        );

        let prompt = build_prompt(descriptor, &record);
        assert_eq!(
            prompt,
            "A professional photograph of a wedding dress shop interior. \
             High quality, professional, bright lighting, elegant atmosphere."
        );
    }

    #[test]
    fn parking_capacity_and_availability_variants() {
        let descriptor = descriptor_for("tb_wedding_hall").unwrap();

        let numeric = record(1, &[("parking", FieldValue::Integer(40))]);
        assert!(build_prompt(descriptor, &numeric).contains("Parking available for 40 cars."));

        let real = record(2, &[("parking", FieldValue::Real(12.0))]);
        assert!(build_prompt(descriptor, &real).contains("Parking available for 12 cars."));

        let truthy = record(3, &[("parking", text("Yes"))]);
        assert!(build_prompt(descriptor, &truthy).contains("With parking available."));

        let falsy = record(4, &[("parking", text("no"))]);
        assert!(!build_prompt(descriptor, &falsy).contains("arking"));

        let zero = record(5, &[("parking", FieldValue::Integer(0))]);
        assert!(!build_prompt(descriptor, &zero).contains("arking"));
    }

    #[test]
    fn venue_template_and_title_casing() {
        let descriptor = descriptor_for("tb_wedding_hall").unwrap();
        let record = record(9, &[("venue_type", text("outdoor_garden"))]);

        let prompt = build_prompt(descriptor, &record);
        assert!(prompt.starts_with("A professional photograph of a wedding venue."));
        assert!(prompt.contains("Venue type: Outdoor Garden."));
    }

    #[test]
    fn title_casing_restarts_after_any_non_letter() {
        let descriptor = descriptor_for("tb_dress").unwrap();

        let hyphenated = record(1, &[("type", text("a-line"))]);
        assert!(build_prompt(descriptor, &hyphenated).contains("Style: A-Line."));

        let underscored = record(2, &[("neck_line", text("off_the_shoulder"))]);
        assert!(
            build_prompt(descriptor, &underscored).contains("Neckline: Off The Shoulder.")
        );
    }

    #[test]
    fn fabric_is_rendered_without_title_casing() {
        let descriptor = descriptor_for("tb_dress").unwrap();
        let record = record(2, &[("fabric", text("silk organza"))]);

        assert!(build_prompt(descriptor, &record).contains("Fabric: silk organza."));
    }

    #[test]
    fn empty_record_is_boilerplate_only() {
        let descriptor = descriptor_for("tb_makeup_shop").unwrap();
        let record = record(11, &[]);

        assert_eq!(
            build_prompt(descriptor, &record),
            "A professional photograph of a wedding makeup salon interior. \
             High quality, professional, bright lighting, elegant atmosphere."
        );
    }
}
