//! Parsing CSS text into the owned object model with lightningcss.

use crate::transform::brace::extract_block;
use crate::style::owned_css::{
    DeclarationBlock, GroupRule, Keyframe, KeyframesRule, OwnedDeclaration, OwnedRule,
    OwnedStylesheet, StyleRule,
};
use lightningcss::declaration::DeclarationBlock as LcssDeclarationBlock;
use lightningcss::rules::{style::StyleRule as LcssStyleRule, CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::traits::ToCss;
use log::{debug, trace};

/// Parse `css_text` into an owned stylesheet. Invalid rules are dropped the
/// way a browser drops them; text that cannot be parsed at all yields an
/// empty sheet.
pub fn parse_stylesheet(css_text: &str) -> OwnedStylesheet {
    let options = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    match StyleSheet::parse(css_text, options) {
        Ok(sheet) => OwnedStylesheet {
            rules: convert_rules(&sheet.rules),
        },
        Err(err) => {
            debug!("stylesheet did not parse: {}", err);
            OwnedStylesheet::default()
        }
    }
}

fn convert_rules(rules: &CssRuleList<'_>) -> Vec<OwnedRule> {
    let mut out = Vec::new();
    for rule in &rules.0 {
        match rule {
            CssRule::Style(style_rule) => out.push(OwnedRule::Style(convert_style_rule(style_rule))),
            CssRule::Media(media_rule) => {
                let query = printed(&media_rule.query);
                out.push(group(format!("@media {}", query), &media_rule.rules));
            }
            CssRule::Supports(supports_rule) => {
                let condition = printed(&supports_rule.condition);
                out.push(group(format!("@supports {}", condition), &supports_rule.rules));
            }
            CssRule::LayerBlock(layer_rule) => {
                let prelude = match &layer_rule.name {
                    Some(name) => format!("@layer {}", printed(name)),
                    None => "@layer".to_string(),
                };
                out.push(group(prelude, &layer_rule.rules));
            }
            CssRule::Keyframes(keyframes_rule) => {
                let frames = keyframes_rule
                    .keyframes
                    .iter()
                    .map(|frame| Keyframe {
                        selector: frame
                            .selectors
                            .iter()
                            .map(printed)
                            .collect::<Vec<_>>()
                            .join(", "),
                        declarations: convert_declarations(&frame.declarations),
                    })
                    .collect();
                out.push(OwnedRule::Keyframes(KeyframesRule {
                    name: printed(&keyframes_rule.name),
                    frames,
                }));
            }
            CssRule::Container(_) => match rule.to_css_string(PrinterOptions::default()) {
                Ok(text) => {
                    let Some(open) = text.find('{') else {
                        out.push(OwnedRule::Other(text));
                        continue;
                    };
                    let block = extract_block(&text, open);
                    out.push(OwnedRule::Group(GroupRule {
                        prelude: text[..open].trim().to_string(),
                        rules: parse_stylesheet(block.block_content).rules,
                    }));
                }
                Err(err) => trace!("dropping unprintable container rule: {}", err),
            },
            CssRule::Ignored => {}
            other => match other.to_css_string(PrinterOptions::default()) {
                Ok(text) => out.push(OwnedRule::Other(text)),
                Err(err) => trace!("dropping unprintable rule: {}", err),
            },
        }
    }
    out
}

fn group(prelude: String, rules: &CssRuleList<'_>) -> OwnedRule {
    OwnedRule::Group(GroupRule {
        prelude,
        rules: convert_rules(rules),
    })
}

fn printed<T: ToCss>(value: &T) -> String {
    value.to_css_string(PrinterOptions::default()).unwrap_or_default()
}

/// Copy a single StyleRule's selectors + declarations into a StyleRule.
fn convert_style_rule(style_rule: &LcssStyleRule<'_>) -> StyleRule {
    let selectors = style_rule
        .selectors
        .0
        .iter()
        .filter_map(|selector| selector.to_css_string(PrinterOptions::default()).ok())
        .collect();
    if !style_rule.rules.0.is_empty() {
        trace!("nested rules inside a style rule are not indexed");
    }
    StyleRule {
        selectors,
        declarations: convert_declarations(&style_rule.declarations),
    }
}

/// Normal and `!important` declarations in one block, tagged by importance.
fn convert_declarations(block: &LcssDeclarationBlock<'_>) -> DeclarationBlock {
    let normal = block.declarations.iter().map(|p| (p, false));
    let important = block.important_declarations.iter().map(|p| (p, true));
    let declarations = normal
        .chain(important)
        .filter_map(|(property, important)| {
            let value = property.value_to_css_string(PrinterOptions::default()).ok()?;
            Some(OwnedDeclaration {
                property: property.property_id().name().to_string(),
                value,
                important,
            })
        })
        .collect();
    DeclarationBlock::new(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_style_and_group_rules() {
        let sheet = parse_stylesheet(
            ".a, #b > p { color: red; margin-top: 0 !important; --brand: 0.7 0.1 200 }\n\
             @media print { .c { top: 0 } }\n\
             @keyframes spin { from { top: 0 } to { top: 10px } }",
        );
        assert_eq!(sheet.rules.len(), 3);
        let OwnedRule::Style(rule) = &sheet.rules[0] else {
            panic!("expected a style rule");
        };
        assert_eq!(rule.selectors, vec![".a".to_string(), "#b > p".to_string()]);
        assert_eq!(rule.declarations.property_value("color"), Some("red"));
        assert!(rule.declarations.is_important("margin-top"));
        assert!(rule.declarations.custom_properties().contains_key("--brand"));

        let OwnedRule::Group(media) = &sheet.rules[1] else {
            panic!("expected a group rule");
        };
        assert!(media.prelude.starts_with("@media print"));
        assert_eq!(sheet.style_rules().len(), 2);

        let OwnedRule::Keyframes(keyframes) = &sheet.rules[2] else {
            panic!("expected keyframes");
        };
        assert_eq!(keyframes.name, "spin");
        assert_eq!(keyframes.frames.len(), 2);
    }

    #[test]
    fn test_layers_and_oklch_survive() {
        let sheet = parse_stylesheet("@layer base { .x { color: oklch(0.7 0.15 200) } }");
        let OwnedRule::Group(layer) = &sheet.rules[0] else {
            panic!("expected a layer block");
        };
        assert_eq!(layer.prelude, "@layer base");
        let rules = sheet.style_rules();
        let value = rules[0].declarations.property_value("color").unwrap_or_default();
        assert!(value.to_ascii_lowercase().contains("oklch("));
    }

    #[test]
    fn test_recovers_from_bad_rules() {
        let sheet = parse_stylesheet(".ok { color: red } .bad { color: } } .also { top: 0 }");
        assert!(sheet.style_rules().iter().any(|r| r.selector_text() == ".ok"));
    }
}
