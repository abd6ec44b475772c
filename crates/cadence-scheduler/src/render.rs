//! Discord message normalisation for delivery mediums.

use cadence_core::traits::TemplateRenderer;
use cadence_core::types::{
    Embed, EmbedAuthor, EmbedFooter, EmbedMedia, EmbedField, EmbedTemplate, MessageTemplate,
    RenderedMessage,
};

/// Turns free-text connection templates into Discord-shaped payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscordRenderer;

impl TemplateRenderer for DiscordRenderer {
    fn render(&self, template: &MessageTemplate) -> RenderedMessage {
        RenderedMessage {
            content: non_empty(template.content.as_deref()),
            embeds: template.embeds.iter().filter_map(render_embed).collect(),
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parse "#RRGGBB", "0xRRGGBB" or a decimal string into a 24-bit colour.
pub fn parse_color(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let value = if let Some(hex) = raw.strip_prefix('#') {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        raw.parse::<u32>().ok()?
    };
    (value <= 0xFF_FF_FF).then_some(value)
}

fn render_embed(template: &EmbedTemplate) -> Option<Embed> {
    let footer = non_empty(template.footer_text.as_deref()).map(|text| EmbedFooter {
        text,
        icon_url: non_empty(template.footer_icon_url.as_deref()),
    });
    let author = non_empty(template.author_name.as_deref()).map(|name| EmbedAuthor {
        name,
        url: non_empty(template.author_url.as_deref()),
        icon_url: non_empty(template.author_icon_url.as_deref()),
    });
    let fields = template
        .fields
        .iter()
        .filter_map(|f| {
            let name = non_empty(Some(&f.name))?;
            let value = non_empty(Some(&f.value))?;
            Some(EmbedField { name, value, inline: f.inline })
        })
        .collect();

    let embed = Embed {
        title: non_empty(template.title.as_deref()),
        description: non_empty(template.description.as_deref()),
        url: non_empty(template.url.as_deref()),
        color: template.color.as_deref().and_then(parse_color),
        footer,
        image: non_empty(template.image_url.as_deref()).map(|url| EmbedMedia { url }),
        thumbnail: non_empty(template.thumbnail_url.as_deref()).map(|url| EmbedMedia { url }),
        author,
        fields,
        timestamp: non_empty(template.timestamp.as_deref()),
    };
    has_visible_content(&embed).then_some(embed)
}

// Colour, url and timestamp alone render nothing.
fn has_visible_content(embed: &Embed) -> bool {
    embed.title.is_some()
        || embed.description.is_some()
        || embed.footer.is_some()
        || embed.image.is_some()
        || embed.thumbnail.is_some()
        || embed.author.is_some()
        || !embed.fields.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::EmbedFieldTemplate;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#FF0000"), Some(0xFF0000));
        assert_eq!(parse_color("0x00aaff"), Some(0x00AAFF));
        assert_eq!(parse_color(" 255 "), Some(255));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("#1000000"), None);
        assert_eq!(parse_color("-1"), None);
    }

    #[test]
    fn test_content_is_trimmed() {
        let rendered = DiscordRenderer.render(&MessageTemplate {
            content: Some("  {{title}}\n".into()),
            embeds: vec![],
        });
        assert_eq!(rendered.content.as_deref(), Some("{{title}}"));

        let blank = DiscordRenderer.render(&MessageTemplate {
            content: Some("   ".into()),
            embeds: vec![],
        });
        assert!(blank.content.is_none());
    }

    #[test]
    fn test_embed_normalisation() {
        let template = MessageTemplate {
            content: None,
            embeds: vec![
                EmbedTemplate {
                    title: Some("{{title}}".into()),
                    color: Some("#00FF00".into()),
                    footer_text: Some("".into()),
                    fields: vec![
                        EmbedFieldTemplate { name: "Author".into(), value: "{{author}}".into(), inline: true },
                        EmbedFieldTemplate { name: "".into(), value: "orphan".into(), inline: false },
                    ],
                    ..Default::default()
                },
                // Only a colour: dropped.
                EmbedTemplate {
                    color: Some("0xFFFFFF".into()),
                    ..Default::default()
                },
            ],
        };
        let rendered = DiscordRenderer.render(&template);
        assert_eq!(rendered.embeds.len(), 1);
        let embed = &rendered.embeds[0];
        assert_eq!(embed.color, Some(0x00FF00));
        assert!(embed.footer.is_none());
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(embed.fields[0].name, "Author");
    }
}
