//! Style-rule helpers shared by the template routes, the Word export and the
//! maintenance binary.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::PgConnection;
use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::{Tag, Template};
use crate::schema::{documents, tags, template_styles, templates};

pub const SCOPE_GLOBAL: &str = "global";
pub const SCOPE_INLINE: &str = "inline";

fn camel_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid camel-case regex"))
}

fn style_id_attribute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-style-id="([^"]+)""#).expect("valid style-id regex"))
}

/// `fontSize` → `font-size`. Keys already in kebab-case pass through.
pub fn to_kebab_case(key: &str) -> String {
    camel_boundary()
        .replace_all(key, "$1-$2")
        .to_lowercase()
}

pub fn normalize_style_keys(styles: &Map<String, Value>) -> Map<String, Value> {
    styles
        .iter()
        .map(|(key, value)| (to_kebab_case(key), value.clone()))
        .collect()
}

pub fn validate_scope(scope: Option<&str>) -> Option<&'static str> {
    match scope.unwrap_or(SCOPE_GLOBAL) {
        SCOPE_GLOBAL => Some(SCOPE_GLOBAL),
        SCOPE_INLINE => Some(SCOPE_INLINE),
        _ => None,
    }
}

pub fn style_id_from_selector(selector: &str) -> Option<&str> {
    style_id_attribute()
        .captures(selector)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Reads `font-size` as points. Accepts `14`, `"14"`, `"14pt"` and `"NNpx"`.
pub fn font_size_pt(styles: &Value) -> Option<f64> {
    let raw = styles.get("font-size").or_else(|| styles.get("fontSize"))?;
    let size = match raw {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => {
            let text = text.trim();
            if let Some(px) = text.strip_suffix("px") {
                px.trim().parse::<f64>().ok()? * 0.75
            } else {
                text.trim_end_matches("pt").trim().parse::<f64>().ok()?
            }
        }
        _ => return None,
    };
    (size > 0.0).then_some(size)
}

/// Style id → point size for the inline rules of a document's template.
pub fn font_sizes_for_document(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> QueryResult<HashMap<String, f64>> {
    let rows: Vec<(String, Value)> = template_styles::table
        .inner_join(
            documents::table
                .on(documents::template_id.eq(template_styles::template_id.nullable())),
        )
        .filter(documents::id.eq(document_id))
        .filter(template_styles::scope.eq(SCOPE_INLINE))
        .select((template_styles::selector, template_styles::styles))
        .load(conn)?;

    Ok(font_size_map(
        rows.iter().map(|(selector, styles)| (selector.as_str(), styles)),
    ))
}

pub fn font_size_map<'a>(rules: impl Iterator<Item = (&'a str, &'a Value)>) -> HashMap<String, f64> {
    let mut map = HashMap::new();
    for (selector, styles) in rules {
        let Some(style_id) = style_id_from_selector(selector) else {
            continue;
        };
        match font_size_pt(styles) {
            Some(pt) => {
                map.insert(style_id.to_string(), pt);
            }
            None => tracing::debug!(style_id, "inline style has no usable font-size"),
        }
    }
    map
}

/// Finds the style id wrapping the first `{{name}}` occurrence in `content`.
pub fn style_id_for_tag(content: &str, tag_name: &str) -> Option<Uuid> {
    let pattern = format!(
        r#"data-style-id="([a-f0-9\-]{{36}})">[^<]*\{{\{{{}\}}\}}"#,
        regex::escape(tag_name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Uuid::parse_str(m.as_str()).ok())
}

/// Links each tag to the style id found next to its placeholder in any
/// template. Returns the number of tags updated.
pub fn assign_style_ids(conn: &mut PgConnection) -> Result<usize> {
    let all_tags: Vec<Tag> = tags::table.load(conn).context("failed to load tags")?;
    let all_templates: Vec<Template> = templates::table
        .load(conn)
        .context("failed to load templates")?;

    let mut updated = 0;
    for tag in &all_tags {
        let placeholder = format!("{{{{{}}}}}", tag.name);
        let found = all_templates
            .iter()
            .filter(|template| template.content.contains(&placeholder))
            .find_map(|template| style_id_for_tag(&template.content, &tag.name));

        let Some(style_id) = found else {
            continue;
        };
        if tag.style_id == Some(style_id) {
            continue;
        }

        diesel::update(tags::table.find(tag.id))
            .set(tags::style_id.eq(style_id))
            .execute(conn)
            .with_context(|| format!("failed to update tag {}", tag.name))?;
        tracing::info!(tag = %tag.name, %style_id, "linked tag to style");
        updated += 1;
    }
    Ok(updated)
}
