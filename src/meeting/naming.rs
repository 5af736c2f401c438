//! Meeting folder names rendered from a small template language.
//!
//! Supported tags: `{{Year}}` `{{Month}}` `{{Day}}` `{{Hour}}` `{{Minute}}` `{{Second}}`
//! `{{Name}}` (a leading `.` is accepted, as in `{{.Year}}`), and conditional blocks
//! `{{if Name}}...{{end}}`, which render their body only when the field is non-empty.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Name,
}

impl Field {
    fn parse(raw: &str) -> SessionResult<Self> {
        let name = raw.trim().trim_start_matches('.');
        match name {
            "Year" => Ok(Self::Year),
            "Month" => Ok(Self::Month),
            "Day" => Ok(Self::Day),
            "Hour" => Ok(Self::Hour),
            "Minute" => Ok(Self::Minute),
            "Second" => Ok(Self::Second),
            "Name" => Ok(Self::Name),
            other => Err(SessionError::template(format!(
                "unknown field '{other}' (expected Year, Month, Day, Hour, Minute, Second or Name)"
            ))),
        }
    }

    fn value(&self, at: &NaiveDateTime, name: &str) -> String {
        let pattern = match self {
            Self::Year => "%Y",
            Self::Month => "%m",
            Self::Day => "%d",
            Self::Hour => "%H",
            Self::Minute => "%M",
            Self::Second => "%S",
            Self::Name => return name.to_string(),
        };
        at.format(pattern).to_string()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Field(Field),
    If(Field, Vec<Node>),
}

/// A parsed folder template. Parsing validates the whole template up front so a
/// broken config is reported before any device is touched.
#[derive(Debug, Clone)]
pub struct FolderTemplate {
    nodes: Vec<Node>,
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("static regex"))
}

impl FolderTemplate {
    pub fn parse(source: &str) -> SessionResult<Self> {
        let mut root = Vec::new();
        // open `if` blocks, innermost last
        let mut open: Vec<(Field, Vec<Node>)> = Vec::new();
        let mut cursor = 0;

        for captures in tag_regex().captures_iter(source) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            push_text(current(&mut root, &mut open), &source[cursor..whole.start()])?;
            cursor = whole.end();

            let tag = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            if tag == "end" {
                let (cond, body) = open
                    .pop()
                    .ok_or_else(|| SessionError::template("{{end}} without a matching {{if}}"))?;
                current(&mut root, &mut open).push(Node::If(cond, body));
            } else if let Some(cond) = tag.strip_prefix("if ") {
                open.push((Field::parse(cond)?, Vec::new()));
            } else if tag.is_empty() {
                return Err(SessionError::template("empty tag {{}}"));
            } else {
                let field = Field::parse(tag)?;
                current(&mut root, &mut open).push(Node::Field(field));
            }
        }
        push_text(current(&mut root, &mut open), &source[cursor..])?;

        if !open.is_empty() {
            return Err(SessionError::template("{{if}} block is missing its {{end}}"));
        }
        Ok(Self { nodes: root })
    }

    /// Render a folder name for a meeting started at `at`.
    pub fn render(&self, at: &NaiveDateTime, name: Option<&str>) -> SessionResult<String> {
        let name = name.map(str::trim).unwrap_or_default();
        let mut out = String::new();
        render_nodes(&self.nodes, at, name, &mut out);

        let rendered: String = out
            .trim()
            .chars()
            .map(|c| if c == '/' || c == '\\' { '-' } else { c })
            .collect();

        if rendered.is_empty() || rendered == "." || rendered == ".." {
            return Err(SessionError::template(format!(
                "template renders to an unusable folder name '{rendered}'"
            )));
        }
        Ok(rendered)
    }
}

/// Parse and render in one step.
pub fn render_folder_name(
    template: &str,
    at: &NaiveDateTime,
    name: Option<&str>,
) -> SessionResult<String> {
    FolderTemplate::parse(template)?.render(at, name)
}

fn current<'a>(root: &'a mut Vec<Node>, open: &'a mut [(Field, Vec<Node>)]) -> &'a mut Vec<Node> {
    match open.last_mut() {
        Some((_, body)) => body,
        None => root,
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) -> SessionResult<()> {
    if text.is_empty() {
        return Ok(());
    }
    if text.contains("{{") || text.contains("}}") {
        return Err(SessionError::template(format!("unbalanced braces near '{text}'")));
    }
    nodes.push(Node::Text(text.to_string()));
    Ok(())
}

fn render_nodes(nodes: &[Node], at: &NaiveDateTime, name: &str, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(field) => out.push_str(&field.value(at, name)),
            Node::If(field, body) => {
                if !field.value(at, name).is_empty() {
                    render_nodes(body, at, name, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FOLDER_TEMPLATE;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 7, 2)
            .unwrap()
    }

    #[test]
    fn test_default_template_with_name() {
        let name = render_folder_name(DEFAULT_FOLDER_TEMPLATE, &sample_time(), Some("standup"));
        assert_eq!(name.unwrap(), "2024-03-05_09-07-02_standup");
    }

    #[test]
    fn test_default_template_without_name() {
        let name = render_folder_name(DEFAULT_FOLDER_TEMPLATE, &sample_time(), None);
        assert_eq!(name.unwrap(), "2024-03-05_09-07-02");
    }

    #[test]
    fn test_blank_name_counts_as_missing() {
        let name = render_folder_name(DEFAULT_FOLDER_TEMPLATE, &sample_time(), Some("   "));
        assert_eq!(name.unwrap(), "2024-03-05_09-07-02");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let template = FolderTemplate::parse(DEFAULT_FOLDER_TEMPLATE).unwrap();
        let a = template.render(&sample_time(), Some("standup")).unwrap();
        let b = template.render(&sample_time(), Some("standup")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dot_prefixed_fields() {
        let name = render_folder_name(
            "{{.Year}}{{.Month}}{{.Day}}{{if .Name}}-{{.Name}}{{end}}",
            &sample_time(),
            Some("retro"),
        );
        assert_eq!(name.unwrap(), "20240305-retro");
    }

    #[test]
    fn test_nested_if_blocks() {
        let name = render_folder_name(
            "{{Year}}{{if Name}}_{{if Day}}d{{Day}}_{{end}}{{Name}}{{end}}",
            &sample_time(),
            Some("x"),
        );
        assert_eq!(name.unwrap(), "2024_d05_x");
    }

    #[test]
    fn test_path_separators_are_replaced() {
        let name = render_folder_name("{{Name}}", &sample_time(), Some("team/sync"));
        assert_eq!(name.unwrap(), "team-sync");
    }

    #[test]
    fn test_unknown_field_is_invalid() {
        let err = FolderTemplate::parse("{{Year}}-{{Week}}").unwrap_err();
        assert!(matches!(err, SessionError::TemplateInvalid(_)));
    }

    #[test]
    fn test_unclosed_if_is_invalid() {
        let err = FolderTemplate::parse("{{Year}}{{if Name}}_{{Name}}").unwrap_err();
        assert!(matches!(err, SessionError::TemplateInvalid(_)));
    }

    #[test]
    fn test_stray_end_is_invalid() {
        let err = FolderTemplate::parse("{{Year}}{{end}}").unwrap_err();
        assert!(matches!(err, SessionError::TemplateInvalid(_)));
    }

    #[test]
    fn test_unbalanced_braces_are_invalid() {
        let err = FolderTemplate::parse("{{Year}}-{{Month").unwrap_err();
        assert!(matches!(err, SessionError::TemplateInvalid(_)));
    }

    #[test]
    fn test_empty_render_is_invalid() {
        let err = render_folder_name("{{Name}}", &sample_time(), None).unwrap_err();
        assert!(matches!(err, SessionError::TemplateInvalid(_)));
    }
}
