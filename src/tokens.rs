use crate::context::{TemplateContext, is_blank};
use regex::Regex;
use std::sync::OnceLock;

pub trait TextBlocks {
    fn block_count(&self) -> usize;
    fn block_text(&self, index: usize) -> String;
    fn set_block_text(&mut self, index: usize, text: String);
}

impl TextBlocks for Vec<String> {
    fn block_count(&self) -> usize {
        self.len()
    }

    fn block_text(&self, index: usize) -> String {
        self.get(index).cloned().unwrap_or_default()
    }

    fn set_block_text(&mut self, index: usize, text: String) {
        if let Some(slot) = self.get_mut(index) {
            *slot = text;
        }
    }
}

pub const NUMERIC_MARKERS: [(&str, [&str; 2]); 3] = [
    ("*1*", ["representative_builder", "contractor_name"]),
    ("*2*", ["representative_supervision", "consultant_name"]),
    ("*3*", ["representative_designer", "designer_name"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Placeholder { key: String, start: usize, end: usize },
    Numeric { marker: &'static str, start: usize, end: usize },
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid placeholder regex"))
}

fn residual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[^}]*\}\}").expect("valid residual regex"))
}

pub fn discover_tokens(text: &str) -> Vec<Token> {
    let mut out: Vec<Token> = placeholder_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?;
            Some(Token::Placeholder {
                key: key.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect();
    for (marker, _) in NUMERIC_MARKERS {
        for (start, _) in text.match_indices(marker) {
            out.push(Token::Numeric {
                marker,
                start,
                end: start + marker.len(),
            });
        }
    }
    out.sort_by_key(|token| match token {
        Token::Placeholder { start, .. } | Token::Numeric { start, .. } => *start,
    });
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstitutionStats {
    pub blocks_changed: usize,
    pub placeholders_filled: usize,
    pub placeholders_blanked: usize,
    pub numeric_markers: usize,
    pub residual_removed: usize,
}

impl SubstitutionStats {
    fn absorb(&mut self, other: SubstitutionStats) {
        self.blocks_changed += other.blocks_changed;
        self.placeholders_filled += other.placeholders_filled;
        self.placeholders_blanked += other.placeholders_blanked;
        self.numeric_markers += other.numeric_markers;
        self.residual_removed += other.residual_removed;
    }
}

pub struct Substituter<'a> {
    ctx: &'a TemplateContext,
    numeric: Vec<(&'static str, String)>,
}

impl<'a> Substituter<'a> {
    pub fn new(ctx: &'a TemplateContext) -> Self {
        let numeric = NUMERIC_MARKERS
            .iter()
            .filter_map(|(marker, fields)| {
                fields
                    .iter()
                    .find_map(|field| ctx.non_blank(field))
                    .map(|value| (*marker, value.to_string()))
            })
            .collect();
        Self { ctx, numeric }
    }

    // Runs the placeholder, numeric-marker and residual passes over one block, in that order.
    pub fn substitute(&self, text: &str) -> (String, SubstitutionStats) {
        let mut stats = SubstitutionStats::default();
        if !text.contains("{{") && !text.contains('*') {
            return (text.to_string(), stats);
        }
        let mut out = text.to_string();

        if out.contains("{{") {
            for (key, value) in self.ctx.iter() {
                let placeholder = format!("{{{{{key}}}}}");
                let hits = out.matches(placeholder.as_str()).count();
                if hits == 0 {
                    continue;
                }
                if is_blank(value) {
                    out = out.replace(&placeholder, "");
                    stats.placeholders_blanked += hits;
                } else {
                    out = out.replace(&placeholder, value);
                    stats.placeholders_filled += hits;
                }
            }
        }

        for (marker, value) in &self.numeric {
            let hits = out.matches(marker).count();
            if hits > 0 {
                out = out.replace(marker, value);
                stats.numeric_markers += hits;
            }
        }

        while residual_re().is_match(&out) {
            stats.residual_removed += residual_re().find_iter(&out).count();
            out = residual_re().replace_all(&out, "").into_owned();
        }

        if out != text {
            stats.blocks_changed = 1;
        }
        (out, stats)
    }

    pub fn apply<B: TextBlocks + ?Sized>(&self, blocks: &mut B) -> SubstitutionStats {
        let mut total = SubstitutionStats::default();
        for index in 0..blocks.block_count() {
            let text = blocks.block_text(index);
            let (replaced, stats) = self.substitute(&text);
            if stats.blocks_changed > 0 {
                blocks.set_block_text(index, replaced);
            }
            total.absorb(stats);
        }
        total
    }
}

pub fn contains_placeholder(text: &str) -> bool {
    residual_re().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::resolve_aliases;

    fn run(ctx: &TemplateContext, text: &str) -> String {
        Substituter::new(ctx).substitute(text).0
    }

    #[test]
    fn fills_known_placeholders() {
        let ctx = TemplateContext::new().with("project_name", "Test Project");
        assert_eq!(run(&ctx, "Project: {{project_name}}."), "Project: Test Project.");
    }

    #[test]
    fn blank_and_absent_placeholders_are_deleted() {
        let ctx = TemplateContext::new().with("act_number", "  ");
        assert_eq!(run(&ctx, "No {{act_number}} / {{unknown_key}}!"), "No  / !");
    }

    #[test]
    fn numeric_marker_replaced_when_value_present() {
        let ctx = TemplateContext::new().with("representative_builder", "Ivan Petrov");
        assert_eq!(run(&ctx, "Builder: *1*"), "Builder: Ivan Petrov");
    }

    #[test]
    fn numeric_marker_kept_when_value_missing() {
        let ctx = TemplateContext::new().with("representative_builder", "");
        assert_eq!(run(&ctx, "Builder: *1* and {{x}}"), "Builder: *1* and ");
    }

    #[test]
    fn numeric_markers_see_alias_resolved_values() {
        let ctx = resolve_aliases(&TemplateContext::new().with("contractor_name", "Stroy Ltd"));
        assert_eq!(run(&ctx, "*1*"), "Stroy Ltd");
        assert_eq!(run(&ctx, "*2* *3*"), "*2* *3*");
    }

    #[test]
    fn residual_cleanup_runs_to_fixpoint() {
        let ctx = TemplateContext::new();
        let out = run(&ctx, "a{{{{x}}}}b {{ spaced }} {{}} {{{y}}}");
        assert!(!contains_placeholder(&out), "leaked: {out}");
    }

    #[test]
    fn values_injecting_placeholders_do_not_leak() {
        let ctx = TemplateContext::new().with("a", "{{b}}");
        let out = run(&ctx, "[{{a}}]");
        assert_eq!(out, "[]");
    }

    #[test]
    fn discovery_orders_tokens_by_position() {
        let tokens = discover_tokens("*2* then {{name}} then *1*");
        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[0], Token::Numeric { marker: "*2*", start: 0, .. }));
        assert!(matches!(&tokens[1], Token::Placeholder { key, .. } if key == "name"));
        assert!(matches!(tokens[2], Token::Numeric { marker: "*1*", .. }));
    }

    #[test]
    fn apply_updates_only_changed_blocks() {
        let ctx = TemplateContext::new().with("name", "Ana");
        let mut blocks = vec![
            "Hello {{name}}".to_string(),
            "untouched".to_string(),
            "{{missing}}".to_string(),
        ];
        let stats = Substituter::new(&ctx).apply(&mut blocks);
        assert_eq!(blocks, vec!["Hello Ana", "untouched", ""]);
        assert_eq!(stats.blocks_changed, 2);
        assert_eq!(stats.placeholders_filled, 1);
        assert_eq!(stats.residual_removed, 1);
    }
}
