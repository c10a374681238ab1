use crate::context::TemplateContext;

// `members` are scanned in preference order for the first non-blank value, which is then
// copied into every blank member. `seeds` are consulted only when every member is blank
// and are never written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasClass {
    pub members: Vec<String>,
    pub seeds: Vec<String>,
}

impl AliasClass {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
            seeds: Vec::new(),
        }
    }

    pub fn seeded_by(mut self, seed: impl Into<String>) -> Self {
        self.seeds.push(seed.into());
        self
    }

    fn source_value<'a>(&self, ctx: &'a TemplateContext) -> Option<&'a str> {
        self.members
            .iter()
            .chain(self.seeds.iter())
            .find_map(|name| ctx.non_blank(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    classes: Vec<AliasClass>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            classes: vec![
                AliasClass::new(["consultant_name", "representative_supervision"])
                    .seeded_by("supervisor_name"),
                AliasClass::new(["designer_name", "representative_designer"]),
                AliasClass::new(["contractor_name", "representative_builder"]),
            ],
        }
    }
}

impl AliasTable {
    pub fn empty() -> Self {
        Self {
            classes: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: AliasClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn classes(&self) -> &[AliasClass] {
        &self.classes
    }

    // Returns an enriched copy of `ctx`; the input is left untouched.
    // Populated members are never overwritten.
    pub fn resolve(&self, ctx: &TemplateContext) -> TemplateContext {
        let mut out = ctx.clone();
        for class in &self.classes {
            let Some(value) = class.source_value(ctx).map(str::to_string) else {
                continue;
            };
            for member in &class.members {
                if out.non_blank(member).is_none() {
                    out.insert(member.clone(), value.clone());
                }
            }
        }
        out
    }
}

pub fn resolve_aliases(ctx: &TemplateContext) -> TemplateContext {
    AliasTable::default().resolve(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consultant_fills_supervision() {
        let ctx = TemplateContext::new().with("consultant_name", "Ivan Petrov");
        let out = resolve_aliases(&ctx);
        assert_eq!(out.get("representative_supervision"), Some("Ivan Petrov"));
    }

    #[test]
    fn builder_fills_contractor() {
        let ctx = TemplateContext::new().with("representative_builder", "Stroy Ltd");
        let out = resolve_aliases(&ctx);
        assert_eq!(out.get("contractor_name"), Some("Stroy Ltd"));
    }

    #[test]
    fn populated_members_are_not_overwritten() {
        let ctx = TemplateContext::new()
            .with("designer_name", "A")
            .with("representative_designer", "B");
        let out = resolve_aliases(&ctx);
        assert_eq!(out.get("designer_name"), Some("A"));
        assert_eq!(out.get("representative_designer"), Some("B"));
    }

    #[test]
    fn blank_member_counts_as_missing() {
        let ctx = TemplateContext::new()
            .with("representative_designer", "  ")
            .with("designer_name", "Maria");
        let out = resolve_aliases(&ctx);
        assert_eq!(out.get("representative_designer"), Some("Maria"));
    }

    #[test]
    fn supervisor_seeds_only_when_class_is_empty() {
        let seeded = resolve_aliases(&TemplateContext::new().with("supervisor_name", "Georgi"));
        assert_eq!(seeded.get("consultant_name"), Some("Georgi"));
        assert_eq!(seeded.get("representative_supervision"), Some("Georgi"));

        let kept = resolve_aliases(
            &TemplateContext::new()
                .with("supervisor_name", "Georgi")
                .with("representative_supervision", "Elena"),
        );
        assert_eq!(kept.get("consultant_name"), Some("Elena"));
        assert_eq!(kept.get("supervisor_name"), Some("Georgi"));
    }

    #[test]
    fn empty_classes_stay_empty() {
        let ctx = TemplateContext::new().with("project_name", "P");
        let out = resolve_aliases(&ctx);
        assert_eq!(out, ctx);
    }

    #[test]
    fn resolution_is_idempotent() {
        let ctx = TemplateContext::new()
            .with("consultant_name", "Ivan Petrov")
            .with("representative_designer", "")
            .with("representative_builder", "Stroy Ltd")
            .with("supervisor_name", "Other");
        let once = resolve_aliases(&ctx);
        let twice = resolve_aliases(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn classes_do_not_interact() {
        let table = AliasTable::empty()
            .with_class(AliasClass::new(["a", "b"]))
            .with_class(AliasClass::new(["c", "d"]));
        let out = table.resolve(&TemplateContext::new().with("b", "x"));
        assert_eq!(out.get("a"), Some("x"));
        assert_eq!(out.get("c"), None);
        assert_eq!(out.get("d"), None);
    }
}
