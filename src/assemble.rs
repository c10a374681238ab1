use crate::alias::AliasTable;
use crate::context::TemplateContext;
use crate::docx::DocxPackage;
use crate::error::DocGenError;
use crate::stamp::{SIGNATURE_HEADING, STAMP_DISPLAY_WIDTH_IN, Signer, StampRenderer};
use crate::templates::{BoundTemplate, TemplateStore};
use crate::tokens::{SubstitutionStats, Substituter};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub stats: SubstitutionStats,
    pub missing_fields: Vec<String>,
    pub trailing_sections: Vec<String>,
    pub signatures: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub template: BoundTemplate,
    pub context: TemplateContext,
    pub bytes: Vec<u8>,
    pub report: AssemblyReport,
}

pub struct DocumentAssembler<'a> {
    store: &'a TemplateStore,
    aliases: &'a AliasTable,
    stamps: &'a StampRenderer,
}

impl<'a> DocumentAssembler<'a> {
    pub fn new(store: &'a TemplateStore, aliases: &'a AliasTable, stamps: &'a StampRenderer) -> Self {
        Self {
            store,
            aliases,
            stamps,
        }
    }

    pub fn assemble(
        &self,
        template_name: &str,
        ctx: &TemplateContext,
        signers: &[Signer],
    ) -> Result<AssembledDocument, DocGenError> {
        let template = self.store.bind(template_name)?;
        let source = fs::read(&template.path)?;
        let mut package = DocxPackage::from_bytes(&source)?;

        let resolved = self.aliases.resolve(ctx);
        let substituter = Substituter::new(&resolved);
        let stats = substituter.apply(&mut package);

        let mut trailing_sections = Vec::new();
        for (key, heading) in template.kind.trailing_sections() {
            let Some(value) = resolved.non_blank(key) else {
                continue;
            };
            let (text, _) = substituter.substitute(value);
            package.append_heading(heading);
            package.append_paragraph(&text);
            trailing_sections.push((*key).to_string());
        }

        if !signers.is_empty() {
            let stamps = self.stamps.render_all(signers)?;
            package.append_heading(SIGNATURE_HEADING);
            package.append_image_row(&stamps, STAMP_DISPLAY_WIDTH_IN);
        }

        let missing_fields = template
            .kind
            .known_fields()
            .into_iter()
            .filter(|field| resolved.non_blank(field).is_none())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !missing_fields.is_empty() {
            log::debug!(
                "template '{}' filled with {} blank known field(s)",
                template_name,
                missing_fields.len()
            );
        }

        let bytes = package.to_bytes()?;
        Ok(AssembledDocument {
            template,
            context: resolved,
            bytes,
            report: AssemblyReport {
                stats,
                missing_fields,
                trailing_sections,
                signatures: signers.len(),
            },
        })
    }

    pub fn assemble_to(
        &self,
        template_name: &str,
        ctx: &TemplateContext,
        signers: &[Signer],
        dest: &Path,
    ) -> Result<AssembledDocument, DocGenError> {
        let assembled = self.assemble(template_name, ctx, signers)?;
        fs::write(dest, &assembled.bytes)?;
        log::info!(
            "generated {} from {}",
            dest.display(),
            assembled.template.path.display()
        );
        Ok(assembled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::tests::docx_with_body;
    use crate::font::ResolvedFont;
    use crate::tokens::contains_placeholder;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "docgen_assemble_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn paragraph(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>")
    }

    fn reopen(bytes: &[u8]) -> Vec<String> {
        DocxPackage::from_bytes(bytes).expect("reopen").paragraph_texts()
    }

    #[test]
    fn act7_supervision_filled_from_consultant() {
        let dir = temp_dir("act7");
        let body = [
            paragraph("Project: {{project_name}}"),
            paragraph("Supervision: {{representative_supervision}}"),
            format!(
                "<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>",
                paragraph("{{representative_supervision}} / {{act_number}}")
            ),
        ]
        .concat();
        fs::write(dir.join("act7_bg.docx"), docx_with_body(&body)).expect("write");

        let store = TemplateStore::new(&dir);
        let aliases = AliasTable::default();
        let stamps = StampRenderer::new(ResolvedFont::BasicFallback);
        let ctx = TemplateContext::new()
            .with("project_name", "Test Project")
            .with("consultant_name", "Ivan Petrov");
        let dest = dir.join("out.docx");
        let doc = DocumentAssembler::new(&store, &aliases, &stamps)
            .assemble_to("act7", &ctx, &[], &dest)
            .expect("assemble");

        let texts = reopen(&fs::read(&dest).expect("read out"));
        assert_eq!(texts[0], "Project: Test Project");
        assert_eq!(texts[1], "Supervision: Ivan Petrov");
        assert_eq!(texts[2], "Ivan Petrov / ");
        assert!(texts.iter().all(|t| !contains_placeholder(t)));
        assert!(doc.report.missing_fields.contains(&"act_number".to_string()));
        assert!(!doc.report.missing_fields.contains(&"representative_supervision".to_string()));
        assert!(doc.report.trailing_sections.is_empty());
        // caller context untouched, resolved copy enriched
        assert_eq!(ctx.get("representative_supervision"), None);
        assert_eq!(doc.context.get("representative_supervision"), Some("Ivan Petrov"));
    }

    #[test]
    fn generic_template_gets_trailing_sections_and_signatures() {
        let dir = temp_dir("generic");
        fs::write(
            dir.join("daily_report.docx"),
            docx_with_body(&paragraph("Report for {{project_name}}")),
        )
        .expect("write");
        let store = TemplateStore::new(&dir);
        let aliases = AliasTable::default();
        let stamps = StampRenderer::new(ResolvedFont::BasicFallback);
        let ctx = TemplateContext::new()
            .with("project_name", "Bridge")
            .with("issues", "Crane delayed {{eta}}")
            .with("notes", " ");
        let signers = [Signer::new("Ivan Petrov", "Supervision").dated("2024-05-01")];
        let doc = DocumentAssembler::new(&store, &aliases, &stamps)
            .assemble("daily_report", &ctx, &signers)
            .expect("assemble");

        assert_eq!(doc.report.trailing_sections, vec!["issues".to_string()]);
        assert_eq!(doc.report.signatures, 1);
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(doc.bytes.as_slice())).expect("zip");
        let mut xml = String::new();
        std::io::Read::read_to_string(
            &mut archive.by_name("word/document.xml").expect("document"),
            &mut xml,
        )
        .expect("read xml");
        assert!(xml.contains("Issues and Concerns"));
        assert!(xml.contains("Crane delayed "));
        assert!(!xml.contains("{{"));
        assert!(!xml.contains("Additional Notes"));
        assert!(xml.contains(">Signatures<"));
        assert!(archive.by_name("word/media/docgen_stamp_1.png").is_ok());
    }

    #[test]
    fn missing_template_is_fatal_and_writes_nothing() {
        let dir = temp_dir("missing");
        let store = TemplateStore::new(&dir);
        let aliases = AliasTable::default();
        let stamps = StampRenderer::new(ResolvedFont::BasicFallback);
        let dest = dir.join("never.docx");
        let err = DocumentAssembler::new(&store, &aliases, &stamps)
            .assemble_to("act14", &TemplateContext::new(), &[], &dest)
            .expect_err("must fail");
        assert!(matches!(err, DocGenError::TemplateNotFound(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn template_source_is_not_modified() {
        let dir = temp_dir("readonly");
        let source = docx_with_body(&paragraph("{{project_name}}"));
        fs::write(dir.join("act15_bg.docx"), &source).expect("write");
        let store = TemplateStore::new(&dir);
        let aliases = AliasTable::default();
        let stamps = StampRenderer::new(ResolvedFont::BasicFallback);
        DocumentAssembler::new(&store, &aliases, &stamps)
            .assemble("act15", &TemplateContext::new().with("project_name", "X"), &[])
            .expect("assemble");
        assert_eq!(fs::read(dir.join("act15_bg.docx")).expect("read"), source);
    }
}
