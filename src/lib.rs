mod alias;
mod assemble;
mod bundle;
mod canvas;
mod context;
mod convert;
mod debug;
mod docx;
mod error;
mod finalize;
mod font;
mod overlay;
mod pdfinspect;
mod stamp;
mod templates;
mod tokens;

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod test_support;

pub use alias::{AliasClass, AliasTable, resolve_aliases};
pub use assemble::{AssembledDocument, AssemblyReport, DocumentAssembler};
pub use bundle::{
    BundleArtifact, BundleBuilder, BundleRequest, CONTEXT_SNAPSHOT_NAME, GeneratedBundle,
};
pub use canvas::{Canvas, Command};
pub use context::TemplateContext;
pub use convert::{
    CommandConverter, DEFAULT_CONVERT_TIMEOUT, DocumentConverter, SerializedConverter,
};
use debug::{DebugCounters, DebugLogger};
pub use docx::{DocxPackage, EmbeddedImage};
pub use error::{DocGenError, GenerationWarning, WarningCode};
pub use finalize::{FilledPdf, OverlayMergeSummary, fill_pdf_template};
pub use font::{FontCandidate, FontResolver, LoadedFont, ResolvedFont};
pub use overlay::{
    DEFAULT_FIELD_SIZE, DEFAULT_GRID_STEP, FieldMapping, GridSpec, OverlayPage, PageMapping,
    PdfFieldMapping, build_overlay_canvas, wrap_lines,
};
pub use pdfinspect::{
    PageGeometry, PdfInspectReport, TemplatePdfError, TemplatePdfIssue, inspect_pdf_bytes,
    inspect_pdf_path, overlay_compatibility_issues, require_overlay_compatibility,
};
pub use stamp::{SIGNATURE_HEADING, Signer, StampRenderer};
pub use templates::{BoundTemplate, DocumentKind, TemplateStore};
pub use tokens::{SubstitutionStats, Substituter, TextBlocks, contains_placeholder};

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_STAMP_FONT: &str = "arial.ttf";

pub struct DocGen {
    templates: TemplateStore,
    aliases: AliasTable,
    stamps: StampRenderer,
    overlay_font: ResolvedFont,
    converter: Option<Arc<dyn DocumentConverter>>,
    debug: Option<Arc<DebugLogger>>,
}

#[derive(Clone)]
pub struct DocGenBuilder {
    template_dir: Option<PathBuf>,
    font_candidates: Vec<FontCandidate>,
    stamp_font: String,
    aliases: AliasTable,
    converter: Option<Arc<dyn DocumentConverter>>,
    debug_path: Option<PathBuf>,
}

impl DocGen {
    pub fn builder() -> DocGenBuilder {
        DocGenBuilder::new()
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn overlay_font(&self) -> &ResolvedFont {
        &self.overlay_font
    }

    pub fn stamp_font(&self) -> &ResolvedFont {
        self.stamps.font()
    }

    pub fn resolve_context(&self, ctx: &TemplateContext) -> TemplateContext {
        self.aliases.resolve(ctx)
    }

    fn assembler(&self) -> DocumentAssembler<'_> {
        DocumentAssembler::new(&self.templates, &self.aliases, &self.stamps)
    }

    fn emit_debug_summary(&self, context: &str, counters: DebugCounters) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context, counters);
            logger.flush();
        }
    }

    fn record_assembly(&self, template: &str, report: &AssemblyReport, counters: &mut DebugCounters) {
        let Some(logger) = self.debug.as_deref() else {
            return;
        };
        let stats = &report.stats;
        logger.log_event(
            "docx.assemble",
            json!({
                "template": template,
                "blocks_changed": stats.blocks_changed,
                "placeholders_filled": stats.placeholders_filled,
                "placeholders_blanked": stats.placeholders_blanked,
                "numeric_markers": stats.numeric_markers,
                "residual_removed": stats.residual_removed,
                "missing_fields": report.missing_fields,
                "trailing_sections": report.trailing_sections,
                "signatures": report.signatures,
            }),
        );
        counters.increment("tokens.replaced", stats.placeholders_filled as u64);
        counters.increment("tokens.blanked", stats.placeholders_blanked as u64);
        counters.increment("markers.substituted", stats.numeric_markers as u64);
        counters.increment("tokens.residual_removed", stats.residual_removed as u64);
        counters.increment("stamps.rendered", report.signatures as u64);
    }

    fn record_warnings(&self, warnings: &[GenerationWarning], counters: &mut DebugCounters) {
        let Some(logger) = self.debug.as_deref() else {
            return;
        };
        for warning in warnings {
            logger.log_event(
                "warning",
                json!({ "code": warning.code.as_str(), "message": warning.message }),
            );
            counters.increment(&format!("warnings.{}", warning.code.as_str()), 1);
        }
    }

    pub fn generate_document(
        &self,
        template: &str,
        ctx: &TemplateContext,
        signers: &[Signer],
        dest: impl AsRef<Path>,
    ) -> Result<AssembledDocument, DocGenError> {
        let assembled = self
            .assembler()
            .assemble_to(template, ctx, signers, dest.as_ref())?;
        let mut counters = DebugCounters::default();
        self.record_assembly(template, &assembled.report, &mut counters);
        self.emit_debug_summary(&format!("document:{template}"), counters);
        Ok(assembled)
    }

    pub fn generate_bundle(&self, request: &BundleRequest) -> Result<GeneratedBundle, DocGenError> {
        let builder = BundleBuilder::new(self.assembler(), self.converter.as_deref());
        let result = builder.build(request);
        let mut counters = DebugCounters::default();
        match &result {
            Ok(bundle) => {
                self.record_assembly(&request.template, &bundle.report, &mut counters);
                self.record_warnings(&bundle.warnings, &mut counters);
                if let Some(logger) = self.debug.as_deref() {
                    logger.log_event(
                        "bundle.complete",
                        json!({
                            "request_id": bundle.request_id,
                            "archive": bundle.archive.name,
                            "sha256": bundle.archive.sha256,
                            "members": bundle.member_names(),
                        }),
                    );
                }
                self.emit_debug_summary(&format!("bundle:{}", bundle.request_id), counters);
            }
            Err(err) => {
                if let Some(logger) = self.debug.as_deref() {
                    logger.log_event(
                        "bundle.failed",
                        json!({ "template": request.template, "error": err.to_string() }),
                    );
                }
                self.emit_debug_summary(&format!("bundle:{}", request.template), counters);
            }
        }
        result
    }

    pub fn fill_pdf_template(
        &self,
        template: &str,
        mapping: &PdfFieldMapping,
        ctx: &TemplateContext,
        dest: impl AsRef<Path>,
    ) -> Result<FilledPdf, DocGenError> {
        let path = self.templates.pdf_path(template)?;
        let bytes = std::fs::read(&path)?;
        let mut counters = DebugCounters::default();
        let filled = self.overlay_pdf(&bytes, mapping, ctx, &mut counters)?;
        std::fs::write(dest.as_ref(), &filled.bytes)?;
        log::info!(
            "filled {} from {} ({} of {} page(s) overlaid)",
            dest.as_ref().display(),
            path.display(),
            filled.summary.pages_overlaid,
            filled.summary.pages_total
        );
        self.emit_debug_summary(&format!("pdf:{template}"), counters);
        Ok(filled)
    }

    pub fn fill_pdf_bytes(
        &self,
        template_bytes: &[u8],
        mapping: &PdfFieldMapping,
        ctx: &TemplateContext,
    ) -> Result<FilledPdf, DocGenError> {
        let mut counters = DebugCounters::default();
        let filled = self.overlay_pdf(template_bytes, mapping, ctx, &mut counters)?;
        self.emit_debug_summary("pdf:bytes", counters);
        Ok(filled)
    }

    fn overlay_pdf(
        &self,
        template_bytes: &[u8],
        mapping: &PdfFieldMapping,
        ctx: &TemplateContext,
        counters: &mut DebugCounters,
    ) -> Result<FilledPdf, DocGenError> {
        let values = self.aliases.resolve(ctx);
        let filled = fill_pdf_template(template_bytes, mapping, &values, &self.overlay_font)?;
        if let Some(logger) = self.debug.as_deref() {
            logger.log_event(
                "pdf.overlay",
                json!({
                    "font": self.overlay_font.display_name(),
                    "pages_total": filled.summary.pages_total,
                    "pages_overlaid": filled.summary.pages_overlaid,
                    "fields_drawn": filled.summary.fields_drawn,
                    "debug_names": mapping.debug_names,
                }),
            );
            counters.increment("pages.overlaid", filled.summary.pages_overlaid as u64);
            counters.increment("fields.drawn", filled.summary.fields_drawn as u64);
        }
        self.record_warnings(&filled.warnings, counters);
        Ok(filled)
    }
}

impl Default for DocGenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocGenBuilder {
    pub fn new() -> Self {
        Self {
            template_dir: None,
            font_candidates: Vec::new(),
            stamp_font: DEFAULT_STAMP_FONT.to_string(),
            aliases: AliasTable::default(),
            converter: None,
            debug_path: None,
        }
    }

    pub fn template_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(path.into());
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_candidates.push(FontCandidate::Dir(path.into()));
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_candidates.push(FontCandidate::File(path.into()));
        self
    }

    // File name probed first when choosing the stamp font.
    pub fn stamp_font(mut self, file_name: impl Into<String>) -> Self {
        self.stamp_font = file_name.into();
        self
    }

    pub fn alias_table(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn converter(mut self, converter: impl DocumentConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    // Enable debug logging to a JSONL file.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<DocGen, DocGenError> {
        let Some(template_dir) = self.template_dir else {
            return Err(DocGenError::InvalidConfiguration(
                "template_dir is required".to_string(),
            ));
        };
        if !template_dir.is_dir() {
            return Err(DocGenError::InvalidConfiguration(format!(
                "template_dir {} is not a directory",
                template_dir.display()
            )));
        }

        let stamp_font =
            FontResolver::stamp_defaults(&self.font_candidates, &self.stamp_font).resolve();
        if stamp_font.is_fallback() {
            log::warn!("no stamp font found; signature stamps use the basic font");
        }
        let overlay_font = FontResolver::unicode_defaults(&self.font_candidates).resolve();
        log::debug!(
            "fonts resolved: stamp={} overlay={}",
            stamp_font.display_name(),
            overlay_font.display_name()
        );

        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        if let Some(logger) = debug.as_deref() {
            logger.log_event(
                "engine.build",
                json!({
                    "template_dir": template_dir.display().to_string(),
                    "stamp_font": stamp_font.display_name(),
                    "overlay_font": overlay_font.display_name(),
                    "converter": self.converter.is_some(),
                }),
            );
        }

        Ok(DocGen {
            templates: TemplateStore::new(template_dir),
            aliases: self.aliases,
            stamps: StampRenderer::new(stamp_font),
            overlay_font,
            converter: self.converter,
            debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "docgen_lib_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn build_requires_existing_template_dir() {
        let err = DocGen::builder().build().err().expect("must fail");
        assert!(matches!(err, DocGenError::InvalidConfiguration(_)));

        let missing = temp_dir("missing").join("nope");
        let err = DocGen::builder()
            .template_dir(&missing)
            .build()
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn debug_log_records_bundle_summary() {
        let dir = temp_dir("debug");
        std::fs::write(
            dir.join("act7_bg.docx"),
            docx::tests::docx_with_body(
                "<w:p><w:r><w:t>{{project_name}} {{unknown}} *1*</w:t></w:r></w:p>",
            ),
        )
        .expect("template");
        let log_path = dir.join("trace.jsonl");
        let engine = DocGen::builder()
            .template_dir(&dir)
            .debug_log(&log_path)
            .build()
            .expect("engine");
        let request = BundleRequest::new(
            "act7",
            TemplateContext::new()
                .with("project_name", "Test Project")
                .with("contractor_name", "Stroy Ltd"),
            dir.join("out"),
        )
        .with_request_id("dbg");
        let bundle = engine.generate_bundle(&request).expect("bundle");
        assert!(bundle.pdf.is_none());

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&log_path)
            .expect("log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        let types: Vec<&str> = lines.iter().filter_map(|l| l["type"].as_str()).collect();
        assert_eq!(
            types,
            vec![
                "engine.build",
                "docx.assemble",
                "warning",
                "bundle.complete",
                "debug.summary"
            ]
        );
        let summary = lines.last().expect("summary");
        assert_eq!(summary["context"], "bundle:dbg");
        assert_eq!(summary["counts"]["markers.substituted"], 1);
        assert_eq!(summary["counts"]["warnings.CONVERSION_FAILED"], 1);
        assert!(summary["counts"]["tokens.residual_removed"].as_u64().unwrap_or(0) >= 1);
    }

    #[test]
    fn concurrent_bundles_report_their_own_counts() {
        let dir = temp_dir("debug_concurrent");
        std::fs::write(
            dir.join("act7_bg.docx"),
            docx::tests::docx_with_body("<w:p><w:r><w:t>{{project_name}} *1*</w:t></w:r></w:p>"),
        )
        .expect("template");
        let log_path = dir.join("trace.jsonl");
        let engine = DocGen::builder()
            .template_dir(&dir)
            .debug_log(&log_path)
            .build()
            .expect("engine");
        let ids = ["c1", "c2", "c3", "c4"];
        std::thread::scope(|scope| {
            for id in ids {
                let engine = &engine;
                let out = dir.join("out");
                scope.spawn(move || {
                    let request = BundleRequest::new(
                        "act7",
                        TemplateContext::new().with("project_name", "P"),
                        out,
                    )
                    .with_request_id(id);
                    engine.generate_bundle(&request).expect("bundle");
                });
            }
        });

        let summaries: Vec<serde_json::Value> = std::fs::read_to_string(&log_path)
            .expect("log")
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json"))
            .filter(|line| line["type"] == "debug.summary")
            .collect();
        assert_eq!(summaries.len(), ids.len());
        for summary in summaries {
            assert_eq!(summary["counts"]["markers.substituted"], 1);
            assert_eq!(summary["counts"]["tokens.replaced"], 1);
            assert_eq!(summary["counts"]["warnings.CONVERSION_FAILED"], 1);
        }
    }
}
