use crate::context::TemplateContext;
use crate::error::{DocGenError, GenerationWarning, WarningCode};
use crate::font::ResolvedFont;
use crate::overlay::{OverlayPageSpec, PdfFieldMapping, build_overlay_document};
use crate::pdfinspect::{inspect_document, require_overlay_compatibility};
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream, dictionary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayMergeSummary {
    pub pages_total: usize,
    pub pages_overlaid: usize,
    pub fields_drawn: usize,
}

#[derive(Debug, Clone)]
pub struct FilledPdf {
    pub bytes: Vec<u8>,
    pub summary: OverlayMergeSummary,
    pub warnings: Vec<GenerationWarning>,
}

fn page_box(page: &lopdf::Dictionary) -> Vec<LoObject> {
    if let Ok(arr) = page.get(b"CropBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    if let Ok(arr) = page.get(b"MediaBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    vec![0.into(), 0.into(), 612.into(), 792.into()]
}

fn page_resources_object(doc: &LoDocument, page: &lopdf::Dictionary) -> LoObject {
    match page.get(b"Resources") {
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .map(|o| o.clone())
            .unwrap_or_else(|_| LoObject::Dictionary(lopdf::Dictionary::new())),
        Ok(LoObject::Dictionary(d)) => LoObject::Dictionary(d.clone()),
        _ => LoObject::Dictionary(lopdf::Dictionary::new()),
    }
}

// Own or inherited (via Parent) resources of a template page.
fn page_resources_dict(page: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    let mut node = page.clone();
    for _ in 0..32 {
        match node.get(b"Resources") {
            Ok(LoObject::Dictionary(d)) => return d.clone(),
            Ok(LoObject::Reference(id)) => {
                return doc
                    .get_object(*id)
                    .ok()
                    .and_then(|o| o.as_dict().ok())
                    .cloned()
                    .unwrap_or_default();
            }
            _ => {}
        }
        let parent = node
            .get(b"Parent")
            .and_then(LoObject::as_reference)
            .and_then(|id| doc.get_dictionary(id));
        match parent {
            Ok(dict) => node = dict.clone(),
            Err(_) => break,
        }
    }
    lopdf::Dictionary::new()
}

fn page_xobject_dict(resources: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    match resources.get(b"XObject") {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => lopdf::Dictionary::new(),
    }
}

fn import_document_objects(dst: &mut LoDocument, mut src: LoDocument) -> Vec<LoObjectId> {
    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let page_ids: Vec<LoObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    page_ids
}

// Brackets the existing page streams in q/Q so state they leave behind
// cannot reach `tail`.
fn wrap_page_contents(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    tail: Vec<u8>,
) -> Result<(), DocGenError> {
    let existing = doc.get_page_contents(page_id);
    let open_id = doc.add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
    let tail_id = doc.add_object(LoStream::new(dictionary! {}, tail));
    let mut contents: Vec<LoObject> = Vec::with_capacity(existing.len() + 2);
    contents.push(open_id.into());
    contents.extend(existing.into_iter().map(LoObject::Reference));
    contents.push(tail_id.into());
    doc.get_object_mut(page_id)
        .and_then(LoObject::as_dict_mut)?
        .set("Contents", LoObject::Array(contents));
    Ok(())
}

// Draws mapped field values onto a copy of `template_bytes`.
// Pages without a mapping entry, and pages whose geometry cannot be resolved, are
// copied through unchanged.
pub fn fill_pdf_template(
    template_bytes: &[u8],
    mapping: &PdfFieldMapping,
    values: &TemplateContext,
    font: &ResolvedFont,
) -> Result<FilledPdf, DocGenError> {
    let mut template = LoDocument::load_mem(template_bytes)?;
    let report = inspect_document(&template, template_bytes.len());
    require_overlay_compatibility(&report)?;

    let mut warnings = Vec::new();
    if mapping.pages.len() > report.page_count {
        warnings.push(GenerationWarning::new(
            WarningCode::MappingPageIgnored,
            format!(
                "mapping describes {} page(s) but the template has {}; extra pages ignored",
                mapping.pages.len(),
                report.page_count
            ),
        ));
    }

    let mut specs = Vec::new();
    let mut origins = Vec::new();
    for (page_index, page_mapping) in mapping.pages.iter().enumerate().take(report.page_count) {
        let geometry = report.pages[page_index];
        let width = page_mapping.width.or(geometry.map(|g| g.width));
        let height = page_mapping.height.or(geometry.map(|g| g.height));
        let (Some(width), Some(height)) = (width, height) else {
            let err = DocGenError::OverlayGeometryMismatch {
                page_index,
                message: "no MediaBox and no size override".to_string(),
            };
            log::warn!("{err}; page passed through");
            warnings.push(GenerationWarning::new(
                WarningCode::OverlayGeometryMismatch,
                err.to_string(),
            ));
            continue;
        };
        specs.push(OverlayPageSpec {
            page_index,
            mapping: page_mapping,
            width,
            height,
        });
        origins.push(geometry.map(|g| (g.x, g.y)).unwrap_or((0.0, 0.0)));
    }

    let overlay = build_overlay_document(&specs, mapping, values, font);
    if font.is_fallback() && overlay.fields_drawn > 0 {
        log::warn!("no unicode font found; overlay text uses Helvetica");
        warnings.push(GenerationWarning::new(
            WarningCode::FontFallback,
            "no unicode font found; overlay text uses the basic Helvetica font",
        ));
    }

    let template_ids: Vec<LoObjectId> = template.get_pages().values().copied().collect();
    let page_indices = overlay.page_indices.clone();
    let overlay_ids = import_document_objects(&mut template, overlay.document);

    for (out_idx, (overlay_page_id, page_index)) in
        overlay_ids.iter().zip(page_indices.iter()).enumerate()
    {
        let template_page_id = template_ids[*page_index];
        let (dx, dy) = specs
            .iter()
            .position(|s| s.page_index == *page_index)
            .map(|pos| origins[pos])
            .unwrap_or((0.0, 0.0));

        let overlay_page = template
            .get_object(*overlay_page_id)
            .and_then(LoObject::as_dict)?
            .clone();
        let overlay_content = template.get_page_content(*overlay_page_id)?;
        let bbox = page_box(&overlay_page);
        let overlay_resources = page_resources_object(&template, &overlay_page);

        let form_stream = LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => LoObject::Array(bbox),
                "Resources" => overlay_resources,
            },
            overlay_content,
        );
        let form_id = template.add_object(form_stream);
        let form_name = format!("DG_OVL_{}", out_idx + 1);

        let page_dict = template
            .get_object(template_page_id)
            .and_then(LoObject::as_dict)?
            .clone();
        let mut resources = page_resources_dict(&page_dict, &template);
        let mut xobjects = page_xobject_dict(&resources, &template);
        xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
        resources.set("XObject", LoObject::Dictionary(xobjects));

        {
            let page_mut = template
                .get_object_mut(template_page_id)
                .and_then(LoObject::as_dict_mut)?;
            page_mut.set("Resources", LoObject::Dictionary(resources));
        }

        let do_content = format!(
            "\nQ\nq 1 0 0 1 {} {} cm /{} Do Q\n",
            crate::canvas::fmt_num(dx),
            crate::canvas::fmt_num(dy),
            form_name
        );
        wrap_page_contents(&mut template, template_page_id, do_content.into_bytes())?;
    }

    template.prune_objects();
    template.renumber_objects();
    template.compress();
    let mut bytes = Vec::new();
    template.save_to(&mut bytes)?;

    log::debug!(
        "overlay merged onto {} of {} page(s)",
        page_indices.len(),
        report.page_count
    );
    Ok(FilledPdf {
        bytes,
        summary: OverlayMergeSummary {
            pages_total: report.page_count,
            pages_overlaid: page_indices.len(),
            fields_drawn: overlay.fields_drawn,
        },
        warnings,
    })
}
