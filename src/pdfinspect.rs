use crate::error::DocGenError;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePdfIssue {
    Unreadable,
    Unparseable,
    Encrypted,
    NoPages,
}

impl TemplatePdfIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplatePdfIssue::Unreadable => "TEMPLATE_PDF_UNREADABLE",
            TemplatePdfIssue::Unparseable => "TEMPLATE_PDF_UNPARSEABLE",
            TemplatePdfIssue::Encrypted => "TEMPLATE_PDF_ENCRYPTED",
            TemplatePdfIssue::NoPages => "TEMPLATE_PDF_NO_PAGES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePdfError {
    pub issue: TemplatePdfIssue,
    pub message: String,
}

impl TemplatePdfError {
    fn new(issue: TemplatePdfIssue, message: impl Into<String>) -> Self {
        Self {
            issue,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TemplatePdfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.issue.as_str())
    }
}

impl std::error::Error for TemplatePdfError {}

impl From<TemplatePdfError> for DocGenError {
    fn from(value: TemplatePdfError) -> Self {
        match value.issue {
            TemplatePdfIssue::Unreadable => DocGenError::Io(std::io::Error::other(value.message)),
            _ => DocGenError::InvalidTemplate(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub pages: Vec<Option<PageGeometry>>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, TemplatePdfError> {
    let pdf = LoDocument::load_mem(bytes)
        .map_err(|err| TemplatePdfError::new(TemplatePdfIssue::Unparseable, err.to_string()))?;
    Ok(inspect_document(&pdf, bytes.len()))
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, TemplatePdfError> {
    let data = std::fs::read(path).map_err(|err| {
        TemplatePdfError::new(
            TemplatePdfIssue::Unreadable,
            format!("{}: {err}", path.display()),
        )
    })?;
    inspect_pdf_bytes(&data)
}

pub(crate) fn inspect_document(pdf: &LoDocument, file_size_bytes: usize) -> PdfInspectReport {
    let pages: Vec<Option<PageGeometry>> = pdf
        .get_pages()
        .into_values()
        .map(|id| page_geometry(pdf, id))
        .collect();
    PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pages.len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes,
        pages,
    }
}

pub fn overlay_compatibility_issues(report: &PdfInspectReport) -> Vec<TemplatePdfIssue> {
    [
        (report.encrypted, TemplatePdfIssue::Encrypted),
        (report.page_count == 0, TemplatePdfIssue::NoPages),
    ]
    .into_iter()
    .filter_map(|(hit, issue)| hit.then_some(issue))
    .collect()
}

pub fn require_overlay_compatibility(report: &PdfInspectReport) -> Result<(), TemplatePdfError> {
    match overlay_compatibility_issues(report).first() {
        Some(TemplatePdfIssue::Encrypted) => Err(TemplatePdfError::new(
            TemplatePdfIssue::Encrypted,
            "encrypted pdf templates cannot be overlaid",
        )),
        Some(issue) => Err(TemplatePdfError::new(*issue, "pdf template has no pages")),
        None => Ok(()),
    }
}

// Resolves the page MediaBox, walking up the page tree for inherited values.
pub(crate) fn page_geometry(pdf: &LoDocument, page_id: LoObjectId) -> Option<PageGeometry> {
    let mut current = Some(page_id);
    let mut hops = 0;
    while let Some(id) = current {
        let dict = pdf.get_object(id).and_then(LoObject::as_dict).ok()?;
        if let Ok(media_box) = dict.get(b"MediaBox") {
            return box_geometry(pdf, media_box);
        }
        hops += 1;
        if hops > 64 {
            return None;
        }
        current = dict
            .get(b"Parent")
            .and_then(LoObject::as_reference)
            .ok();
    }
    None
}

fn box_geometry(pdf: &LoDocument, obj: &LoObject) -> Option<PageGeometry> {
    let arr = match obj {
        LoObject::Array(arr) => arr,
        LoObject::Reference(id) => pdf.get_object(*id).and_then(LoObject::as_array).ok()?,
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut nums = [0f32; 4];
    for (slot, item) in nums.iter_mut().zip(arr) {
        *slot = number(item)?;
    }
    let width = (nums[2] - nums[0]).abs();
    let height = (nums[3] - nums[1]).abs();
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(PageGeometry {
        x: nums[0].min(nums[2]),
        y: nums[1].min(nums[3]),
        width,
        height,
    })
}

fn number(obj: &LoObject) -> Option<f32> {
    match obj {
        LoObject::Integer(v) => Some(*v as f32),
        LoObject::Real(v) => Some(*v as f32),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{Stream as LoStream, dictionary};
    use std::io::Write;

    pub(crate) fn make_pdf_bytes(pages: &[Option<[i64; 4]>], inherited: Option<[i64; 4]>) -> Vec<u8> {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids = Vec::new();
        for (idx, media_box) in pages.iter().enumerate() {
            let content = format!("BT /F1 18 Tf 72 720 Td (PAGE {}) Tj ET", idx + 1).into_bytes();
            let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            };
            if let Some(b) = media_box {
                page.set(
                    "MediaBox",
                    vec![b[0].into(), b[1].into(), b[2].into(), b[3].into()],
                );
            }
            kids.push(doc.add_object(page).into());
        }
        let mut tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        };
        if let Some(b) = inherited {
            tree.set(
                "MediaBox",
                vec![b[0].into(), b[1].into(), b[2].into(), b[3].into()],
            );
        }
        doc.objects.insert(pages_id, LoObject::Dictionary(tree));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    #[test]
    fn inspect_pdf_bytes_reads_version_pages_and_geometry() {
        let bytes = make_pdf_bytes(&[Some([0, 0, 612, 792]), Some([10, 20, 305, 440])], None);
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 2);
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert!(!report.pdf_version.is_empty());
        assert_eq!(
            report.pages[1],
            Some(PageGeometry {
                x: 10.0,
                y: 20.0,
                width: 295.0,
                height: 420.0
            })
        );
    }

    #[test]
    fn media_box_is_inherited_from_page_tree() {
        let bytes = make_pdf_bytes(&[None], Some([0, 0, 595, 842]));
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        let geometry = report.pages[0].expect("inherited box");
        assert_eq!((geometry.width, geometry.height), (595.0, 842.0));
    }

    #[test]
    fn missing_media_box_yields_no_geometry() {
        let bytes = make_pdf_bytes(&[None], None);
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.pages, vec![None]);
    }

    #[test]
    fn inspect_pdf_bytes_rejects_malformed_data() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert_eq!(err.issue, TemplatePdfIssue::Unparseable);
        let converted: DocGenError = err.into();
        assert!(matches!(converted, DocGenError::InvalidTemplate(_)));
    }

    #[test]
    fn inspect_pdf_path_reports_io_error_for_missing_file() {
        let missing = std::env::temp_dir().join(format!(
            "docgen_pdfinspect_missing_{}_{}.pdf",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let err = inspect_pdf_path(&missing).expect_err("missing");
        assert_eq!(err.issue, TemplatePdfIssue::Unreadable);
        assert!(matches!(DocGenError::from(err), DocGenError::Io(_)));
    }

    #[test]
    fn overlay_compatibility_rejects_encrypted_and_empty() {
        let mut report = PdfInspectReport {
            pdf_version: "1.7".to_string(),
            page_count: 1,
            encrypted: true,
            file_size_bytes: 0,
            pages: vec![None],
        };
        let err = require_overlay_compatibility(&report).expect_err("must fail");
        assert_eq!(err.issue, TemplatePdfIssue::Encrypted);

        report.encrypted = false;
        report.page_count = 0;
        assert_eq!(
            overlay_compatibility_issues(&report),
            vec![TemplatePdfIssue::NoPages]
        );
    }

    #[test]
    fn inspect_pdf_path_matches_bytes_report() {
        let bytes = make_pdf_bytes(&[Some([0, 0, 612, 792])], None);
        let temp_dir = std::env::temp_dir().join(format!(
            "docgen_pdfinspect_path_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&temp_dir).expect("mkdir");
        let path = temp_dir.join("one.pdf");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(&bytes).expect("write");

        let from_path = inspect_pdf_path(&path).expect("inspect path");
        let from_bytes = inspect_pdf_bytes(&bytes).expect("inspect bytes");
        assert_eq!(from_path, from_bytes);
    }
}
