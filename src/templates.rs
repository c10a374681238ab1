use crate::error::DocGenError;
use std::path::{Path, PathBuf};

const COMMON_FIELDS: &[&str] = &[
    "project_name",
    "project_location",
    "client_name",
    "contractor_name",
    "act_date",
    "act_number",
    "representative_builder",
    "representative_supervision",
    "representative_designer",
    "signature_builder",
    "signature_supervision",
    "signature_designer",
];

const ACT7_FIELDS: &[&str] = &[
    "level_from",
    "level_to",
    "work_description",
    "concrete_class",
    "concrete_work",
];

const ACT14_FIELDS: &[&str] = &["referenced_acts", "quality_protocols", "conclusion_text"];

const ACT15_FIELDS: &[&str] = &[
    "all_designers",
    "all_supervision",
    "referenced_documents",
    "findings_permits",
    "findings_execution",
    "findings_site",
    "decision_text",
];

pub const TRAILING_SECTIONS: &[(&str, &str)] = &[
    ("quality_control", "Quality Control"),
    ("issues", "Issues and Concerns"),
    ("materials_delivered", "Materials Delivered"),
    ("next_steps", "Next Steps"),
    ("notes", "Additional Notes"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    Act7,
    Act14,
    Act15,
    Generic(String),
}

impl DocumentKind {
    pub fn from_template_name(name: &str) -> Self {
        let lowered = name.trim().to_ascii_lowercase();
        let stem = lowered.strip_suffix(".docx").unwrap_or(&lowered);
        let stem = stem.strip_suffix("_bg").unwrap_or(stem);
        match stem {
            "act7" => DocumentKind::Act7,
            "act14" => DocumentKind::Act14,
            "act15" => DocumentKind::Act15,
            _ => DocumentKind::Generic(name.trim().to_string()),
        }
    }

    pub fn template_file_name(&self) -> String {
        match self {
            DocumentKind::Act7 => "act7_bg.docx".to_string(),
            DocumentKind::Act14 => "act14_bg.docx".to_string(),
            DocumentKind::Act15 => "act15_bg.docx".to_string(),
            DocumentKind::Generic(name) => {
                if Path::new(name).extension().is_some() {
                    name.clone()
                } else {
                    format!("{name}.docx")
                }
            }
        }
    }

    // Every field the bound template may reference; empty for generic templates.
    pub fn known_fields(&self) -> Vec<&'static str> {
        let specific = match self {
            DocumentKind::Act7 => ACT7_FIELDS,
            DocumentKind::Act14 => ACT14_FIELDS,
            DocumentKind::Act15 => ACT15_FIELDS,
            DocumentKind::Generic(_) => return Vec::new(),
        };
        COMMON_FIELDS.iter().chain(specific).copied().collect()
    }

    pub fn trailing_sections(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            DocumentKind::Generic(_) => TRAILING_SECTIONS,
            _ => &[],
        }
    }

    pub fn is_act(&self) -> bool {
        !matches!(self, DocumentKind::Generic(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTemplate {
    pub kind: DocumentKind,
    pub path: PathBuf,
}

impl BoundTemplate {
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bind(&self, name: &str) -> Result<BoundTemplate, DocGenError> {
        validate_template_name(name)?;
        let kind = DocumentKind::from_template_name(name);
        let path = self.root.join(kind.template_file_name());
        if !path.is_file() {
            return Err(DocGenError::TemplateNotFound(path));
        }
        log::debug!("template '{}' bound to {}", name, path.display());
        Ok(BoundTemplate { kind, path })
    }

    pub fn pdf_path(&self, name: &str) -> Result<PathBuf, DocGenError> {
        validate_template_name(name)?;
        let path = if Path::new(name).extension().is_some() {
            self.root.join(name)
        } else {
            self.root.join(format!("{name}.pdf"))
        };
        if !path.is_file() {
            return Err(DocGenError::TemplateNotFound(path));
        }
        Ok(path)
    }
}

fn validate_template_name(name: &str) -> Result<(), DocGenError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
    {
        return Err(DocGenError::InvalidConfiguration(format!(
            "invalid template name: {name:?}"
        )));
    }
    Ok(())
}
