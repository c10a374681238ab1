use crate::assemble::{AssemblyReport, DocumentAssembler};
use crate::context::TemplateContext;
use crate::convert::DocumentConverter;
use crate::error::{DocGenError, GenerationWarning, WarningCode};
use crate::stamp::Signer;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CONTEXT_SNAPSHOT_NAME: &str = "context.json";

#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub template: String,
    pub context: TemplateContext,
    pub signers: Vec<Signer>,
    // Request-scoped id used in artifact names; a UUID v4 when absent.
    pub request_id: Option<String>,
    pub out_dir: PathBuf,
}

impl BundleRequest {
    pub fn new(
        template: impl Into<String>,
        context: TemplateContext,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template: template.into(),
            context,
            signers: Vec::new(),
            request_id: None,
            out_dir: out_dir.into(),
        }
    }

    pub fn with_signers(mut self, signers: Vec<Signer>) -> Self {
        self.signers = signers;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    pub name: String,
    pub path: Option<PathBuf>,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl BundleArtifact {
    fn new(name: String, path: Option<PathBuf>, bytes: Vec<u8>) -> Self {
        let sha256 = sha256_hex(&bytes);
        Self {
            name,
            path,
            bytes,
            sha256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedBundle {
    pub request_id: String,
    pub document: BundleArtifact,
    pub pdf: Option<BundleArtifact>,
    pub context_snapshot: BundleArtifact,
    pub archive: BundleArtifact,
    pub report: AssemblyReport,
    pub warnings: Vec<GenerationWarning>,
}

impl GeneratedBundle {
    pub fn member_names(&self) -> Vec<&str> {
        let mut names = vec![self.document.name.as_str()];
        if let Some(pdf) = &self.pdf {
            names.push(pdf.name.as_str());
        }
        names.push(self.context_snapshot.name.as_str());
        names
    }
}

pub struct BundleBuilder<'a> {
    assembler: DocumentAssembler<'a>,
    converter: Option<&'a dyn DocumentConverter>,
}

impl<'a> BundleBuilder<'a> {
    pub fn new(
        assembler: DocumentAssembler<'a>,
        converter: Option<&'a dyn DocumentConverter>,
    ) -> Self {
        Self {
            assembler,
            converter,
        }
    }

    pub fn build(&self, request: &BundleRequest) -> Result<GeneratedBundle, DocGenError> {
        let request_id = match &request.request_id {
            Some(id) => validate_request_id(id)?.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let assembled =
            self.assembler
                .assemble(&request.template, &request.context, &request.signers)?;
        let base = format!("{}_{}", assembled.template.stem(), request_id);
        let mut written = WrittenFiles::default();
        let docx_path = request.out_dir.join(format!("{base}.docx"));
        if let Err(err) = written
            .create_dir(&request.out_dir)
            .and_then(|()| written.write(&docx_path, &assembled.bytes))
        {
            written.remove_all();
            return Err(err.into());
        }
        log::info!("request {request_id}: document written to {}", docx_path.display());

        let mut warnings = Vec::new();
        let pdf_path = request.out_dir.join(format!("{base}.pdf"));
        let pdf = match self.convert(&docx_path, &pdf_path) {
            Ok(bytes) => {
                written.track(&pdf_path);
                Some(BundleArtifact::new(
                    format!("{base}.pdf"),
                    Some(pdf_path),
                    bytes,
                ))
            }
            Err(err) => {
                log::warn!("request {request_id}: PDF not included: {err}");
                let _ = fs::remove_file(&pdf_path);
                warnings.push(GenerationWarning::new(
                    WarningCode::ConversionFailed,
                    format!("PDF not included: {err}"),
                ));
                None
            }
        };

        let document = BundleArtifact::new(
            format!("{base}.docx"),
            Some(docx_path),
            assembled.bytes,
        );
        let outcome = snapshot(&assembled.context).and_then(|context_snapshot| {
            let archive_bytes = archive(&document, pdf.as_ref(), &context_snapshot)?;
            let archive_path = request.out_dir.join(format!("{base}.zip"));
            written
                .write(&archive_path, &archive_bytes)
                .map_err(|err| DocGenError::BundleAssemblyFailure(err.to_string()))?;
            Ok((
                context_snapshot,
                BundleArtifact::new(format!("{base}.zip"), Some(archive_path), archive_bytes),
            ))
        });
        let (context_snapshot, archive) = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                written.remove_all();
                return Err(err);
            }
        };

        log::info!(
            "request {request_id}: bundle {} ({} member(s), {} warning(s))",
            archive.name,
            if pdf.is_some() { 3 } else { 2 },
            warnings.len()
        );
        Ok(GeneratedBundle {
            request_id,
            document,
            pdf,
            context_snapshot,
            archive,
            report: assembled.report,
            warnings,
        })
    }

    fn convert(&self, source: &Path, destination: &Path) -> Result<Vec<u8>, DocGenError> {
        let Some(converter) = self.converter else {
            return Err(DocGenError::ConversionFailure(
                "no converter configured".to_string(),
            ));
        };
        converter.convert(source, destination)?;
        fs::read(destination).map_err(|err| {
            DocGenError::ConversionFailure(format!(
                "converted file {} unreadable: {err}",
                destination.display()
            ))
        })
    }
}

#[derive(Default)]
struct WrittenFiles {
    paths: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl WrittenFiles {
    // Records only the directories this call creates, outermost first.
    fn create_dir(&mut self, dir: &Path) -> std::io::Result<()> {
        let mut missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();
        self.dirs.extend(missing);
        fs::create_dir_all(dir)
    }

    fn write(&mut self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        self.track(path);
        fs::write(path, bytes)
    }

    fn track(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
    }

    fn remove_all(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {err}", path.display());
                }
            }
        }
        while let Some(dir) = self.dirs.pop() {
            let _ = fs::remove_dir(&dir);
        }
    }
}

fn snapshot(context: &TemplateContext) -> Result<BundleArtifact, DocGenError> {
    let json = context
        .to_json_pretty()
        .map_err(|err| DocGenError::BundleAssemblyFailure(format!("context snapshot: {err}")))?;
    Ok(BundleArtifact::new(
        CONTEXT_SNAPSHOT_NAME.to_string(),
        None,
        json.into_bytes(),
    ))
}

fn archive(
    document: &BundleArtifact,
    pdf: Option<&BundleArtifact>,
    context_snapshot: &BundleArtifact,
) -> Result<Vec<u8>, DocGenError> {
    let fail = |err: &dyn std::fmt::Display| DocGenError::BundleAssemblyFailure(err.to_string());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for member in std::iter::once(document)
        .chain(pdf)
        .chain(std::iter::once(context_snapshot))
    {
        writer
            .start_file(member.name.as_str(), options)
            .map_err(|e| fail(&e))?;
        writer.write_all(&member.bytes).map_err(|e| fail(&e))?;
    }
    let cursor = writer.finish().map_err(|e| fail(&e))?;
    Ok(cursor.into_inner())
}

fn validate_request_id(id: &str) -> Result<&str, DocGenError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(id)
    } else {
        Err(DocGenError::InvalidConfiguration(format!(
            "request id {id:?} must be non-empty ASCII letters, digits, '-' or '_'"
        )))
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
