use crate::extractor::PdfExtractor;
use crate::models::{ChainViolation, DocumentManifest, Segment};
use crate::segmenter::{verify_segment_links, DocumentSource, Segmenter};
use crate::IngestError;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Date encoded as the last three `_`-separated parts of the file stem, as in
/// `BMF_2023_10_05.pdf`.
pub fn document_date_from_filename(filename: &str) -> Result<NaiveDate, IngestError> {
    let invalid = || IngestError::InvalidDocumentDate(filename.to_string());
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(invalid)?;

    let mut parts = stem.rsplitn(4, '_');
    let day = parts.next().ok_or_else(invalid)?;
    let month = parts.next().ok_or_else(invalid)?;
    let year = parts.next().ok_or_else(invalid)?;
    if parts.next().is_none() {
        return Err(invalid());
    }

    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct CorpusBuild {
    pub segments: Vec<Segment>,
    pub documents: Vec<DocumentManifest>,
    pub chain_violations: Vec<ChainViolation>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Segments every PDF under `folder` into one chained build.
///
/// A file name without a date aborts the build before any PDF is read.
/// Unreadable PDFs are skipped and reported; dangling chain links are
/// reported but kept.
pub fn build_corpus(
    folder: &Path,
    extractor: &dyn PdfExtractor,
    segmenter: &Segmenter,
) -> Result<CorpusBuild, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let sources = files
        .iter()
        .map(|path| document_source(path))
        .collect::<Result<Vec<_>, IngestError>>()?;

    let mut segments = Vec::new();
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for (path, source) in files.into_iter().zip(sources) {
        info!(file = %source.source_filename, "processing");
        let build_result = (|| {
            let checksum = digest_file(&path)?;
            let pages = extractor.extract_pages(&path)?;
            Ok::<_, IngestError>((checksum, pages))
        })();

        match build_result {
            Ok((checksum, pages)) => {
                let document_segments = segmenter.segment_document(&source, &pages);
                documents.push(DocumentManifest {
                    filename: source.source_filename.clone(),
                    source_path: source.source_path.clone(),
                    document_date: source.document_date,
                    checksum,
                    page_count: pages.len(),
                    segment_count: document_segments.len(),
                });
                segments.extend(document_segments);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipped pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    let chain_violations = verify_segment_links(&segments);
    if chain_violations.is_empty() {
        info!(
            segments = segments.len(),
            documents = documents.len(),
            "all segment connections are valid"
        );
    } else {
        warn!(violations = chain_violations.len(), "segment chain has dangling links");
    }

    Ok(CorpusBuild {
        segments,
        documents,
        chain_violations,
        skipped_files,
    })
}

fn document_source(path: &Path) -> Result<DocumentSource, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    Ok(DocumentSource {
        source_path: path.to_string_lossy().to_string(),
        source_filename: filename.to_string(),
        document_date: document_date_from_filename(filename)?,
    })
}
