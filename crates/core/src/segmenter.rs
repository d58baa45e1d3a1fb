use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{ChainLink, ChainViolation, Segment, SegmentId, SegmentationOptions};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

const SEPARATOR: &str = "\n\n";

/// Provenance shared by every segment of one source document.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub source_path: String,
    pub source_filename: String,
    pub document_date: NaiveDate,
}

pub struct Segmenter {
    options: SegmentationOptions,
    heading_re: Regex,
}

impl Segmenter {
    pub fn new(options: SegmentationOptions) -> Result<Self, IngestError> {
        if options.heading_max_chars == 0 {
            return Err(IngestError::InvalidSegmentConfig(
                "heading_max_chars must be positive".to_string(),
            ));
        }
        let heading_re = Regex::new(options.heading_regex)?;
        Ok(Self {
            options,
            heading_re,
        })
    }

    pub fn is_heading(&self, chunk: &str) -> bool {
        let trimmed = chunk.trim();
        trimmed.chars().count() <= self.options.heading_max_chars
            && self.heading_re.is_match(trimmed)
    }

    /// Blank-line separated chunks of a normalized page above the size floor.
    pub fn split_chunks(&self, normalized: &str) -> Vec<String> {
        normalized
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|chunk| chunk.chars().count() > self.options.min_chars_per_segment)
            .map(str::to_string)
            .collect()
    }

    /// Turns one document's pages into chained segments.
    ///
    /// Headings are held back and prefixed onto the next body chunk. A page
    /// whose first chunk continues a numbered item from the previous page is
    /// folded into that segment. Links are threaded in a final pass so the
    /// chain has no dangling ends regardless of what got merged or absorbed.
    pub fn segment_document(&self, source: &DocumentSource, pages: &[PageText]) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut pending_heading = String::new();

        for (page_index, page) in pages.iter().enumerate() {
            let normalized = normalize_page(&page.text, self.options.page_marker);
            let chunks = self.split_chunks(&normalized);

            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                if chunk_index == 0 && page_index > 0 {
                    if let Some(last) = segments.last_mut() {
                        if starts_with_digit(&last.text) && !starts_with_digit(&chunk) {
                            last.text.push_str(SEPARATOR);
                            last.text.push_str(&chunk);
                            last.page.push_str(&format!(" und {}", page.number));
                            continue;
                        }
                    }
                }

                if self.is_heading(&chunk) {
                    if !pending_heading.is_empty() {
                        pending_heading.push_str(SEPARATOR);
                    }
                    pending_heading.push_str(&chunk);
                    continue;
                }

                let text = if pending_heading.is_empty() {
                    chunk
                } else {
                    let heading = std::mem::take(&mut pending_heading);
                    format!("{heading}{SEPARATOR}{chunk}")
                };

                segments.push(new_segment(source, page.number, text));
            }
        }

        if !pending_heading.is_empty() && !segments.is_empty() {
            // A heading with nothing after it stays retrievable on its own.
            let page = pages.last().map(|page| page.number).unwrap_or(1);
            segments.push(new_segment(source, page, pending_heading));
        }

        link_chain(&mut segments);
        segments
    }
}

fn new_segment(source: &DocumentSource, page: u32, text: String) -> Segment {
    Segment {
        id: SegmentId::generate(),
        text,
        source_path: source.source_path.clone(),
        source_filename: source.source_filename.clone(),
        page: page.to_string(),
        document_date: source.document_date,
        previous_id: None,
        next_id: None,
        embedding: Vec::new(),
    }
}

fn link_chain(segments: &mut [Segment]) {
    let ids: Vec<SegmentId> = segments.iter().map(|segment| segment.id).collect();
    for (position, segment) in segments.iter_mut().enumerate() {
        segment.previous_id = position.checked_sub(1).map(|prev| ids[prev]);
        segment.next_id = ids.get(position + 1).copied();
    }
}

/// Drops a leading page-number line and collapses runs of spaces and tabs.
///
/// Newlines survive so blank-line boundaries can still split the page.
pub fn normalize_page(text: &str, page_marker: &str) -> String {
    let mut text = text.trim();
    if text.starts_with(page_marker) {
        if let Some(newline) = text.find('\n') {
            text = text[newline + 1..].trim();
        }
    }

    let mut collapsed = String::with_capacity(text.len());
    let mut previous_blank = false;
    for ch in text.chars() {
        let blank = ch == ' ' || ch == '\t' || ch == '\u{a0}';
        if blank {
            if !previous_blank {
                collapsed.push(' ');
            }
        } else {
            collapsed.push(ch);
        }
        previous_blank = blank;
    }

    collapsed.trim().to_string()
}

pub fn starts_with_digit(text: &str) -> bool {
    text.chars().next().is_some_and(|ch| ch.is_ascii_digit())
}

/// Reports every `previous_id`/`next_id` that points outside the build.
pub fn verify_segment_links(segments: &[Segment]) -> Vec<ChainViolation> {
    let ids: HashSet<SegmentId> = segments.iter().map(|segment| segment.id).collect();
    let mut violations = Vec::new();

    for link in [ChainLink::Next, ChainLink::Previous] {
        for segment in segments {
            let target = match link {
                ChainLink::Next => segment.next_id,
                ChainLink::Previous => segment.previous_id,
            };
            if let Some(missing_id) = target.filter(|id| !ids.contains(id)) {
                warn!(
                    segment_id = %segment.id,
                    ?link,
                    %missing_id,
                    page = %segment.page,
                    filename = %segment.source_filename,
                    "segment points to a non-existent neighbour"
                );
                violations.push(ChainViolation {
                    segment_id: segment.id,
                    link,
                    missing_id,
                    page: segment.page.clone(),
                    filename: segment.source_filename.clone(),
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source() -> DocumentSource {
        DocumentSource {
            source_path: "/data/pdfs/BMF_2023_10_05.pdf".to_string(),
            source_filename: "BMF_2023_10_05.pdf".to_string(),
            document_date: NaiveDate::from_ymd_opt(2023, 10, 5).expect("valid date"),
        }
    }

    fn pages(texts: &[&str]) -> Vec<PageText> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| PageText {
                number: index as u32 + 1,
                text: text.to_string(),
            })
            .collect()
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(SegmentationOptions::default()).expect("default options are valid")
    }

    fn assert_single_chain(segments: &[Segment]) {
        let heads: Vec<_> = segments.iter().filter(|s| s.previous_id.is_none()).collect();
        let tails: Vec<_> = segments.iter().filter(|s| s.next_id.is_none()).collect();
        assert_eq!(heads.len(), 1);
        assert_eq!(tails.len(), 1);

        let by_id: HashMap<_, _> = segments.iter().map(|s| (s.id, s)).collect();
        let mut visited = HashSet::new();
        let mut cursor = Some(heads[0]);
        while let Some(segment) = cursor {
            assert!(visited.insert(segment.id), "chain contains a cycle");
            cursor = segment.next_id.map(|id| by_id[&id]);
        }
        assert_eq!(visited.len(), segments.len());
    }

    #[test]
    fn page_marker_line_and_double_spaces_are_removed() {
        let normalized = normalize_page("  Seite 3 von 10\nDer   Grundfreibetrag\n\nbeträgt  viel ", "Seite");
        assert_eq!(normalized, "Der Grundfreibetrag\n\nbeträgt viel");
    }

    #[test]
    fn page_marker_without_newline_is_kept() {
        assert_eq!(normalize_page("Seite 3", "Seite"), "Seite 3");
    }

    #[test]
    fn heading_pattern_matches_enumerations() {
        let segmenter = segmenter();
        assert!(segmenter.is_heading("1."));
        assert!(segmenter.is_heading("5. Altersvorsorge"));
        assert!(segmenter.is_heading("b) Direktversicherung"));
        assert!(segmenter.is_heading("398)"));
        assert!(!segmenter.is_heading("Grundzulage"));
        assert!(!segmenter.is_heading("1.2 Zulage"));
        assert!(!segmenter.is_heading(&format!("1. {}", "x".repeat(120))));
    }

    #[test]
    fn short_chunks_are_dropped() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&["abc\n\nDie Grundzulage beträgt 175 Euro.\n\n12345"]),
        );
        assert_eq!(segments.len(), 1);
        assert!(segments
            .iter()
            .all(|segment| segment.text.chars().count() > 5));
    }

    #[test]
    fn headings_are_prefixed_onto_the_next_chunk() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&["1. Allgemeines\n\na) Zulage\n\nDie Grundzulage beträgt 175 Euro."]),
        );
        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].text,
            "1. Allgemeines\n\na) Zulage\n\nDie Grundzulage beträgt 175 Euro."
        );
    }

    #[test]
    fn continuation_chunk_is_merged_across_pages() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&[
                "Einleitung zum Schreiben.\n\n12 Die Leistungen aus einer Direktzusage werden",
                "als Einkünfte aus nichtselbständiger Arbeit besteuert.\n\n13 Weitere Randnummer folgt.",
            ]),
        );

        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[1].text,
            "12 Die Leistungen aus einer Direktzusage werden\n\nals Einkünfte aus nichtselbständiger Arbeit besteuert."
        );
        assert_eq!(segments[1].page, "1 und 2");
        assert_eq!(segments[2].page, "2");
        assert_single_chain(&segments);
    }

    #[test]
    fn continuation_extends_page_label_for_every_page() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&["7 Randnummer beginnt", "und geht weiter", "und endet hier"]),
        );
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].page, "1 und 2 und 3");
    }

    #[test]
    fn first_page_never_continues_a_previous_document() {
        let segmenter = segmenter();
        let first = segmenter.segment_document(&source(), &pages(&["1 Nummerierter Absatz"]));
        let second = segmenter.segment_document(&source(), &pages(&["Neues Dokument ohne Nummer"]));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].text, "Neues Dokument ohne Nummer");
    }

    #[test]
    fn chain_is_a_single_path_over_many_pages() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&[
                "Seite 1\n1. Einleitung\n\nA erster Absatz hier.\n\nB zweiter Absatz hier.",
                "Seite 2\nC dritter Absatz hier.\n\nD vierter Absatz hier.",
                "Seite 3\n3. Schluss",
            ]),
        );
        assert_eq!(segments.len(), 5);
        assert_single_chain(&segments);
        assert!(verify_segment_links(&segments).is_empty());
    }

    #[test]
    fn trailing_heading_becomes_final_segment() {
        let segments = segmenter().segment_document(
            &source(),
            &pages(&["Die Grundzulage beträgt 175 Euro.", "Seite 2\n4. Anhang"]),
        );
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].text, "4. Anhang");
        assert_eq!(segments[1].page, "2");
        assert_eq!(segments[0].next_id, Some(segments[1].id));
        assert_eq!(segments[1].next_id, None);
    }

    #[test]
    fn document_without_body_yields_no_segments() {
        let segments = segmenter().segment_document(&source(), &pages(&["abc\n\nxy", ""]));
        assert!(segments.is_empty());
    }

    #[test]
    fn heading_only_document_yields_no_segments() {
        let segments =
            segmenter().segment_document(&source(), &pages(&["1. Allgemeines\n\na) Zulage"]));
        assert!(segments.is_empty());
    }

    #[test]
    fn dangling_links_are_reported_not_fatal() {
        let mut segments = segmenter().segment_document(
            &source(),
            &pages(&["Erster Absatz hier.\n\nZweiter Absatz hier."]),
        );
        let ghost = SegmentId::generate();
        segments[1].next_id = Some(ghost);

        let violations = verify_segment_links(&segments);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].segment_id, segments[1].id);
        assert_eq!(violations[0].link, ChainLink::Next);
        assert_eq!(violations[0].missing_id, ghost);
        assert_eq!(violations[0].filename, "BMF_2023_10_05.pdf");
    }
}
