use crate::error::IndexError;
use crate::models::{Chunk, PageRange};
use regex::Regex;

const PAGE_MARKER_PATTERN: &str = r"^Page\s+(\d+)$";

/// One page as delimited by `Page N` marker lines, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub number: u32,
    pub text: String,
    pub word_count: usize,
}

/// A chunk candidate: one page, or several undersized pages merged forward.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpan {
    pub page_num: u32,
    pub page_range: PageRange,
    pub text: String,
    pub word_count: usize,
}

impl PageSpan {
    pub fn is_merged(&self) -> bool {
        self.page_range.is_merged()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits text at standalone `Page N` lines. The marker line stays part of its
/// page. Content before the first marker is dropped, and a marker whose number
/// does not exceed the current page is kept as ordinary page content.
pub fn split_raw_pages(content: &str) -> Result<Vec<RawPage>, IndexError> {
    let marker = Regex::new(PAGE_MARKER_PATTERN)?;

    let mut pages = Vec::new();
    let mut current: Option<(u32, Vec<&str>)> = None;

    for line in content.lines() {
        let number = marker
            .captures(line.trim())
            .and_then(|capture| capture.get(1))
            .and_then(|digits| digits.as_str().parse::<u32>().ok())
            .filter(|number| *number > 0)
            .filter(|number| {
                current
                    .as_ref()
                    .map_or(true, |(current_number, _)| number > current_number)
            });

        if let Some(number) = number {
            if let Some((previous, lines)) = current.take() {
                pages.push(finish_page(previous, &lines));
            }
            current = Some((number, vec![line]));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((number, lines)) = current {
        pages.push(finish_page(number, &lines));
    }

    Ok(pages)
}

fn finish_page(number: u32, lines: &[&str]) -> RawPage {
    let text = lines.join("\n").trim().to_string();
    RawPage {
        number,
        word_count: word_count(&text),
        text,
    }
}

/// Pages below `min_words` absorb the following pages until the threshold is
/// met or pages run out, so only the final span can stay undersized.
pub fn merge_pages(raw_pages: Vec<RawPage>, min_words: usize) -> Vec<PageSpan> {
    let mut spans = Vec::new();
    let mut pages = raw_pages.into_iter().peekable();

    while let Some(page) = pages.next() {
        let mut span = PageSpan {
            page_num: page.number,
            page_range: PageRange::single(page.number),
            text: page.text,
            word_count: page.word_count,
        };

        while span.word_count < min_words {
            let Some(next) = pages.next() else {
                break;
            };
            span.text.push_str("\n\n");
            span.text.push_str(&next.text);
            span.word_count += next.word_count;
            span.page_range.push(next.number);
        }

        spans.push(span);
    }

    spans
}

pub fn segment(content: &str, min_words: usize) -> Result<Vec<PageSpan>, IndexError> {
    Ok(merge_pages(split_raw_pages(content)?, min_words))
}

/// Segments a document into indexed chunks. A document without page markers
/// is a segmentation failure rather than an empty result.
pub fn build_chunks(
    document_id: &str,
    content: &str,
    min_words: usize,
) -> Result<Vec<Chunk>, IndexError> {
    let spans = segment(content, min_words)?;
    if spans.is_empty() {
        return Err(IndexError::Segmentation {
            document_id: document_id.to_string(),
        });
    }

    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(chunk_idx, span)| Chunk {
            document_id: document_id.to_string(),
            chunk_idx,
            page_num: span.page_num,
            is_merged: span.is_merged(),
            page_range: span.page_range,
            text: span.text,
            word_count: span.word_count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn filler(words: usize) -> String {
        vec!["lorem"; words].join(" ")
    }

    #[test]
    fn short_first_page_merges_into_next() {
        let text = format!("Page 1\nShort.\nPage 2\n{}", filler(60));
        let chunks = build_chunks("doc", &text, 50).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_range.pages(), &[1, 2]);
        assert!(chunks[0].is_merged);
        assert_eq!(chunks[0].page_num, 1);
        assert_eq!(chunks[0].word_count, 3 + 62);
        assert!(chunks[0].text.contains("Short.\n\nPage 2"));
    }

    #[test]
    fn marker_line_is_page_content_and_preamble_is_dropped() {
        let text = "Title block\nPage 3\n  alpha beta\n";
        let pages = split_raw_pages(text).unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3\n  alpha beta");
        assert_eq!(pages[0].word_count, 4);
    }

    #[test]
    fn markers_tolerate_surrounding_whitespace_only() {
        let text = "  Page 1  \nbody\nSee Page 2 for details\nPage two\nPage 2\nmore";
        let pages = split_raw_pages(text).unwrap();

        assert_eq!(pages.iter().map(|p| p.number).collect::<Vec<_>>(), vec![1, 2]);
        assert!(pages[0].text.contains("See Page 2 for details"));
    }

    #[test]
    fn non_increasing_marker_stays_inside_current_page() {
        let text = "Page 4\nintro\nPage 4\nrepeated header\nPage 5\nnext";
        let pages = split_raw_pages(text).unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages[0].text.contains("repeated header"));
    }

    #[test]
    fn document_without_markers_fails_segmentation() {
        let result = build_chunks("empty", "no markers here\nat all", 50);
        assert!(matches!(
            result,
            Err(IndexError::Segmentation { ref document_id }) if document_id == "empty"
        ));
    }

    #[test]
    fn every_page_lands_in_exactly_one_chunk() {
        let mut text = String::new();
        let sizes = [3, 80, 10, 10, 10, 40, 2, 100, 1];
        for (offset, size) in sizes.iter().enumerate() {
            text.push_str(&format!("Page {}\n{}\n", offset + 1, filler(*size)));
        }

        let chunks = build_chunks("doc", &text, 50).unwrap();
        let covered: Vec<u32> = chunks
            .iter()
            .flat_map(|chunk| chunk.page_range.pages().to_vec())
            .collect();
        let unique: BTreeSet<u32> = covered.iter().copied().collect();

        assert_eq!(covered.len(), sizes.len());
        assert_eq!(unique, (1..=sizes.len() as u32).collect());

        for window in chunks.windows(2) {
            assert_eq!(window[1].chunk_idx, window[0].chunk_idx + 1);
            assert!(window[1].page_num > window[0].page_num);
        }

        let (last, rest) = chunks.split_last().unwrap();
        assert!(rest.iter().all(|chunk| chunk.word_count >= 50));
        assert_eq!(last.page_range.pages(), &[9]);
        assert!(!last.is_merged);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = format!("Page 1\n{}\nPage 2\nx\nPage 3\n{}", filler(5), filler(70));
        assert_eq!(segment(&text, 50).unwrap(), segment(&text, 50).unwrap());
    }
}
