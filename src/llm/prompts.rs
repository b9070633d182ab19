//! LLM prompts for TOC extraction.
//!
//! Every prompt demands strict JSON output and carries the literal word
//! "json" so providers with strict JSON modes accept the request.

/// Collection of prompts used across the pipeline phases.
pub struct Prompts;

impl Prompts {
    /// Transform a printed table of contents into structured JSON.
    pub fn toc_transformer() -> &'static str {
        r#"You are given the text of a table of contents. Your job is to transform the whole table of contents into a json array.

structure is the numeric system which represents the index of the hierarchy section in the table of contents. For example, the first section has structure index 1, the first subsection has structure index 1.1, the second subsection has structure index 1.2, etc. If no numbering is visible, assign structure indices yourself so the sequence is strictly increasing in pre-order.

The response should be in the following JSON format:
[
    {
        "structure": <structure index, "x.x.x"> (string),
        "title": <title of the section, keep the original title>,
        "page": <page number printed next to the title, or null>
    },
    ...
]
You should transform the full table of contents in one go.
Directly return the final JSON structure. Do not output anything else."#
    }

    /// Continue transforming a chunked table of contents.
    ///
    /// The tail of the previous chunk's output seeds the next chunk so
    /// structure indices continue monotonically across the split.
    pub fn toc_transformer_continue() -> &'static str {
        r#"You are given the next part of a table of contents, together with the last few entries already transformed from the previous part. Continue transforming into the same json array format.

structure is the numeric system which represents the index of the hierarchy section ("x.x.x"). Continue the numbering from the previous entries so the whole sequence stays strictly increasing in pre-order. Do not repeat entries that already appear in the previous result.

The response should be in the following JSON format:
[
    {
        "structure": <structure index, "x.x.x"> (string),
        "title": <title of the section, keep the original title>,
        "page": <page number printed next to the title, or null>
    },
    ...
]
Directly return only the additional entries as a JSON array. Do not output anything else."#
    }

    /// Generate structure from raw document text (first segment).
    pub fn generate_structure_init() -> &'static str {
        r#"You are an expert in extracting hierarchical tree structure. Your task is to generate the table of contents of the given document part as a json array.

The structure variable is the numeric system which represents the index of the hierarchy section ("x.x.x"). The first section has structure index 1, its first subsection 1.1, and so on.

For the title, extract the original heading text, only fixing space inconsistency.

The provided text contains tags like <physical_index_X> and </physical_index_X> to indicate the start and end of page X. For physical_index, report the page the section heading starts on. Keep the <physical_index_X> format.

The response should be in the following JSON format:
[
    {
        "structure": <structure index, "x.x.x"> (string),
        "title": <title of the section, keep the original title>,
        "physical_index": "<physical_index_X> (keep the format)"
    },
    ...
]
Directly return the final JSON structure. Do not output anything else."#
    }

    /// Generate structure from raw document text (continuation segments).
    pub fn generate_structure_continue() -> &'static str {
        r#"You are an expert in extracting hierarchical tree structure. You are given the tail of the structure extracted from the previous document part and the text of the current part. Continue the structure to cover the current part, as a json array.

The structure variable is the numeric system which represents the index of the hierarchy section ("x.x.x"). Continue the numbering from the previous entries; do not restart from 1 and do not repeat entries already listed.

The provided text contains tags like <physical_index_X> and </physical_index_X> to indicate the start and end of page X. For physical_index, report the page the section heading starts on. Keep the <physical_index_X> format.

The response should be in the following JSON format:
[
    {
        "structure": <structure index, "x.x.x"> (string),
        "title": <title of the section, keep the original title>,
        "physical_index": "<physical_index_X> (keep the format)"
    },
    ...
]
Directly return only the additional entries as a JSON array. Do not output anything else."#
    }

    /// Check whether a section title appears (or starts) on a page.
    pub fn check_title_appearance() -> &'static str {
        r#"You are checking a table-of-contents entry against the text of one PDF page. Decide whether the section with the given title appears or starts somewhere on this page.

The page text comes from PDF extraction and may carry noise: broken hyphenation, odd spacing, running headers and footers. Match the title fuzzily; a header or footer mention alone does not count as the section starting here.

Section title: {title}

Page text:
{page_text}

Reply in the following JSON format:
{
    "thinking": <where on the page the section heading is, or why it is absent>,
    "answer": "<yes or no>"
}
Directly return the final JSON structure. Do not output anything else."#
    }

    /// Find the start page of one section within a small page window.
    pub fn single_item_index_fixer() -> &'static str {
        r#"You are given a section title and several pages of a document. Your job is to find the physical index of the page where this section starts.

The provided pages contain tags like <physical_index_X> and </physical_index_X> to indicate the physical location of page X.

The given section title is {title}.

Reply in the following JSON format:
{
    "thinking": <explain which page contains the start of this section>,
    "physical_index": "<physical_index_X>" (keep the format, or null if the section does not start in these pages)
}
Directly return the final JSON structure. Do not output anything else."#
    }

    /// Produce a short TOC for an uncovered page range (gap filling).
    pub fn gap_toc_generator() -> &'static str {
        r#"You are given a span of document pages that was not covered by the document's table of contents. Your task is to produce a short table of contents for just this span, as a json array.

The provided text contains tags like <physical_index_X> and </physical_index_X> to indicate the start and end of page X.

Use level 1 for the most prominent headings within the span, level 2 for their subsections, and so on. Report the physical page number each section starts on as an integer.

The response should be in the following JSON format:
[
    {
        "title": <title of the section>,
        "page": <physical page number the section starts on> (integer),
        "level": <1, 2, or 3> (integer)
    },
    ...
]
If the span contains no recognisable headings, return an empty JSON array [].
Directly return the final JSON structure. Do not output anything else."#
    }

    /// Generate a summary for one tree node.
    pub fn generate_node_summary() -> &'static str {
        r#"You are given one node of a PDF table-of-contents tree: a section title, the page range it spans, and the text extracted from those pages. Write a concise summary (2-3 sentences) of what the section covers.

Section title: {title}
Pages: {pages}

Extracted text:
{content}

Return ONLY the summary text, nothing else. Be concrete about the topics, data, and conclusions these pages contain, so a reader navigating the tree can decide whether this page range is worth opening."#
    }

    /// Sharpened instruction appended when a JSON response failed to parse.
    pub fn json_retry_suffix() -> &'static str {
        "\n\nYour previous response was not valid JSON. Respond again with ONLY the JSON value described above: no markdown fences, no commentary, no trailing text."
    }

    /// System prompt for all document-analysis calls.
    pub fn system_document_analyzer() -> &'static str {
        "You are an expert at reconstructing the section structure of PDF documents from extracted page text. Page boundaries are marked with <physical_index_X> and </physical_index_X> tags; treat every page reference as one of these physical indices, never a printed page number. Respond with valid JSON whenever the task asks for it."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_are_not_empty() {
        assert!(!Prompts::toc_transformer().is_empty());
        assert!(!Prompts::toc_transformer_continue().is_empty());
        assert!(!Prompts::generate_structure_init().is_empty());
        assert!(!Prompts::generate_structure_continue().is_empty());
        assert!(!Prompts::check_title_appearance().is_empty());
        assert!(!Prompts::single_item_index_fixer().is_empty());
        assert!(!Prompts::gap_toc_generator().is_empty());
        assert!(!Prompts::generate_node_summary().is_empty());
    }

    #[test]
    fn test_json_prompts_carry_the_json_token() {
        for prompt in [
            Prompts::toc_transformer(),
            Prompts::toc_transformer_continue(),
            Prompts::generate_structure_init(),
            Prompts::generate_structure_continue(),
            Prompts::check_title_appearance(),
            Prompts::single_item_index_fixer(),
            Prompts::gap_toc_generator(),
        ] {
            assert!(prompt.to_lowercase().contains("json"));
        }
    }
}
