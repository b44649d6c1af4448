//! Prompts for per-page extraction and document-level post-processing.

/// Cleans up raw PDF text using the page image as ground truth.
/// Placeholders: `{text}`.
pub const PROCESS_EXTRACTED_TEXT_PROMPT: &str = r#"You are given the raw text extracted from one page of a PDF document, along with an image of that page. The raw extraction may contain broken lines, duplicated fragments, header/footer noise, and mis-ordered columns.

Reconstruct the page text faithfully:
1. Use the page image to restore the correct reading order.
2. Repair hyphenated line breaks and merge fragmented sentences.
3. Drop repeated headers, footers, and page numbers.
4. Preserve every fact, number, and label; do not summarize and do not invent content.
5. Output clean plain text only, with paragraphs separated by blank lines.

Raw extracted text:
{text}"#;

/// Detects and describes embedded visuals on a page image.
/// The response must conform to the detected-visuals structured schema.
pub const IMAGE_DESCRIPTION_PROMPT: &str = r#"Examine the attached page image and identify every embedded visual element: graphs, photos, diagrams, icons, screenshots, and similar figures. Ignore plain text blocks and tables.

For each detected visual, report:
- visual_description: what the visual literally shows, including axis labels, legends, and captions where readable.
- contextual_relevance: how the visual relates to the surrounding page content.
- analysis: the key takeaway a reader should extract from the visual.
- visual_type: the best-fitting category for the visual.

If the page contains no qualifying visuals, return an empty list."#;

/// Detects embedded tables and re-renders them as Markdown.
/// The response must conform to the detected-tables structured schema.
pub const TABLE_DESCRIPTION_PROMPT: &str = r#"Examine the attached page image and identify every table on the page.

For each detected table, report:
- markdown: the complete table reproduced as GitHub-flavored Markdown, preserving all headers, rows, cells, and units.
- contextual_relevance: how the table relates to the surrounding page content.
- analysis: the most important patterns or values in the table.

Reproduce cell contents exactly; do not round numbers or drop columns. If the page contains no tables, return an empty list."#;

/// Condenses a full document while retaining all substantive facts.
/// Placeholders: `{document}`.
pub const DOCUMENT_CONDENSATION_PROMPT: &str = r#"Condense the following document into a compact version that retains every substantive fact, figure, definition, and conclusion while removing repetition, boilerplate, and filler. Keep the original section structure where it helps navigation. Output Markdown.

Document:
{document}"#;

/// Generates a table of contents for a processed document.
/// Placeholders: `{document}`.
pub const TABLE_OF_CONTENTS_PROMPT: &str = r#"Produce a hierarchical table of contents for the following document. Use Markdown list nesting to reflect the section structure, and annotate each entry with the page marker (for example "Page 3") where the section begins, based on the page separators present in the text.

Document:
{document}"#;

/// Translates text into a target language.
/// Placeholders: `{text}`, `{target_language}`.
pub const TRANSLATE_TEXT_PROMPT: &str = r#"Translate the following text into {target_language}. Preserve the Markdown structure, tables, numbers, and proper nouns. Output only the translated text.

Text:
{text}"#;

/// Wraps a user-supplied per-page instruction with the page context.
/// Placeholders: `{page_text}`, `{custom_instructions}`.
pub const CUSTOM_PAGE_PROCESSING_PROMPT: &str = r#"You are processing one page of a larger document. Apply the instructions below to this page only.

Instructions:
{custom_instructions}

Page content:
{page_text}"#;

/// Wraps a user-supplied document-level instruction with the full text.
/// Placeholders: `{document_text}`, `{custom_instructions}`.
pub const CUSTOM_DOCUMENT_PROCESSING_PROMPT: &str = r#"You are processing a complete document. Apply the instructions below to the document as a whole.

Instructions:
{custom_instructions}

Document content:
{document_text}"#;
