//! Prompts for the retrieval layer.

/// Expands a user query into related search terms and adjacent topic areas.
/// Placeholders: `{query}`. The response must conform to the search-expansion
/// structured schema (`expanded_terms`, `related_areas`).
pub const SEARCH_EXPANSION_PROMPT: &str = r#"A user is searching a technical document collection with the query below. Broaden the net for retrieval.

Produce:
- expanded_terms: alternative phrasings, synonyms, and acronym expansions of the query itself.
- related_areas: adjacent topics a relevant document might discuss even if it never uses the query's wording.

Keep each entry short (at most six words) and concrete. Order both lists from most to least promising.

Query: {query}"#;
