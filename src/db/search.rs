//! Description search.
//!
//! Two tiers. A case-insensitive substring scan over every description runs
//! first; only when it finds nothing is the term tokenized and handed to the
//! FTS5 index, which catches stemmed and reordered matches.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use super::sqlite::{row_to_photo, Catalog, DISPLAY_ORDER, PHOTO_COLUMNS};
use super::Photo;
use crate::error::Result;

pub const HIGHLIGHT_OPEN: &str = "<mark>";
pub const HIGHLIGHT_CLOSE: &str = "</mark>";

/// Tokens of context FTS5 keeps around a match in a snippet.
const SNIPPET_TOKENS: i32 = 32;

const QUALIFIED_PHOTO_COLUMNS: &str = "p.id, p.file_path, p.taken_at, p.latitude, p.longitude, \
    p.description_ai, p.description_original, p.is_edited, p.status, p.created_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub photo: Photo,
    /// Description with matches wrapped in [`HIGHLIGHT_OPEN`]/[`HIGHLIGHT_CLOSE`].
    pub highlighted: Option<String>,
}

/// Replace the index entry for `photo_id`. Blank text leaves no entry.
///
/// Callers pass the transaction that changed `description_ai` so both land
/// together.
pub fn upsert(conn: &Connection, photo_id: i64, text: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM photos_fts WHERE photo_id = ?", [photo_id])?;
    if !text.trim().is_empty() {
        conn.execute(
            "INSERT INTO photos_fts (photo_id, description) VALUES (?, ?)",
            rusqlite::params![photo_id, text],
        )?;
    }
    Ok(())
}

impl Catalog {
    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(self
                .list()?
                .into_iter()
                .map(|photo| SearchHit {
                    highlighted: photo.description_ai.clone(),
                    photo,
                })
                .collect());
        }

        let hits = self.substring_search(term)?;
        if !hits.is_empty() {
            debug!(term, hits = hits.len(), "Substring search matched");
            return Ok(hits);
        }

        let hits = self.fts_search(term)?;
        debug!(term, hits = hits.len(), "Full-text search fallback");
        Ok(hits)
    }

    fn substring_search(&self, term: &str) -> Result<Vec<SearchHit>> {
        let needle: Vec<char> = term.chars().collect();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM photos WHERE description_ai IS NOT NULL ORDER BY {}",
            PHOTO_COLUMNS, DISPLAY_ORDER
        ))?;
        let photos = stmt
            .query_map([], |row| row_to_photo(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let hits = photos
            .into_iter()
            .filter_map(|photo| {
                let highlighted = highlight(photo.description_ai.as_deref()?, &needle)?;
                Some(SearchHit {
                    photo,
                    highlighted: Some(highlighted),
                })
            })
            .collect();
        Ok(hits)
    }

    fn fts_search(&self, term: &str) -> Result<Vec<SearchHit>> {
        let Some(query) = fts_query(term) else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}, snippet(photos_fts, 1, '{}', '{}', '…', {})
            FROM photos_fts
            JOIN photos p ON p.id = photos_fts.photo_id
            WHERE photos_fts MATCH ?
            ORDER BY rank
            "#,
            QUALIFIED_PHOTO_COLUMNS, HIGHLIGHT_OPEN, HIGHLIGHT_CLOSE, SNIPPET_TOKENS
        ))?;
        let hits = stmt
            .query_map([query], |row| {
                Ok(SearchHit {
                    photo: row_to_photo(row, 0)?,
                    highlighted: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }
}

/// Turn user input into an FTS5 query of quoted tokens, so nothing the user
/// types is read as query syntax. `None` when the input has no tokens.
fn fts_query(term: &str) -> Option<String> {
    let tokens: Vec<String> = term
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Wrap every non-overlapping case-insensitive occurrence of `needle` in
/// `text`, keeping the original casing. `None` if there is no occurrence.
fn highlight(text: &str, needle: &[char]) -> Option<String> {
    if needle.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut found = false;
    let mut pos = 0;
    while pos < text.len() {
        if let Some(len) = match_len_at(&text[pos..], needle) {
            out.push_str(HIGHLIGHT_OPEN);
            out.push_str(&text[pos..pos + len]);
            out.push_str(HIGHLIGHT_CLOSE);
            pos += len;
            found = true;
        } else {
            // pos is always on a char boundary
            let c = text[pos..].chars().next()?;
            out.push(c);
            pos += c.len_utf8();
        }
    }

    found.then_some(out)
}

/// Byte length of the prefix of `haystack` matching `needle`, char by char.
fn match_len_at(haystack: &str, needle: &[char]) -> Option<usize> {
    let mut chars = haystack.chars();
    let mut len = 0;
    for &n in needle {
        let h = chars.next()?;
        if !h.to_lowercase().eq(n.to_lowercase()) {
            return None;
        }
        len += h.len_utf8();
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn described(descriptions: &[&str]) -> (Catalog, Vec<i64>) {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for (i, text) in descriptions.iter().enumerate() {
            let (id, _) = catalog
                .create_or_get(&format!("/p/{}.jpg", i), "2024-01-01T00:00:00", None)
                .unwrap();
            catalog.commit_description(id, text).unwrap();
            ids.push(id);
        }
        (catalog, ids)
    }

    fn hit_ids(hits: &[SearchHit]) -> Vec<i64> {
        hits.iter().map(|h| h.photo.id).collect()
    }

    #[test]
    fn test_highlight_preserves_casing() {
        let needle: Vec<char> = "dog".chars().collect();
        assert_eq!(
            highlight("Dog chases a DOG", &needle).as_deref(),
            Some("<mark>Dog</mark> chases a <mark>DOG</mark>")
        );
        assert!(highlight("a cat", &needle).is_none());
        assert!(highlight("anything", &[]).is_none());
    }

    #[test]
    fn test_highlight_folds_non_ascii() {
        let needle: Vec<char> = "école".chars().collect();
        assert_eq!(
            highlight("Une ÉCOLE rurale", &needle).as_deref(),
            Some("Une <mark>ÉCOLE</mark> rurale")
        );
    }

    #[test]
    fn test_fts_query_quotes_tokens() {
        assert_eq!(fts_query("cat sleep").as_deref(), Some("\"cat\" \"sleep\""));
        assert_eq!(fts_query("\"NEAR(a\" OR *").as_deref(), Some("\"NEAR\" \"a\" \"OR\""));
        assert!(fts_query("  *** ").is_none());
    }

    #[test]
    fn test_substring_tier_is_newest_first() {
        let (catalog, ids) = described(&["a red bicycle", "bicycles in a rack", "a boat"]);
        let hits = catalog.search("BICYCLE").unwrap();
        assert_eq!(hit_ids(&hits), vec![ids[1], ids[0]]);
        assert_eq!(hits[1].highlighted.as_deref(), Some("a red <mark>bicycle</mark>"));
    }

    #[test]
    fn test_substring_tier_covers_tokenizer_split_terms() {
        // "e-bike" tokenizes into "e" and "bike"; the substring tier still finds it.
        let (catalog, ids) = described(&["an e-bike leaning on a wall", "a bike and an e-reader"]);
        let hits = catalog.search("e-bike").unwrap();
        assert_eq!(hit_ids(&hits), vec![ids[0]]);
        assert_eq!(
            hits[0].highlighted.as_deref(),
            Some("an <mark>e-bike</mark> leaning on a wall")
        );
    }

    #[test]
    fn test_fts_tier_matches_stemmed_words() {
        let (catalog, ids) = described(&["the cats are sleeping on the porch", "a dog running"]);
        let hits = catalog.search("cat sleep").unwrap();
        assert_eq!(hit_ids(&hits), vec![ids[0]]);
        let snippet = hits[0].highlighted.as_deref().unwrap();
        assert!(snippet.contains("<mark>cats</mark>"));
        assert!(snippet.contains("<mark>sleeping</mark>"));
    }

    #[test]
    fn test_query_syntax_is_never_an_error() {
        let (catalog, _) = described(&["a lighthouse"]);
        for term in ["\"", "AND", "lighthouse OR", "(", "*", "NEAR(x y)", "col:val", "^"] {
            assert!(catalog.search(term).is_ok(), "term {:?}", term);
        }
    }

    #[test]
    fn test_blank_term_lists_everything() {
        let (mut catalog, ids) = described(&["first", "second"]);
        let (pending, _) = catalog.create_or_get("/p/new.jpg", "2024-01-01T00:00:00", None).unwrap();

        let hits = catalog.search("   ").unwrap();
        assert_eq!(hit_ids(&hits), vec![pending, ids[1], ids[0]]);
        assert_eq!(hits[0].highlighted, None);
        assert_eq!(hits[1].highlighted.as_deref(), Some("second"));

        catalog.update_description_edit(ids[0], "changed").unwrap();
        let hits = catalog.search("").unwrap();
        assert_eq!(hits[2].highlighted.as_deref(), Some("changed"));
    }

    #[test]
    fn test_search_follows_edits_and_restores() {
        let (mut catalog, ids) = described(&["a harbour at sunrise"]);
        catalog.update_description_edit(ids[0], "grandpa's fishing boat").unwrap();

        assert!(catalog.search("harbour").unwrap().is_empty());
        assert_eq!(hit_ids(&catalog.search("fishing").unwrap()), vec![ids[0]]);
        assert_eq!(hit_ids(&catalog.search("fish boat").unwrap()), vec![ids[0]]);

        catalog.restore_original(ids[0]).unwrap();
        assert!(catalog.search("fish boat").unwrap().is_empty());
        assert_eq!(hit_ids(&catalog.search("sunrise").unwrap()), vec![ids[0]]);
    }

    #[test]
    fn test_index_holds_exactly_the_described_rows() {
        let (catalog, ids) = described(&["one", "two"]);
        catalog.create_or_get("/p/undescribed.jpg", "2024-01-01T00:00:00", None).unwrap();

        let mut indexed: Vec<i64> = catalog
            .conn
            .prepare("SELECT photo_id FROM photos_fts ORDER BY photo_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        indexed.sort();
        assert_eq!(indexed, ids);
    }

    #[test]
    fn test_upsert_with_blank_text_removes_entry() {
        let (catalog, ids) = described(&["a lighthouse"]);
        upsert(&catalog.conn, ids[0], "  ").unwrap();
        let count: i64 = catalog
            .conn
            .query_row("SELECT COUNT(*) FROM photos_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
