use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Select-field values that mean "do not filter on this field"
const ANY_CHOICES: [&str; 3] = ["all", "any", "সব"];

/// One row of the song/poem metadata sheet
///
/// Every field apart from `id` is free text taken from the sheet; a missing
/// cell is stored as an empty string.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Song {
    /// 1-based position of the row in the source sheet
    pub id: usize,
    pub title: String,
    /// Thematic section (পর্যায়), e.g. পূজা, প্রেম, প্রকৃতি
    pub category: String,
    pub sub_category: String,
    pub raga: String,
    pub tala: String,
    /// Composition date as written in the sheet
    pub composed: String,
    /// Notation book reference (স্বরবিতান)
    pub notation: String,
    pub lyrics: String,
}

impl Song {
    fn searchable_fields(&self) -> [&str; 8] {
        [
            self.title.as_str(),
            self.category.as_str(),
            self.sub_category.as_str(),
            self.raga.as_str(),
            self.tala.as_str(),
            self.composed.as_str(),
            self.notation.as_str(),
            self.lyrics.as_str(),
        ]
    }

    /// First non-empty line of the lyrics, used on result cards
    pub fn first_line(&self) -> &str {
        self.lyrics
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// Filters coming from the search form
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub keyword: String,
    pub category: Option<String>,
    pub raga: Option<String>,
    pub tala: Option<String>,
}

impl SearchFilter {
    /// Filter on a keyword only
    pub fn keyword(keyword: impl Into<String>) -> Self {
        SearchFilter {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    /// True when no field narrows the result
    pub fn is_empty(&self) -> bool {
        self.terms().is_empty()
            && selected(&self.category).is_none()
            && selected(&self.raga).is_none()
            && selected(&self.tala).is_none()
    }

    fn terms(&self) -> Vec<String> {
        self.keyword
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }

    /// Whether `song` passes every active filter
    pub fn matches(&self, song: &Song) -> bool {
        self.matches_terms(song, &self.terms())
    }

    fn matches_terms(&self, song: &Song, terms: &[String]) -> bool {
        if !field_matches(&self.category, &song.category)
            || !field_matches(&self.raga, &song.raga)
            || !field_matches(&self.tala, &song.tala)
        {
            return false;
        }

        if terms.is_empty() {
            return true;
        }

        let haystacks: Vec<String> = song
            .searchable_fields()
            .iter()
            .map(|field| field.to_lowercase())
            .collect();

        terms
            .iter()
            .all(|term| haystacks.iter().any(|field| field.contains(term.as_str())))
    }
}

// The active value of a select field, if any
fn selected(choice: &Option<String>) -> Option<&str> {
    let value = choice.as_deref()?.trim();
    if value.is_empty() || ANY_CHOICES.iter().any(|any| value.eq_ignore_ascii_case(any)) {
        None
    } else {
        Some(value)
    }
}

fn field_matches(choice: &Option<String>, value: &str) -> bool {
    match selected(choice) {
        Some(wanted) => wanted.to_lowercase() == value.trim().to_lowercase(),
        None => true,
    }
}

/// The in-memory song table
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Catalog {
    songs: Vec<Song>,
}

impl Catalog {
    pub fn new(songs: Vec<Song>) -> Self {
        Catalog { songs }
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Song> {
        self.songs.iter().find(|song| song.id == id)
    }

    /// Linear scan over the catalogue, keeping sheet order
    ///
    /// # Examples
    /// ```
    /// use rabindra::catalog::{Catalog, SearchFilter, Song};
    ///
    /// let catalog = Catalog::new(vec![
    ///     Song { id: 1, title: "আমার সোনার বাংলা".into(), ..Default::default() },
    ///     Song { id: 2, title: "আকাশ ভরা সূর্য তারা".into(), ..Default::default() },
    /// ]);
    /// let hits = catalog.search(&SearchFilter::keyword("আকাশ"));
    /// assert_eq!(hits.len(), 1);
    /// assert_eq!(hits[0].id, 2);
    /// ```
    pub fn search(&self, filter: &SearchFilter) -> Vec<&Song> {
        let terms = filter.terms();
        self.songs
            .iter()
            .filter(|song| filter.matches_terms(song, &terms))
            .collect()
    }

    /// Distinct categories, sorted, for the filter dropdown
    pub fn categories(&self) -> Vec<String> {
        self.distinct(|song| &song.category)
    }

    pub fn ragas(&self) -> Vec<String> {
        self.distinct(|song| &song.raga)
    }

    pub fn talas(&self) -> Vec<String> {
        self.distinct(|song| &song.tala)
    }

    fn distinct<F>(&self, field: F) -> Vec<String>
    where
        F: Fn(&Song) -> &String,
    {
        self.songs
            .iter()
            .map(|song| field(song).trim())
            .filter(|value| !crate::suffix::is_missing(value))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: usize, title: &str, category: &str, raga: &str, tala: &str) -> Song {
        Song {
            id,
            title: title.to_string(),
            category: category.to_string(),
            raga: raga.to_string(),
            tala: tala.to_string(),
            ..Song::default()
        }
    }

    fn sample() -> Catalog {
        Catalog::new(vec![
            song(1, "আমার সোনার বাংলা", "স্বদেশ", "বাউল", "দাদরা"),
            song(2, "আকাশ ভরা সূর্য তারা", "পূজা", "কেদারা", "একতাল"),
            song(3, "Ekla Cholo Re", "স্বদেশ", "বাউল", "কাহারবা"),
            song(4, "আজি ঝড়ের রাতে", "প্রেম", "", "দাদরা"),
        ])
    }

    #[test]
    fn empty_filter_returns_everything_in_order() {
        let catalog = sample();
        let ids: Vec<usize> = catalog.search(&SearchFilter::default()).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(SearchFilter::default().is_empty());
    }

    #[test]
    fn keyword_is_case_insensitive() {
        let catalog = sample();
        let hits = catalog.search(&SearchFilter::keyword("ekla"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 3);
    }

    #[test]
    fn every_term_must_match() {
        let catalog = sample();
        assert_eq!(catalog.search(&SearchFilter::keyword("সোনার বাংলা")).len(), 1);
        assert!(catalog.search(&SearchFilter::keyword("সোনার আকাশ")).is_empty());
    }

    #[test]
    fn keyword_matches_metadata_fields() {
        let catalog = sample();
        let ids: Vec<usize> = catalog
            .search(&SearchFilter::keyword("বাউল"))
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn select_filters_combine() {
        let catalog = sample();
        let filter = SearchFilter {
            category: Some("স্বদেশ".to_string()),
            tala: Some("দাদরা".to_string()),
            ..Default::default()
        };
        let hits = catalog.search(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn all_choice_disables_a_filter() {
        let catalog = sample();
        let filter = SearchFilter {
            raga: Some("All".to_string()),
            category: Some("".to_string()),
            tala: Some("সব".to_string()),
            ..Default::default()
        };
        assert!(filter.is_empty());
        assert_eq!(catalog.search(&filter).len(), 4);
    }

    #[test]
    fn distinct_values_are_sorted_and_skip_blanks() {
        let catalog = sample();
        assert_eq!(catalog.ragas(), vec!["কেদারা".to_string(), "বাউল".to_string()]);
        assert_eq!(catalog.talas().len(), 3);
        assert_eq!(catalog.categories().len(), 3);
    }

    #[test]
    fn first_line_skips_blank_lines() {
        let song = Song {
            lyrics: "\n  \nআমার সোনার বাংলা\nআমি তোমায় ভালোবাসি".to_string(),
            ..Song::default()
        };
        assert_eq!(song.first_line(), "আমার সোনার বাংলা");
    }

    #[test]
    fn get_looks_up_by_id() {
        let catalog = sample();
        assert_eq!(catalog.get(2).map(|s| s.title.as_str()), Some("আকাশ ভরা সূর্য তারা"));
        assert!(catalog.get(99).is_none());
    }
}
