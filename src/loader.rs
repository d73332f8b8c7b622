use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, Song};
use crate::error::LoadError;
use crate::suffix::{Token, WordList, is_missing};

/// Where a sheet comes from: a local CSV file or a CSV export URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Path(PathBuf),
    Url(String),
}

impl DataSource {
    /// Interpret a configuration value; `http://` and `https://` are URLs
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            DataSource::Url(value.to_string())
        } else {
            DataSource::Path(PathBuf::from(value))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DataSource::Url(_))
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Path(path) => write!(f, "{}", path.display()),
            DataSource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Logical columns of the song and word sheets
///
/// Sheet revisions disagree on header spelling and script, so each column
/// accepts a list of aliases, compared trimmed and lower-cased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Title,
    Category,
    SubCategory,
    Raga,
    Tala,
    Composed,
    Notation,
    Lyrics,
    Token,
    TokenLength,
}

impl Column {
    pub fn name(self) -> &'static str {
        self.aliases()[0]
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Column::Title => &[
                "title",
                "song",
                "name",
                "গান",
                "গানের নাম",
                "শিরোনাম",
                "প্রথম পংক্তি",
            ],
            Column::Category => &["category", "parjay", "paryay", "পর্যায়"],
            Column::SubCategory => &[
                "sub_category",
                "subcategory",
                "upa_parjay",
                "উপপর্যায়",
                "উপ-পর্যায়",
            ],
            Column::Raga => &["raga", "raag", "rag", "রাগ", "রাগিণী"],
            Column::Tala => &["tala", "taal", "tal", "তাল"],
            Column::Composed => &["composed", "year", "date", "রচনাকাল", "সাল"],
            Column::Notation => &["notation", "swarabitan", "স্বরবিতান", "স্বরলিপি"],
            Column::Lyrics => &["lyrics", "text", "গানের কথা", "কথা", "বাণী"],
            Column::Token => &["token", "word", "শব্দ"],
            Column::TokenLength => &["token_length", "length", "len", "দৈর্ঘ্য"],
        }
    }

    fn accepts(self, header: &str) -> bool {
        let header = header.trim().to_lowercase();
        self.aliases().iter().any(|alias| *alias == header)
    }
}

/// Column positions resolved from a header row
#[derive(Debug)]
pub struct HeaderMap {
    headers: Vec<String>,
}

impl HeaderMap {
    pub fn new(header_row: &[String]) -> Self {
        HeaderMap {
            headers: header_row.to_vec(),
        }
    }

    /// Index of the first header accepted by `column`
    pub fn position(&self, column: Column) -> Option<usize> {
        self.headers.iter().position(|header| column.accepts(header))
    }

    fn require(&self, column: Column, source_name: &str) -> Result<usize, LoadError> {
        self.position(column).ok_or_else(|| LoadError::MissingColumn {
            source_name: source_name.to_string(),
            column: column.name(),
        })
    }
}

/// Parse CSV text into rows of fields
///
/// Quoted fields may contain commas, doubled quotes and line breaks, which
/// lyrics columns routinely do. A leading byte-order mark is dropped and
/// rows whose fields are all blank are skipped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Doubled quote inside quoted field
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                row.push(std::mem::take(&mut field));
            }
            '\r' if !in_quotes => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            '\n' if !in_quotes => {
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }

    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.iter().any(|field| !field.trim().is_empty()) {
        rows.push(row);
    }
}

/// Trim a cell and blank out the missing-value placeholder
pub fn clean_cell(raw: &str) -> String {
    if is_missing(raw) {
        String::new()
    } else {
        raw.trim().to_string()
    }
}

fn cell(row: &[String], position: Option<usize>) -> String {
    position
        .and_then(|idx| row.get(idx))
        .map(|raw| clean_cell(raw))
        .unwrap_or_default()
}

/// Build the song catalogue from CSV text
///
/// Only a title column is required. Rows without a title are skipped; ids
/// follow the row order of the sheet.
pub fn songs_from_csv(text: &str, source_name: &str) -> Result<Catalog, LoadError> {
    let rows = parse_csv(text);
    let (header_row, data) = rows
        .split_first()
        .ok_or_else(|| LoadError::Empty(source_name.to_string()))?;

    let headers = HeaderMap::new(header_row);
    let title = headers.require(Column::Title, source_name)?;
    let category = headers.position(Column::Category);
    let sub_category = headers.position(Column::SubCategory);
    let raga = headers.position(Column::Raga);
    let tala = headers.position(Column::Tala);
    let composed = headers.position(Column::Composed);
    let notation = headers.position(Column::Notation);
    let lyrics = headers.position(Column::Lyrics);

    let mut songs = Vec::with_capacity(data.len());
    for (idx, row) in data.iter().enumerate() {
        let title = cell(row, Some(title));
        if title.is_empty() {
            continue;
        }
        songs.push(Song {
            id: idx + 1,
            title,
            category: cell(row, category),
            sub_category: cell(row, sub_category),
            raga: cell(row, raga),
            tala: cell(row, tala),
            composed: cell(row, composed),
            notation: cell(row, notation),
            lyrics: cell(row, lyrics),
        });
    }

    tracing::debug!(source = source_name, songs = songs.len(), "parsed song sheet");
    Ok(Catalog::new(songs))
}

/// Build the rhyme word list from CSV text
///
/// A token column is required. The length column is optional; when it is
/// missing or unparseable the token's character count is used instead.
pub fn words_from_csv(text: &str, source_name: &str) -> Result<WordList, LoadError> {
    let rows = parse_csv(text);
    let (header_row, data) = rows
        .split_first()
        .ok_or_else(|| LoadError::Empty(source_name.to_string()))?;

    let headers = HeaderMap::new(header_row);
    let token = headers.require(Column::Token, source_name)?;
    let length = headers.position(Column::TokenLength);

    let tokens = data
        .iter()
        .map(|row| {
            let text = cell(row, Some(token));
            match parse_length(&cell(row, length)) {
                Some(length) => Token::with_length(text, length),
                None => Token::new(text),
            }
        })
        .collect();

    let words = WordList::new(tokens);
    tracing::debug!(source = source_name, words = words.len(), "parsed word sheet");
    Ok(words)
}

// Sheets exported through pandas write integer columns as "4.0"
fn parse_length(raw: &str) -> Option<usize> {
    if let Ok(length) = raw.parse::<usize>() {
        return Some(length);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0 && value.fract() == 0.0)
        .map(|value| value as usize)
}

/// Read a local sheet into memory
pub fn read_file(path: impl AsRef<Path>) -> Result<String, LoadError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a sheet without a runtime; remote sources are refused
pub fn read_source_blocking(source: &DataSource) -> Result<String, LoadError> {
    match source {
        DataSource::Path(path) => read_file(path),
        DataSource::Url(url) => Err(LoadError::Unsupported(url.clone())),
    }
}

/// Read a sheet from disk or download it
#[cfg(feature = "web")]
pub async fn read_source(
    client: &reqwest::Client,
    source: &DataSource,
) -> Result<String, LoadError> {
    match source {
        DataSource::Path(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| LoadError::Io {
                    path: path.clone(),
                    source,
                })
        }
        DataSource::Url(url) => fetch_text(client, url).await,
    }
}

#[cfg(feature = "web")]
async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, LoadError> {
    tracing::info!(url, "downloading sheet");
    let fetch_error = |error: reqwest::Error| LoadError::Fetch {
        url: url.to_string(),
        message: error.to_string(),
    };

    let response = client.get(url).send().await.map_err(fetch_error)?;
    if !response.status().is_success() {
        return Err(LoadError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    response.text().await.map_err(fetch_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields_with_newlines() {
        let rows = parse_csv("title,lyrics\n\"আমার, সোনার\",\"line one\nline \"\"two\"\"\"\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "আমার, সোনার");
        assert_eq!(rows[1][1], "line one\nline \"two\"");
    }

    #[test]
    fn handles_crlf_bom_and_blank_rows() {
        let rows = parse_csv("\u{feff}a,b\r\n1,2\r\n,\r\n\r\n3,4");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["1".to_string(), "2".to_string()],
                vec!["3".to_string(), "4".to_string()],
            ]
        );
    }

    #[test]
    fn keeps_trailing_empty_field() {
        let rows = parse_csv("a,b,c\n1,,\n");
        assert_eq!(rows[1], vec!["1".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn source_kind_is_detected() {
        assert!(DataSource::parse("https://docs.google.com/export?format=csv").is_remote());
        assert!(DataSource::parse(" HTTP://example.org/a.csv ").is_remote());
        assert_eq!(
            DataSource::parse("data/songs.csv"),
            DataSource::Path(PathBuf::from("data/songs.csv"))
        );
    }

    #[test]
    fn english_headers_are_resolved() {
        let csv = "Title,Category,Raga,Tala,Lyrics\nআমার সোনার বাংলা,স্বদেশ,বাউল,দাদরা,আমার সোনার বাংলা\n";
        let catalog = songs_from_csv(csv, "songs.csv").unwrap();
        let song = &catalog.songs()[0];
        assert_eq!(song.id, 1);
        assert_eq!(song.category, "স্বদেশ");
        assert_eq!(song.raga, "বাউল");
        assert_eq!(song.tala, "দাদরা");
        assert_eq!(song.notation, "");
    }

    #[test]
    fn bengali_headers_are_resolved() {
        let csv = "গান,পর্যায়,রাগ,তাল,রচনাকাল\nআকাশ ভরা সূর্য তারা,পূজা,কেদারা,একতাল,১৩০২\n";
        let catalog = songs_from_csv(csv, "songs.csv").unwrap();
        let song = &catalog.songs()[0];
        assert_eq!(song.title, "আকাশ ভরা সূর্য তারা");
        assert_eq!(song.category, "পূজা");
        assert_eq!(song.composed, "১৩০২");
    }

    #[test]
    fn placeholder_cells_become_empty_and_untitled_rows_are_skipped() {
        let csv = "title,raga\nপ্রথম,nan\nnan,ভৈরবী\nতৃতীয়,বেহাগ\n";
        let catalog = songs_from_csv(csv, "songs.csv").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.songs()[0].raga, "");
        assert_eq!(catalog.songs()[1].id, 3);
    }

    #[test]
    fn missing_title_column_is_reported() {
        let error = songs_from_csv("raga,tala\nবাউল,দাদরা\n", "songs.csv").unwrap_err();
        assert!(matches!(error, LoadError::MissingColumn { column: "title", .. }));
    }

    #[test]
    fn empty_sheet_is_reported() {
        assert!(matches!(songs_from_csv("", "songs.csv"), Err(LoadError::Empty(_))));
    }

    #[test]
    fn word_lengths_fall_back_to_char_count() {
        let csv = "token,token_length\nভালোবাসা,8\nবাসা,4.0\nআশা,\nnan,3\n";
        let words = words_from_csv(csv, "words.csv").unwrap();
        let lengths: Vec<(String, usize)> = words
            .iter()
            .map(|t| (t.text.clone(), t.length))
            .collect();
        assert_eq!(
            lengths,
            vec![
                ("ভালোবাসা".to_string(), 8),
                ("বাসা".to_string(), 4),
                ("আশা".to_string(), 3),
            ]
        );
    }

    #[test]
    fn word_sheet_accepts_bengali_header() {
        let words = words_from_csv("শব্দ\nমেঘ\nবৃষ্টি\n", "words.csv").unwrap();
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn remote_source_needs_runtime() {
        let source = DataSource::Url("https://example.org/songs.csv".to_string());
        assert!(matches!(
            read_source_blocking(&source),
            Err(LoadError::Unsupported(_))
        ));
    }
}
