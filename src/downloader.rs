use crate::catalog::Song;
use crate::suffix::Match;
#[cfg(feature = "web")]
use std::error::Error;

const SONG_HEADERS: [&str; 9] = [
    "id",
    "title",
    "category",
    "sub_category",
    "raga",
    "tala",
    "composed",
    "notation",
    "lyrics",
];

const MATCH_HEADERS: [&str; 4] = ["token", "token_length", "suffix_length", "suffix_text"];

/// Convert search results to CSV
///
/// The header row uses the canonical column names, so the output loads
/// back through [`crate::loader::songs_from_csv`].
///
/// # Examples
/// ```
/// use rabindra::catalog::Song;
/// use rabindra::downloader::songs_to_csv;
///
/// let song = Song { id: 1, title: "আমার, সোনার".into(), ..Default::default() };
/// let csv = songs_to_csv(&[&song]);
/// assert!(csv.contains("\"আমার, সোনার\""));
/// ```
pub fn songs_to_csv(songs: &[&Song]) -> String {
    let mut csv_content = SONG_HEADERS.join(",");
    csv_content.push('\n');

    for song in songs {
        let id = song.id.to_string();
        let fields = [
            id.as_str(),
            song.title.as_str(),
            song.category.as_str(),
            song.sub_category.as_str(),
            song.raga.as_str(),
            song.tala.as_str(),
            song.composed.as_str(),
            song.notation.as_str(),
            song.lyrics.as_str(),
        ];
        push_row(&mut csv_content, &fields);
    }

    csv_content
}

/// Convert a rhyme result table to CSV
pub fn matches_to_csv(matches: &[Match]) -> String {
    let mut csv_content = MATCH_HEADERS.join(",");
    csv_content.push('\n');

    for m in matches {
        let token_length = m.token_length.to_string();
        let suffix_length = m.suffix_length.to_string();
        push_row(
            &mut csv_content,
            &[
                m.token.as_str(),
                token_length.as_str(),
                suffix_length.as_str(),
                m.suffix_text.as_str(),
            ],
        );
    }

    csv_content
}

fn push_row(csv_content: &mut String, fields: &[&str]) {
    for (idx, value) in fields.iter().enumerate() {
        if idx > 0 {
            csv_content.push(',');
        }
        csv_content.push_str(&escape_field(value));
    }
    csv_content.push('\n');
}

/// Quote a field when it holds a comma, quote or line break
pub fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert search results to XLSX
///
/// Same columns as [`songs_to_csv`]; ids are written as numbers.
#[cfg(feature = "web")]
pub fn songs_to_xlsx(songs: &[&Song]) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (col, header) in SONG_HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (idx, song) in songs.iter().enumerate() {
        let row = (idx + 1) as u32;
        worksheet.write_number(row, 0, song.id as f64)?;
        let texts = [
            &song.title,
            &song.category,
            &song.sub_category,
            &song.raga,
            &song.tala,
            &song.composed,
            &song.notation,
            &song.lyrics,
        ];
        for (offset, text) in texts.iter().enumerate() {
            worksheet.write_string(row, (offset + 1) as u16, text.as_str())?;
        }
    }

    workbook.push_worksheet(worksheet);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
