/*!
# RabindraGPT

Search a catalogue of Bengali songs and poems, find rhyming words, and ask
a language model for new poetry or song lyrics, all from a small web
front-end built in Rust.

## Overview

The song catalogue lives in a spreadsheet (title, পর্যায়, রাগ, তাল,
রচনাকাল, স্বরবিতান, lyrics). It is exported as CSV, read from disk or
downloaded, and kept in memory. A compressed snapshot is written to a local
cache so the server starts quickly and keeps working when the sheet is
unreachable.

## Architecture

### Core (no I/O)
- **suffix**: the rhyme finder. Ranks dictionary words by the length of
  the ending they share with a query word.
- **catalog**: song records, keyword and select-field filtering.
- **pagination**: page arithmetic for result lists.

### Data Layer
- **loader**: quote-aware CSV parsing with English and Bengali header
  aliases; reading local files or remote sheet exports.
- **library**: the loaded catalogue plus rhyme dictionary, and the
  cache/refresh policy.
- **saving**: gzip-compressed bincode snapshots.
- **downloader**: CSV and XLSX export.
- **generator**: prompt construction; the chat-completions client needs `web`.
- **config**: environment configuration.

### Web Layer (feature `web`)
- **app**: axum routes, handlers and shared state.
- **view**: handlebars templates and the per-request page context.
- **login**: argon2 admin credentials and cookie sessions.

## Rhyme Example

```
use rabindra::suffix::{Token, find_suffix_matches};

let words = [Token::new("ভালোবাসা"), Token::new("বাসা"), Token::new("আশা")];
let matches = find_suffix_matches("বাসা", &words, 20);

assert_eq!(matches[0].token, "ভালোবাসা");
assert_eq!(matches[0].suffix_length, 4);
assert_eq!(matches[1].token, "বাসা");
```

## Routes

- `/songs`, `/songs/:id` - Catalogue search and song detail
- `/rhymes` - Rhyme finder
- `/generate` - Poetry, music lyrics, or both
- `/export/songs.csv`, `/export/songs.xlsx`, `/export/rhymes.csv` - Downloads
- `/api/songs`, `/api/songs/:id`, `/api/rhymes` - JSON
- `/login`, `/logout`, `/admin`, `/admin/reload` - Administration
*/

pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod generator;
pub mod library;
pub mod loader;
pub mod pagination;
pub mod saving;
pub mod suffix;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod view;

pub use catalog::{Catalog, SearchFilter, Song};
pub use library::Library;
pub use pagination::{Page, paginate};
pub use suffix::{Match, Token, WordList, find_suffix_matches};
