use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "web")]
use std::io;
#[cfg(feature = "web")]
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::Catalog;
use crate::error::LoadError;
use crate::loader::{self, DataSource};
#[cfg(feature = "web")]
use crate::saving;
use crate::suffix::WordList;

/// File name of the snapshot inside the cache directory
pub const CACHE_FILE: &str = "library.bin.gz";

/// Everything the front-end serves, loaded once and then only read
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub catalog: Catalog,
    pub words: WordList,
    pub loaded_at: DateTime<Utc>,
    /// Human-readable description of where the data came from
    pub origin: String,
}

impl Library {
    pub fn new(catalog: Catalog, words: WordList, origin: impl Into<String>) -> Self {
        Library {
            catalog,
            words,
            loaded_at: Utc::now(),
            origin: origin.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Catalog::default(), WordList::default(), "empty")
    }

    /// Build from sheet contents; without a word sheet the rhyme dictionary
    /// is harvested from the songs themselves
    pub fn from_csv(
        songs_csv: &str,
        words_csv: Option<&str>,
        origin: impl Into<String>,
    ) -> Result<Self, LoadError> {
        let origin = origin.into();
        let catalog = loader::songs_from_csv(songs_csv, &origin)?;
        let words = match words_csv {
            Some(text) => loader::words_from_csv(text, &origin)?,
            None => WordList::harvest(&catalog),
        };
        Ok(Self::new(catalog, words, origin))
    }

    /// Load synchronously, no cache involved; remote sources are refused
    pub fn load_local(songs: &DataSource, words: Option<&DataSource>) -> Result<Self, LoadError> {
        let songs_csv = loader::read_source_blocking(songs)?;
        let words_csv = words.map(loader::read_source_blocking).transpose()?;
        Self::from_csv(&songs_csv, words_csv.as_deref(), describe(songs, words))
    }

    /// Whether a snapshot taken at `loaded_at` is older than `max_age`
    ///
    /// Without a maximum age a snapshot never goes stale.
    pub fn is_stale(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
        match max_age {
            Some(max_age) => {
                let age = now.signed_duration_since(self.loaded_at);
                age.to_std().map(|age| age > max_age).unwrap_or(false)
            }
            None => false,
        }
    }
}

fn describe(songs: &DataSource, words: Option<&DataSource>) -> String {
    match words {
        Some(words) => format!("{} + {}", songs, words),
        None => songs.to_string(),
    }
}

/// Cache-aware loading of the library for the web server
///
/// A fresh snapshot is preferred over the sources; when the sources fail
/// and a snapshot exists, the snapshot is served with a warning.
#[cfg(feature = "web")]
pub struct LibraryLoader {
    pub songs: Option<DataSource>,
    pub words: Option<DataSource>,
    pub cache_path: PathBuf,
    pub max_age: Option<Duration>,
    client: reqwest::Client,
}

#[cfg(feature = "web")]
impl LibraryLoader {
    pub fn new(
        songs: Option<DataSource>,
        words: Option<DataSource>,
        cache_dir: impl AsRef<Path>,
        max_age: Option<Duration>,
    ) -> Self {
        LibraryLoader {
            songs,
            words,
            cache_path: cache_dir.as_ref().join(CACHE_FILE),
            max_age,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(
            config.songs.clone(),
            config.words.clone(),
            &config.cache_dir,
            config.cache_max_age,
        )
    }

    async fn cached(&self) -> Option<Library> {
        let bytes = match tokio::fs::read(&self.cache_path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(path = %self.cache_path.display(), %error, "ignoring unreadable cache");
                return None;
            }
        };
        match saving::library_from_bytes(&bytes) {
            Ok(library) => Some(library),
            Err(error) => {
                tracing::warn!(path = %self.cache_path.display(), %error, "ignoring corrupt cache");
                None
            }
        }
    }

    async fn store(&self, library: &Library) -> io::Result<()> {
        let bytes = saving::library_to_bytes(library)?;
        if let Some(parent) = self.cache_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.cache_path, bytes).await
    }

    /// Load the library, honouring the cache unless `force_refresh` is set
    pub async fn load(&self, force_refresh: bool) -> Result<Library, LoadError> {
        let cached = self.cached().await;

        if !force_refresh {
            if let Some(library) = &cached {
                if !library.is_stale(self.max_age, Utc::now()) {
                    tracing::info!(path = %self.cache_path.display(), "using cached library");
                    return Ok(library.clone());
                }
            }
        }

        let Some(songs) = &self.songs else {
            return Ok(match cached {
                Some(library) => library,
                None => {
                    tracing::warn!("no song sheet configured; serving an empty library");
                    Library::empty()
                }
            });
        };

        match self.fetch(songs).await {
            Ok(library) => {
                if let Err(error) = self.store(&library).await {
                    tracing::warn!(path = %self.cache_path.display(), %error, "could not write cache");
                }
                tracing::info!(
                    songs = library.catalog.len(),
                    words = library.words.len(),
                    origin = %library.origin,
                    "library loaded"
                );
                Ok(library)
            }
            Err(error) => match cached {
                Some(library) => {
                    tracing::warn!(%error, "source unavailable, falling back to cache");
                    Ok(library)
                }
                None => Err(error),
            },
        }
    }

    async fn fetch(&self, songs: &DataSource) -> Result<Library, LoadError> {
        let songs_csv = loader::read_source(&self.client, songs).await?;
        let words_csv = match &self.words {
            Some(words) => Some(loader::read_source(&self.client, words).await?),
            None => None,
        };
        Library::from_csv(&songs_csv, words_csv.as_deref(), describe(songs, self.words.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn harvests_words_without_word_sheet() {
        let library = Library::from_csv("title\nমেঘের কোলে রোদ\n", None, "inline").unwrap();
        assert_eq!(library.catalog.len(), 1);
        assert_eq!(library.words.len(), 3);
    }

    #[test]
    fn uses_word_sheet_when_given() {
        let library =
            Library::from_csv("title\nমেঘের কোলে রোদ\n", Some("token\nবাসা\n"), "inline").unwrap();
        assert_eq!(library.words.len(), 1);
        assert_eq!(library.words.tokens()[0].text, "বাসা");
    }

    #[test]
    fn loads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let songs = dir.path().join("songs.csv");
        let words = dir.path().join("words.csv");
        std::fs::write(&songs, "title,raga\nআমার সোনার বাংলা,বাউল\n").unwrap();
        std::fs::write(&words, "token\nবাংলা\nবাসা\n").unwrap();

        let songs = DataSource::Path(songs);
        let words = DataSource::Path(words);
        let library = Library::load_local(&songs, Some(&words)).unwrap();
        assert_eq!(library.catalog.len(), 1);
        assert_eq!(library.words.len(), 2);
        assert!(library.origin.contains(" + "));

        let remote = DataSource::Url("https://example.org/songs.csv".to_string());
        assert!(matches!(
            Library::load_local(&remote, None),
            Err(LoadError::Unsupported(_))
        ));
    }

    #[test]
    fn staleness_depends_on_max_age() {
        let mut library = Library::empty();
        library.loaded_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();

        assert!(!library.is_stale(None, now));
        assert!(library.is_stale(Some(Duration::from_secs(3600)), now));
        assert!(!library.is_stale(Some(Duration::from_secs(3 * 3600)), now));
    }

    #[cfg(feature = "web")]
    mod cache_policy {
        use super::*;
        use tempfile::TempDir;

        const SHEET: &str = "title\nএকলা চলো রে\nযদি তোর ডাক শুনে কেউ না আসে\n";

        fn cached_library(dir: &TempDir, age: chrono::Duration) -> PathBuf {
            let mut library = Library::from_csv("title\nআমার সোনার বাংলা\n", None, "snapshot").unwrap();
            library.loaded_at = Utc::now() - age;
            saving::save_library(&library, dir.path().join(CACHE_FILE)).unwrap();
            dir.path().to_path_buf()
        }

        fn sheet(dir: &TempDir) -> DataSource {
            let path = dir.path().join("songs.csv");
            std::fs::write(&path, SHEET).unwrap();
            DataSource::Path(path)
        }

        #[tokio::test]
        async fn fresh_cache_is_served() {
            let dir = tempfile::tempdir().unwrap();
            let cache_dir = cached_library(&dir, chrono::Duration::minutes(5));
            let loader = LibraryLoader::new(Some(sheet(&dir)), None, &cache_dir, Some(Duration::from_secs(3600)));

            let library = loader.load(false).await.unwrap();
            assert_eq!(library.origin, "snapshot");
            assert_eq!(library.catalog.len(), 1);
        }

        #[tokio::test]
        async fn stale_cache_rereads_the_sheet() {
            let dir = tempfile::tempdir().unwrap();
            let cache_dir = cached_library(&dir, chrono::Duration::hours(2));
            let songs = sheet(&dir);
            let loader = LibraryLoader::new(Some(songs.clone()), None, &cache_dir, Some(Duration::from_secs(3600)));

            let library = loader.load(false).await.unwrap();
            assert_eq!(library.origin, songs.to_string());
            assert_eq!(library.catalog.len(), 2);

            let rewritten = saving::load_library(&loader.cache_path).unwrap();
            assert_eq!(rewritten.origin, songs.to_string());
        }

        #[tokio::test]
        async fn failing_sheet_falls_back_to_cache() {
            let dir = tempfile::tempdir().unwrap();
            let cache_dir = cached_library(&dir, chrono::Duration::minutes(5));
            let missing = DataSource::Path(dir.path().join("missing.csv"));
            let loader = LibraryLoader::new(Some(missing.clone()), None, &cache_dir, None);

            let library = loader.load(true).await.unwrap();
            assert_eq!(library.origin, "snapshot");

            let empty_dir = tempfile::tempdir().unwrap();
            let loader = LibraryLoader::new(Some(missing), None, empty_dir.path(), None);
            assert!(matches!(loader.load(true).await, Err(LoadError::Io { .. })));
        }

        #[tokio::test]
        async fn without_a_sheet_cache_or_empty() {
            let dir = tempfile::tempdir().unwrap();
            let cache_dir = cached_library(&dir, chrono::Duration::days(30));
            let loader = LibraryLoader::new(None, None, &cache_dir, Some(Duration::from_secs(60)));
            assert_eq!(loader.load(true).await.unwrap().origin, "snapshot");

            let empty_dir = tempfile::tempdir().unwrap();
            let loader = LibraryLoader::new(None, None, empty_dir.path(), None);
            let library = loader.load(false).await.unwrap();
            assert!(library.catalog.is_empty());
            assert_eq!(library.origin, "empty");
        }

        #[tokio::test]
        async fn corrupt_cache_is_ignored() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join(CACHE_FILE), b"not a snapshot").unwrap();
            let loader = LibraryLoader::new(Some(sheet(&dir)), None, dir.path(), None);

            let library = loader.load(false).await.unwrap();
            assert_eq!(library.catalog.len(), 2);
            assert!(saving::load_library(&loader.cache_path).is_ok());
        }
    }
}
