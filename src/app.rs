use axum::{
    Extension, Form, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use handlebars::{RenderError, TemplateError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::catalog::{SearchFilter, Song};
use crate::config::AppConfig;
use crate::downloader;
use crate::generator::{
    self, DURATION_RANGE, GenerateError, GenerationKind, GenerationRequest, Generator, LINES_RANGE,
    Language, MAX_THEME_CHARS, MAX_TOKENS_RANGE, ModelSettings, MusicStyle, PoetryForm, TEMPERATURE_RANGE,
};
use crate::library::{Library, LibraryLoader};
use crate::login::{self, AdminUser, ConfiguredCredentials, CredentialVerifier, SessionStore};
use crate::pagination::{Page, paginate};
use crate::suffix::{DEFAULT_TOP_N, Match};
use crate::view::{Mode, PageContext, Views};

/// Upper bound for the number of rhymes one request may ask for
pub const MAX_TOP_N: usize = 100;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shared state behind every handler
pub struct AppState {
    pub config: AppConfig,
    library: RwLock<Arc<Library>>,
    pub loader: LibraryLoader,
    pub views: Views,
    pub sessions: SessionStore,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub generator: Arc<dyn Generator>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        library: Library,
        generator: Arc<dyn Generator>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, TemplateError> {
        Ok(AppState {
            library: RwLock::new(Arc::new(library)),
            loader: LibraryLoader::from_config(&config),
            views: Views::new()?,
            sessions: SessionStore::new(config.session_ttl),
            credentials,
            generator,
            config,
        })
    }

    /// Snapshot of the current library; cheap, the lock is released at once
    pub fn library(&self) -> Arc<Library> {
        Arc::clone(&self.library.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace_library(&self, library: Library) {
        *self.library.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(library);
    }

    fn render<T: Serialize>(&self, name: &str, context: PageContext<T>) -> Result<Html<String>, AppError> {
        Ok(Html(self.views.render(name, &context)?))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("could not render page: {0}")]
    Render(#[from] RenderError),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Render(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            return (status, "Something went wrong. Please try again later.").into_response();
        }
        (status, self.to_string()).into_response()
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/admin", get(admin_page))
        .route("/admin/reload", post(admin_reload))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            login::require_admin,
        ));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/songs", get(songs_page))
        .route("/songs/:id", get(song_page))
        .route("/rhymes", get(rhymes_page))
        .route("/generate", get(generate_page).post(generate_submit))
        .route("/export/songs.csv", get(export_songs_csv))
        .route("/export/songs.xlsx", get(export_songs_xlsx))
        .route("/export/rhymes.csv", get(export_rhymes_csv))
        .route("/api/songs", get(api_songs))
        .route("/api/songs/:id", get(api_song))
        .route("/api/rhymes", get(api_rhymes))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/logout", post(login::handle_logout))
        .merge(admin)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load the library and serve until the process is stopped
pub async fn run(config: AppConfig, force_refresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let generator = generator::generator_for(&config.llm)?;
    let credentials: Arc<dyn CredentialVerifier> = Arc::new(ConfiguredCredentials::new(&config.admins));
    if !credentials.has_accounts() {
        tracing::warn!("no admin accounts configured; the admin panel is unreachable");
    }

    let state = Arc::new(AppState::new(config, Library::empty(), generator, credentials)?);

    match state.loader.load(force_refresh).await {
        Ok(library) => state.replace_library(library),
        Err(error) => tracing::error!(%error, "could not load the library; starting empty"),
    }

    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let removed = purge_state.sessions.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "purged expired sessions");
            }
        }
    });

    let addr = state.config.bind;
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// Form and query values arrive as text; anything unparseable falls back to
// the default instead of rejecting the request.
fn parse_or<T: FromStr>(value: Option<&str>, default: T) -> T {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn query_string(pairs: &[(&str, Option<&str>)]) -> String {
    pairs
        .iter()
        .filter_map(|(key, value)| {
            let value = value.map(str::trim).filter(|value| !value.is_empty())?;
            Some(format!("{}={}", key, urlencoding::encode(value)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn with_query(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

fn render_error(state: &AppState, status: StatusCode, message: &str) -> Response {
    #[derive(Serialize)]
    struct ErrorBody<'a> {
        status: u16,
        message: &'a str,
    }

    let context = PageContext::new(
        status.canonical_reason().unwrap_or("Error"),
        Mode::Home,
        ErrorBody {
            status: status.as_u16(),
            message,
        },
    );
    match state.render("error", context) {
        Ok(page) => (status, page).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found(State(state): State<Arc<AppState>>) -> Response {
    render_error(&state, StatusCode::NOT_FOUND, "This page does not exist.")
}

#[derive(Serialize)]
struct IndexBody {
    songs: usize,
    words: usize,
    generation_enabled: bool,
    origin: String,
}

async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Html<String>, AppError> {
    let library = state.library();
    let body = IndexBody {
        songs: library.catalog.len(),
        words: library.words.len(),
        generation_enabled: state.generator.is_enabled(),
        origin: library.origin.clone(),
    };
    let context = PageContext::new("Home", Mode::Home, body).with_admin(login::current_admin(&state, &jar));
    state.render("index", context)
}

/// Song search parameters shared by the page, the exports and the API
#[derive(Debug, Default, Deserialize)]
pub struct SongsQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub raga: Option<String>,
    pub tala: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

impl SongsQuery {
    fn filter(&self) -> SearchFilter {
        SearchFilter {
            keyword: self.q.clone().unwrap_or_default(),
            category: self.category.clone(),
            raga: self.raga.clone(),
            tala: self.tala.clone(),
        }
    }

    fn page(&self) -> usize {
        parse_or(self.page.as_deref(), 1)
    }

    fn per_page(&self, default: usize) -> usize {
        parse_or(self.per_page.as_deref(), default)
    }

    /// The filter part of the query, for export and pager links
    fn filter_query(&self) -> String {
        query_string(&[
            ("q", self.q.as_deref()),
            ("category", self.category.as_deref()),
            ("raga", self.raga.as_deref()),
            ("tala", self.tala.as_deref()),
            ("per_page", self.per_page.as_deref()),
        ])
    }

    fn page_href(&self, page: usize) -> String {
        let filter = self.filter_query();
        if filter.is_empty() {
            format!("/songs?page={}", page)
        } else {
            format!("/songs?{}&page={}", filter, page)
        }
    }
}

#[derive(Serialize)]
struct Choice {
    value: String,
    selected: bool,
}

fn choices(values: Vec<String>, current: Option<&str>) -> Vec<Choice> {
    let current = current.map(str::trim).unwrap_or_default();
    values
        .into_iter()
        .map(|value| Choice {
            selected: value.eq_ignore_ascii_case(current),
            value,
        })
        .collect()
}

#[derive(Serialize)]
struct SongCard<'a> {
    id: usize,
    title: &'a str,
    first_line: &'a str,
    category: &'a str,
    raga: &'a str,
    tala: &'a str,
}

impl<'a> From<&'a Song> for SongCard<'a> {
    fn from(song: &'a Song) -> Self {
        let first_line = song.first_line();
        SongCard {
            id: song.id,
            title: &song.title,
            first_line: if first_line == song.title { "" } else { first_line },
            category: &song.category,
            raga: &song.raga,
            tala: &song.tala,
        }
    }
}

#[derive(Serialize)]
struct SongsBody<'a> {
    filter: SearchFilter,
    categories: Vec<Choice>,
    ragas: Vec<Choice>,
    talas: Vec<Choice>,
    page: Page<SongCard<'a>>,
    first_item: usize,
    last_item: usize,
    previous_href: Option<String>,
    next_href: Option<String>,
    query: String,
}

async fn songs_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<SongsQuery>,
) -> Result<Html<String>, AppError> {
    let library = state.library();
    let catalog = &library.catalog;
    let filter = query.filter();
    let results = catalog.search(&filter);
    let page = paginate(&results, query.page(), query.per_page(state.config.page_size));
    tracing::debug!(keyword = %filter.keyword, hits = page.total_items, "song search");

    let body = SongsBody {
        categories: choices(catalog.categories(), query.category.as_deref()),
        ragas: choices(catalog.ragas(), query.raga.as_deref()),
        talas: choices(catalog.talas(), query.tala.as_deref()),
        first_item: page.first_item(),
        last_item: page.last_item(),
        previous_href: page.previous().map(|number| query.page_href(number)),
        next_href: page.next().map(|number| query.page_href(number)),
        query: query.filter_query(),
        page: page.map(|song| SongCard::from(song)),
        filter,
    };
    let context = PageContext::new("Song search", Mode::Search, body)
        .with_admin(login::current_admin(&state, &jar));
    state.render("songs", context)
}

async fn song_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<usize>,
) -> Result<Response, AppError> {
    let library = state.library();
    let Some(song) = library.catalog.get(id) else {
        return Ok(render_error(&state, StatusCode::NOT_FOUND, "No song with this number."));
    };
    let context = PageContext::new(song.title.clone(), Mode::Search, song)
        .with_admin(login::current_admin(&state, &jar));
    Ok(state.render("song", context)?.into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct RhymeQuery {
    pub word: Option<String>,
    pub top_n: Option<String>,
}

impl RhymeQuery {
    fn word(&self) -> &str {
        self.word.as_deref().map(str::trim).unwrap_or_default()
    }

    fn top_n(&self) -> usize {
        parse_or(self.top_n.as_deref(), DEFAULT_TOP_N).clamp(1, MAX_TOP_N)
    }

    fn matches(&self, library: &Library) -> Vec<Match> {
        library.words.find_matches(self.word(), self.top_n())
    }
}

#[derive(Serialize)]
struct RhymesBody<'a> {
    word: &'a str,
    top_n: usize,
    searched: bool,
    count: usize,
    matches: Vec<Match>,
    query: String,
}

async fn rhymes_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<RhymeQuery>,
) -> Result<Html<String>, AppError> {
    let library = state.library();
    let matches = query.matches(&library);
    if !query.word().is_empty() {
        tracing::debug!(word = query.word(), matches = matches.len(), "rhyme lookup");
    }

    let top_n = query.top_n().to_string();
    let body = RhymesBody {
        word: query.word(),
        top_n: query.top_n(),
        searched: !query.word().is_empty(),
        count: matches.len(),
        query: query_string(&[("word", Some(query.word())), ("top_n", Some(top_n.as_str()))]),
        matches,
    };
    let context = PageContext::new("Rhymes", Mode::Rhymes, body)
        .with_admin(login::current_admin(&state, &jar));
    state.render("rhymes", context)
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateQuery {
    pub kind: Option<String>,
}

/// The generation form as submitted
#[derive(Debug, Default, Deserialize)]
pub struct GenerateForm {
    pub kind: Option<String>,
    pub form: Option<String>,
    pub style: Option<String>,
    pub theme: Option<String>,
    pub lines: Option<String>,
    pub duration_secs: Option<String>,
    pub raga: Option<String>,
    pub tala: Option<String>,
    pub language: Option<String>,
    pub temperature: Option<String>,
    pub max_tokens: Option<String>,
}

impl GenerateForm {
    fn to_request(&self) -> GenerationRequest {
        let kind = parse_or(self.kind.as_deref(), GenerationKind::Poem);
        let defaults = GenerationRequest::new(kind);
        let text = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or_default().to_string();

        GenerationRequest {
            kind,
            form: parse_or(self.form.as_deref(), defaults.form),
            style: parse_or(self.style.as_deref(), defaults.style),
            theme: text(&self.theme),
            lines: parse_or(self.lines.as_deref(), defaults.lines),
            duration_secs: parse_or(self.duration_secs.as_deref(), defaults.duration_secs),
            raga: text(&self.raga),
            tala: text(&self.tala),
            language: parse_or(self.language.as_deref(), defaults.language),
            settings: ModelSettings {
                temperature: parse_or(self.temperature.as_deref(), defaults.settings.temperature),
                max_tokens: parse_or(self.max_tokens.as_deref(), defaults.settings.max_tokens),
            },
        }
    }
}

#[derive(Serialize)]
struct Labelled {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Serialize)]
struct Limits {
    lines_min: u32,
    lines_max: u32,
    duration_min: u32,
    duration_max: u32,
    temperature_min: f32,
    temperature_max: f32,
    max_tokens_min: u32,
    max_tokens_max: u32,
    theme_max: usize,
}

const LIMITS: Limits = Limits {
    lines_min: LINES_RANGE.0,
    lines_max: LINES_RANGE.1,
    duration_min: DURATION_RANGE.0,
    duration_max: DURATION_RANGE.1,
    temperature_min: TEMPERATURE_RANGE.0,
    temperature_max: TEMPERATURE_RANGE.1,
    max_tokens_min: MAX_TOKENS_RANGE.0,
    max_tokens_max: MAX_TOKENS_RANGE.1,
    theme_max: MAX_THEME_CHARS,
};

#[derive(Serialize)]
struct GenerateBody<'a> {
    kind: &'static str,
    kind_label: &'static str,
    uses_form: bool,
    uses_style: bool,
    forms: Vec<Labelled>,
    styles: Vec<Labelled>,
    languages: Vec<Labelled>,
    ragas: Vec<String>,
    talas: Vec<String>,
    request: &'a GenerationRequest,
    limits: &'static Limits,
    result: Option<String>,
    error: Option<String>,
}

fn mode_for(kind: GenerationKind) -> Mode {
    match kind {
        GenerationKind::Poem => Mode::Poem,
        GenerationKind::Song => Mode::Song,
        GenerationKind::Fusion => Mode::Fusion,
    }
}

fn render_generate(
    state: &AppState,
    jar: &CookieJar,
    request: &GenerationRequest,
    result: Option<String>,
    error: Option<String>,
) -> Result<Html<String>, AppError> {
    let library = state.library();
    let body = GenerateBody {
        kind: request.kind.slug(),
        kind_label: request.kind.label(),
        uses_form: request.kind.uses_form(),
        uses_style: request.kind.uses_style(),
        forms: PoetryForm::ALL
            .iter()
            .map(|form| Labelled {
                value: form.slug(),
                label: form.label(),
                selected: *form == request.form,
            })
            .collect(),
        styles: MusicStyle::ALL
            .iter()
            .map(|style| Labelled {
                value: style.slug(),
                label: style.label(),
                selected: *style == request.style,
            })
            .collect(),
        languages: Language::ALL
            .iter()
            .map(|language| Labelled {
                value: language.slug(),
                label: language.label(),
                selected: *language == request.language,
            })
            .collect(),
        ragas: library.catalog.ragas(),
        talas: library.catalog.talas(),
        request,
        limits: &LIMITS,
        result,
        error,
    };
    let flash = (!state.generator.is_enabled())
        .then(|| "Generation is not configured on this server.".to_string());
    let context = PageContext::new(request.kind.label(), mode_for(request.kind), body)
        .with_admin(login::current_admin(state, jar))
        .with_flash(flash);
    state.render("generate", context)
}

async fn generate_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<GenerateQuery>,
) -> Result<Html<String>, AppError> {
    let kind = parse_or(query.kind.as_deref(), GenerationKind::Poem);
    render_generate(&state, &jar, &GenerationRequest::new(kind), None, None)
}

async fn generate_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<GenerateForm>,
) -> Result<Response, AppError> {
    let request = form.to_request();

    if let Err(error) = request.validate() {
        let page = render_generate(&state, &jar, &request, None, Some(error.user_message()))?;
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }

    let prompt = request.prompt();
    tracing::info!(
        kind = request.kind.slug(),
        generator = state.generator.name(),
        "generation requested"
    );

    match state.generator.generate(&prompt, &request.settings).await {
        Ok(text) => Ok(render_generate(&state, &jar, &request, Some(text), None)?.into_response()),
        Err(error) => {
            let status = match error {
                GenerateError::Invalid(_) => StatusCode::BAD_REQUEST,
                GenerateError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                GenerateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            let page = render_generate(&state, &jar, &request, None, Some(error.user_message()))?;
            Ok((status, page).into_response())
        }
    }
}

fn download(content_type: &'static str, filename: &str, body: impl IntoResponse) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_songs_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SongsQuery>,
) -> Response {
    let library = state.library();
    let songs = library.catalog.search(&query.filter());
    download("text/csv; charset=utf-8", "songs.csv", downloader::songs_to_csv(&songs))
}

async fn export_songs_xlsx(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SongsQuery>,
) -> Result<Response, AppError> {
    let library = state.library();
    let songs = library.catalog.search(&query.filter());
    let bytes = downloader::songs_to_xlsx(&songs).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(download(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "songs.xlsx",
        bytes,
    ))
}

async fn export_rhymes_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RhymeQuery>,
) -> Response {
    let matches = query.matches(&state.library());
    download("text/csv; charset=utf-8", "rhymes.csv", downloader::matches_to_csv(&matches))
}

async fn api_songs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SongsQuery>,
) -> Json<Page<Song>> {
    let library = state.library();
    let results = library.catalog.search(&query.filter());
    let per_page = query.per_page(state.config.page_size);
    Json(paginate(&results, query.page(), per_page).map(|song| song.clone()))
}

async fn api_song(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
) -> Result<Json<Song>, AppError> {
    state
        .library()
        .catalog
        .get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("song {}", id)))
}

#[derive(Serialize)]
struct RhymeResponse {
    word: String,
    top_n: usize,
    matches: Vec<Match>,
}

async fn api_rhymes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RhymeQuery>,
) -> Json<RhymeResponse> {
    let matches = query.matches(&state.library());
    Json(RhymeResponse {
        word: query.word().to_string(),
        top_n: query.top_n(),
        matches,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminQuery {
    pub reloaded: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct AdminBody {
    songs: usize,
    words: usize,
    loaded_at: String,
    origin: String,
    songs_source: String,
    words_source: String,
    cache_path: String,
    generator: &'static str,
    sessions: usize,
}

async fn admin_page(
    State(state): State<Arc<AppState>>,
    Extension(AdminUser(username)): Extension<AdminUser>,
    Query(query): Query<AdminQuery>,
) -> Result<Html<String>, AppError> {
    let library = state.library();
    let describe = |source: &Option<crate::loader::DataSource>, missing: &str| {
        source
            .as_ref()
            .map(|source| source.to_string())
            .unwrap_or_else(|| missing.to_string())
    };

    let body = AdminBody {
        songs: library.catalog.len(),
        words: library.words.len(),
        loaded_at: library.loaded_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        origin: library.origin.clone(),
        songs_source: describe(&state.loader.songs, "not configured"),
        words_source: describe(&state.loader.words, "harvested from the songs"),
        cache_path: state.loader.cache_path.display().to_string(),
        generator: state.generator.name(),
        sessions: state.sessions.len(),
    };

    let flash = match (query.error, query.reloaded) {
        (Some(error), _) => Some(format!("Reload failed: {}", error)),
        (None, Some(_)) => Some(format!(
            "Library reloaded: {} songs, {} words",
            body.songs, body.words
        )),
        (None, None) => None,
    };

    let context = PageContext::new("Admin", Mode::Admin, body)
        .with_admin(Some(username))
        .with_flash(flash);
    state.render("admin", context)
}

async fn admin_reload(
    State(state): State<Arc<AppState>>,
    Extension(AdminUser(username)): Extension<AdminUser>,
) -> Redirect {
    tracing::info!(username, "library reload requested");
    match state.loader.load(true).await {
        Ok(library) => {
            state.replace_library(library);
            Redirect::to("/admin?reloaded=1")
        }
        Err(error) => {
            tracing::error!(%error, "library reload failed");
            let message = error.to_string();
            Redirect::to(&with_query(
                "/admin",
                &query_string(&[("error", Some(message.as_str()))]),
            ))
        }
    }
}
