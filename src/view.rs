//! HTML rendering
//!
//! Templates are compiled into the binary and registered once at start-up.
//! Every handler builds its own [`PageContext`]; nothing about the visitor
//! is kept between requests except the admin session cookie.

use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

const PARTIALS: [(&str, &str); 2] = [
    ("header", include_str!("./templates/header.hbs")),
    ("footer", include_str!("./templates/footer.hbs")),
];

const PAGES: [(&str, &str); 8] = [
    ("index", include_str!("./templates/index.hbs")),
    ("songs", include_str!("./templates/songs.hbs")),
    ("song", include_str!("./templates/song.hbs")),
    ("rhymes", include_str!("./templates/rhymes.hbs")),
    ("generate", include_str!("./templates/generate.hbs")),
    ("login", include_str!("./templates/login.hbs")),
    ("admin", include_str!("./templates/admin.hbs")),
    ("error", include_str!("./templates/error.hbs")),
];

/// Section of the site a page belongs to; drives the navigation highlight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Home,
    Search,
    Rhymes,
    Poem,
    Song,
    Fusion,
    Admin,
}

const NAV: [(Mode, &str, &str); 7] = [
    (Mode::Home, "/", "Home"),
    (Mode::Search, "/songs", "Song search"),
    (Mode::Rhymes, "/rhymes", "Rhymes"),
    (Mode::Poem, "/generate?kind=poem", "Poetry"),
    (Mode::Song, "/generate?kind=song", "Music"),
    (Mode::Fusion, "/generate?kind=fusion", "Poetry + Music"),
    (Mode::Admin, "/admin", "Admin"),
];

#[derive(Debug, Clone, Serialize)]
pub struct NavItem {
    pub href: &'static str,
    pub label: &'static str,
    pub active: bool,
}

/// Everything a template sees
#[derive(Debug, Serialize)]
pub struct PageContext<T> {
    pub title: String,
    pub mode: Mode,
    pub nav: Vec<NavItem>,
    pub admin: Option<String>,
    pub flash: Option<String>,
    pub body: T,
}

impl<T: Serialize> PageContext<T> {
    pub fn new(title: impl Into<String>, mode: Mode, body: T) -> Self {
        let nav = NAV
            .iter()
            .map(|&(item_mode, href, label)| NavItem {
                href,
                label,
                active: item_mode == mode,
            })
            .collect();

        PageContext {
            title: title.into(),
            mode,
            nav,
            admin: None,
            flash: None,
            body,
        }
    }

    pub fn with_admin(mut self, admin: Option<String>) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_flash(mut self, flash: Option<String>) -> Self {
        self.flash = flash.filter(|message| !message.trim().is_empty());
        self
    }
}

/// The template registry
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        for (name, source) in PARTIALS {
            registry.register_partial(name, source)?;
        }
        for (name, source) in PAGES {
            registry.register_template_string(name, source)?;
        }
        Ok(Views { registry })
    }

    pub fn render<T: Serialize>(
        &self,
        name: &str,
        context: &PageContext<T>,
    ) -> Result<String, RenderError> {
        self.registry.render(name, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nav_marks_the_active_mode() {
        let context = PageContext::new("Rhymes", Mode::Rhymes, ());
        let active: Vec<&str> = context
            .nav
            .iter()
            .filter(|item| item.active)
            .map(|item| item.href)
            .collect();
        assert_eq!(active, vec!["/rhymes"]);
    }

    #[test]
    fn blank_flash_is_dropped() {
        let context = PageContext::new("Home", Mode::Home, ()).with_flash(Some("  ".to_string()));
        assert!(context.flash.is_none());
    }

    #[test]
    fn renders_escaped_page() {
        let views = Views::new().unwrap();
        let context = PageContext::new("Error", Mode::Home, json!({
            "status": 404,
            "message": "<script>",
        }));
        let html = views.render("error", &context).unwrap();
        assert!(html.contains("<title>Error"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
