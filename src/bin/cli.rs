use clap::{Parser, Subcommand};
use rabindra::catalog::SearchFilter;
use rabindra::config::DEFAULT_CACHE_DIR;
use rabindra::error::LoadError;
use rabindra::library::{CACHE_FILE, Library};
use rabindra::loader::DataSource;
use rabindra::pagination::{DEFAULT_PER_PAGE, paginate};
use rabindra::saving;
use rabindra::suffix::{DEFAULT_TOP_N, Match};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "rabindra-cli", version)]
#[command(about = "Find rhymes and search the song catalogue from the terminal")]
struct Cli {
    /// Song sheet (CSV); without it the server's snapshot is used
    #[arg(long)]
    songs: Option<String>,

    /// Rhyme word sheet (CSV)
    #[arg(long)]
    words: Option<String>,

    /// Library snapshot written by the server
    #[arg(long)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Words ending like WORD
    Rhyme {
        word: String,

        /// Number of matches to show
        #[arg(short, long, default_value_t = DEFAULT_TOP_N)]
        top: usize,
    },
    /// Search the song catalogue
    Search {
        keyword: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        raga: Option<String>,
        #[arg(long)]
        tala: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Interactive rhyme finder (the default)
    Repl,
}

fn load_library(cli: &Cli) -> Result<Library, LoadError> {
    if let Some(songs) = &cli.songs {
        let songs = DataSource::parse(songs);
        let words = cli.words.as_deref().map(DataSource::parse);
        return Library::load_local(&songs, words.as_ref());
    }

    let cache = cli
        .cache
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR).join(CACHE_FILE));
    saving::load_library(&cache).map_err(|source| LoadError::Cache { path: cache, source })
}

fn print_matches(word: &str, matches: &[Match]) {
    if matches.is_empty() {
        println!("No word shares an ending with {}", word);
        return;
    }
    for (idx, m) in matches.iter().enumerate() {
        println!(
            "{:>3}. {}  (ending \"{}\", {} shared, length {})",
            idx + 1,
            m.token,
            m.suffix_text,
            m.suffix_length,
            m.token_length
        );
    }
}

fn print_search(library: &Library, filter: &SearchFilter, page: usize) {
    let results = library.catalog.search(filter);
    let page = paginate(&results, page, DEFAULT_PER_PAGE);

    for song in &page.items {
        let details: Vec<&str> = [&song.category, &song.raga, &song.tala]
            .into_iter()
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .collect();
        if details.is_empty() {
            println!("{:>5}  {}", song.id, song.title);
        } else {
            println!("{:>5}  {}  [{}]", song.id, song.title, details.join(" · "));
        }
    }
    println!(
        "page {} of {} ({} songs)",
        page.number, page.total_pages, page.total_items
    );
}

fn repl(library: &Library) -> io::Result<()> {
    println!(
        "{} songs, {} words loaded from {}",
        library.catalog.len(),
        library.words.len(),
        library.origin
    );
    println!("Type a word to find rhymes, 'help' for commands, 'q' to quit.");

    let mut top_n = DEFAULT_TOP_N;
    let mut status = String::from("ok");
    let mut elapsed_time = 0.0;

    loop {
        print!("[{:.1}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim();
        let start_time = Instant::now();

        if command.is_empty() {
            status = String::from("ok");
            continue;
        }

        if command == "q" {
            break;
        } else if command == "help" {
            println!("Commands:");
            println!("  <word>: Show words that end like <word>");
            println!("  top <n>: Show at most <n> matches (now {})", top_n);
            println!("  search <keyword>: Search song titles, lyrics and metadata");
            println!("  q: Quit");
            status = String::from("ok");
        } else if let Some(value) = command.strip_prefix("top ") {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => {
                    top_n = n;
                    status = String::from("ok");
                }
                _ => status = String::from("invalid number"),
            }
        } else if let Some(keyword) = command.strip_prefix("search ") {
            print_search(library, &SearchFilter::keyword(keyword), 1);
            status = String::from("ok");
        } else {
            let matches = library.words.find_matches(command, top_n);
            print_matches(command, &matches);
            status = format!("{} matches", matches.len());
        }

        elapsed_time = start_time.elapsed().as_secs_f64();
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rabindra=warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let library = load_library(&cli)?;

    match &cli.command {
        Some(Command::Rhyme { word, top }) => {
            print_matches(word, &library.words.find_matches(word, *top));
        }
        Some(Command::Search {
            keyword,
            category,
            raga,
            tala,
            page,
        }) => {
            let filter = SearchFilter {
                keyword: keyword.clone().unwrap_or_default(),
                category: category.clone(),
                raga: raga.clone(),
                tala: tala.clone(),
            };
            print_search(&library, &filter, *page);
        }
        Some(Command::Repl) | None => repl(&library)?,
    }

    Ok(())
}
