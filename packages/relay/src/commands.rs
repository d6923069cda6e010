//! Operator chat commands mapped onto the engine's command surface.

use crate::scraper::Engine;

pub const HELP_TEXT: &str = "/start [filters] to start scraping\n\
/stop to stop it\n\
/ping to check if the server is alive\n\
/status to show the scraper state\n\
/set iv=95&exiv=110,145 to change filters\n\
/filters to show the current filters";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Optional filter update applied before starting
    Start(Option<String>),
    Stop,
    Ping,
    Status,
    Set(String),
    Filters,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse a chat message. `/cmd@botname args` is accepted as `/cmd args`.
    pub fn parse(text: &str) -> Command {
        let text = text.trim();
        let (word, args) = match text.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (text, ""),
        };
        let word = word.split('@').next().unwrap_or(word);
        let args = (!args.is_empty()).then(|| args.to_string());

        match word {
            "/start" => Command::Start(args),
            "/stop" => Command::Stop,
            "/ping" => Command::Ping,
            "/status" => Command::Status,
            "/set" => Command::Set(args.unwrap_or_default()),
            "/filters" => Command::Filters,
            "/help" => Command::Help,
            _ => Command::Unknown(text.to_string()),
        }
    }
}

/// Run `command` against `engine` and return the reply for the operator.
pub async fn dispatch(engine: &Engine, command: Command) -> String {
    match command {
        Command::Start(update) => {
            let filters = match update {
                Some(update) => match engine.current_filters().apply_update(&update) {
                    Ok(filters) => Some(filters),
                    Err(e) => return format!("Invalid filters: {e}"),
                },
                None => None,
            };

            if engine.start(filters).await {
                format!("Scraper started with {}", engine.get_current_filters())
            } else {
                "Scraper already running".to_string()
            }
        }
        Command::Stop => {
            if engine.stop().await {
                "Scraper stopped".to_string()
            } else {
                "Scraper is already stopped".to_string()
            }
        }
        Command::Ping => "pong".to_string(),
        Command::Status => format!(
            "Scraper is {}, {} encounters remembered\nFilters: {}",
            engine.state(),
            engine.get_pokes_db_size(),
            engine.get_current_filters()
        ),
        Command::Set(update) if update.is_empty() => "Usage: /set iv=95&exiv=110,145".to_string(),
        Command::Set(update) => match engine.update_filters(&update) {
            Ok(filters) => format!("Filters updated: {filters}"),
            Err(e) => format!("Invalid filters: {e}"),
        },
        Command::Filters => engine.get_current_filters(),
        Command::Help => HELP_TEXT.to_string(),
        Command::Unknown(text) => format!("Unknown command \"{text}\", check /help"),
    }
}
