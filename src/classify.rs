//! Command classification over free-form shell text.
//!
//! Classification is inherently heuristic, so it is modeled as a total
//! function returning a closed enum with exhaustive handling at the call
//! site rather than chained string matching inside the orchestrator. New
//! classes can be added and tested in isolation.

use regex::Regex;
use std::sync::OnceLock;

/// What kind of dev server a `ServerLaunch` command starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Node toolchains: npm/yarn/pnpm dev scripts, vite, next, etc.
    Node,
    /// Python servers: `python -m http.server`, flask, uvicorn.
    Python,
    /// Plain static file servers: `serve`, `http-server`, `npx serve`.
    Static,
}

impl ServerKind {
    /// Port used when the command line does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            ServerKind::Node | ServerKind::Static => 3000,
            ServerKind::Python => 8000,
        }
    }
}

/// The closed set of command classes the orchestrator dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandClass {
    /// `cd`, with the raw target (empty string for bare `cd`).
    ChangeDirectory { target: String },
    /// Package-manager install whose output needs truncation.
    DependencyInstall,
    /// A command expected to start a long-running dev server.
    ServerLaunch { port: Option<u16>, kind: ServerKind },
    /// Everything else: run synchronously, then scan for surprise servers.
    Plain,
}

/// Classify a shell command. Total: every input maps to exactly one class.
pub fn classify(command: &str) -> CommandClass {
    let trimmed = command.trim();

    if trimmed == "cd" {
        return CommandClass::ChangeDirectory {
            target: String::new(),
        };
    }
    if let Some(rest) = trimmed.strip_prefix("cd ") {
        return CommandClass::ChangeDirectory {
            target: rest.trim().to_string(),
        };
    }

    if is_dependency_install(trimmed) {
        return CommandClass::DependencyInstall;
    }

    if let Some(kind) = server_kind(trimmed) {
        return CommandClass::ServerLaunch {
            port: extract_port(trimmed),
            kind,
        };
    }

    CommandClass::Plain
}

/// Whether the command replaces the repository contents with a fresh clone.
/// The orchestrator evicts the cached working directory before running it.
pub fn is_repository_reset(command: &str) -> bool {
    let trimmed = command.trim();
    trimmed.starts_with("git clone") || trimmed.contains("&& git clone")
}

fn is_dependency_install(command: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^(npm (install|i|ci)\b|yarn( install)?$|yarn add\b|pnpm (install|i|add)\b|pip3? install\b|bun (install|add)\b)",
        )
        .expect("install regex is valid")
    });
    re.is_match(command)
}

fn server_kind(command: &str) -> Option<ServerKind> {
    static NODE: OnceLock<Regex> = OnceLock::new();
    static PYTHON: OnceLock<Regex> = OnceLock::new();
    static STATIC: OnceLock<Regex> = OnceLock::new();

    let node = NODE.get_or_init(|| {
        Regex::new(
            r"^(PORT=\d+ )?(npm (run )?(start|dev|serve)\b|yarn (start|dev|serve)\b|pnpm (run )?(start|dev|serve)\b|npx (vite|next)\b|vite\b|next dev\b|node .*(server|app|index)\.[mc]?js\b)",
        )
        .expect("node server regex is valid")
    });
    let python = PYTHON.get_or_init(|| {
        Regex::new(
            r"^python3? (-m http\.server\b|.*\b(manage\.py runserver|app\.py))|^(flask run|uvicorn )\b",
        )
        .expect("python server regex is valid")
    });
    let static_srv = STATIC
        .get_or_init(|| Regex::new(r"^(npx )?(serve|http-server)\b").expect("static server regex is valid"));

    if static_srv.is_match(command) {
        Some(ServerKind::Static)
    } else if python.is_match(command) {
        Some(ServerKind::Python)
    } else if node.is_match(command) {
        Some(ServerKind::Node)
    } else {
        None
    }
}

/// Pull an explicit port out of a server command, if present.
///
/// Understands `--port N`, `--port=N`, `-p N`, and a `PORT=N` env prefix.
/// Trailing positional ports (`python -m http.server 8080`) are also picked
/// up since Python's built-in server takes the port bare.
fn extract_port(command: &str) -> Option<u16> {
    static FLAG: OnceLock<Regex> = OnceLock::new();
    static ENV: OnceLock<Regex> = OnceLock::new();
    static TRAILING: OnceLock<Regex> = OnceLock::new();

    let flag = FLAG
        .get_or_init(|| Regex::new(r"(?:--port[= ]|-p )(\d{2,5})\b").expect("port flag regex is valid"));
    let env = ENV.get_or_init(|| Regex::new(r"^PORT=(\d{2,5})\b").expect("PORT env regex is valid"));
    let trailing = TRAILING.get_or_init(|| {
        Regex::new(r"http\.server (\d{2,5})\b").expect("trailing port regex is valid")
    });

    for re in [flag, env, trailing] {
        if let Some(caps) = re.captures(command) {
            if let Ok(port) = caps[1].parse::<u16>() {
                return Some(port);
            }
        }
    }
    None
}
