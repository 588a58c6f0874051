use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use vestis_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use vestis_contracts::debug::{DebugProjector, DebugTab, DebugView, Key, KeyHub};
use vestis_contracts::events::EventWriter;
use vestis_contracts::search::{ImageAttachment, SearchResponse, SessionSummary};
use vestis_engine::{
    format_score, load_images, CardImage, GatewayConfig, HttpGateway, HttpImageFetcher,
    ImageLoadState, ImageOutcome, Resolution, ResultGrid, SearchSession, SessionState,
    SubmitOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "vestis-rs", version, about = "Multimodal catalogue search client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Search(SearchArgs),
    Chat(ChatArgs),
    Health(HealthArgs),
}

#[derive(Debug, Args)]
struct BackendArgs {
    /// Backend origin, e.g. http://127.0.0.1:8000 (overrides VESTIS_BACKEND_ORIGIN)
    #[arg(long)]
    origin: Option<String>,
    #[arg(long)]
    timeout_s: Option<f64>,
}

#[derive(Debug, Parser)]
struct SearchArgs {
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, value_enum)]
    debug: Option<DebugTabArg>,
    /// Fetch every result image and report which ones load
    #[arg(long)]
    images: bool,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Parser)]
struct HealthArgs {
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DebugTabArg {
    Plan,
    Raw,
}

impl From<DebugTabArg> for DebugTab {
    fn from(value: DebugTabArg) -> Self {
        match value {
            DebugTabArg::Plan => DebugTab::Plan,
            DebugTabArg::Raw => DebugTab::Raw,
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vestis-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Search(args) => run_search(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Health(args) => run_health(args),
    }
}

fn backend_config(args: &BackendArgs) -> GatewayConfig {
    GatewayConfig::from_env()
        .with_origin(args.origin.as_deref())
        .with_request_timeout_s(args.timeout_s)
}

fn new_session(
    config: &GatewayConfig,
    events: Option<&PathBuf>,
) -> Result<SearchSession<HttpGateway>> {
    let session = SearchSession::new(HttpGateway::new(config)?);
    Ok(match events {
        Some(path) => session.with_events(EventWriter::for_new_session(path)),
        None => session,
    })
}

fn run_search(args: SearchArgs) -> Result<i32> {
    let config = backend_config(&args.backend);
    let mut session = new_session(&config, args.events.as_ref())?;
    let image = args
        .image
        .as_deref()
        .map(ImageAttachment::from_path)
        .transpose()?;
    session.update_draft(args.text.as_deref(), image);

    if session.submit() == SubmitOutcome::Blocked {
        bail!("nothing to search for: pass --text and/or --image");
    }

    let data = match session.state() {
        SessionState::Ready(data) => data,
        SessionState::Failed { message } => {
            eprintln!("{message}");
            return Ok(2);
        }
        other => bail!("search ended in unexpected state: {}", other.kind()),
    };

    if let Some(summary) = session.summary() {
        println!("{}", render_summary(&summary));
    }
    let mut grid = ResultGrid::from_response(data, &config.origin);
    if args.images {
        let fetcher = HttpImageFetcher::new(&config)?;
        let outcomes = load_images(&mut grid, &fetcher);
        log_image_outcomes(session.events(), &outcomes);
    }
    println!("{}", render_grid(&grid));

    if let Some(tab) = args.debug {
        let keys = KeyHub::new();
        let mut projector = DebugProjector::new();
        projector.select_tab(tab.into());
        projector.open(&keys);
        println!("{}", render_debug(&projector, Some(data)));
    }
    Ok(0)
}

fn run_health(args: HealthArgs) -> Result<i32> {
    let config = backend_config(&args.backend);
    let gateway = HttpGateway::new(&config)?;
    if gateway.health()? {
        println!("Backend healthy ({})", gateway.origin());
        Ok(0)
    } else {
        println!("Backend unhealthy ({})", gateway.origin());
        Ok(1)
    }
}

/// Everything the chat loop reacts to, in arrival order.
enum ChatEvent {
    Line(String),
    InputClosed,
    Resolved(Resolution),
}

impl From<Resolution> for ChatEvent {
    fn from(value: Resolution) -> Self {
        Self::Resolved(value)
    }
}

fn spawn_stdin_reader(events: Sender<ChatEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end_matches(['\n', '\r']).to_string();
                    if events.send(ChatEvent::Line(text)).is_err() {
                        return;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    eprintln!("vestis-rs: stdin read failed: {err}");
                    break;
                }
            }
        }
        let _ = events.send(ChatEvent::InputClosed);
    });
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = backend_config(&args.backend);
    let mut chat = ChatSession::new(config, args.events.as_ref())?;
    let (tx, rx) = mpsc::channel::<ChatEvent>();
    spawn_stdin_reader(tx.clone());

    println!(
        "Vestis search ({}). Type a query, or /help for commands.",
        chat.config.origin
    );
    prompt()?;

    let mut input_closed = false;
    for event in rx.iter() {
        match event {
            ChatEvent::Resolved(resolution) => chat.apply(resolution),
            ChatEvent::InputClosed => input_closed = true,
            ChatEvent::Line(line) => {
                if !chat.handle_line(&line, &tx)? {
                    break;
                }
            }
        }
        if input_closed && !chat.session.is_submitting() {
            break;
        }
        if !input_closed {
            prompt()?;
        }
    }

    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

fn searching_notice(first_search: bool) -> &'static str {
    if first_search {
        "Searching... (first search, laying out results)"
    } else {
        "Searching..."
    }
}

/// Interactive state: the search session plus what is rendered from it.
struct ChatSession {
    config: GatewayConfig,
    session: SearchSession<HttpGateway>,
    fetcher: HttpImageFetcher,
    keys: KeyHub,
    projector: DebugProjector,
    grid: Option<ResultGrid>,
}

impl ChatSession {
    fn new(config: GatewayConfig, events: Option<&PathBuf>) -> Result<Self> {
        let session = new_session(&config, events)?;
        let fetcher = HttpImageFetcher::new(&config)?;
        Ok(Self {
            config,
            session,
            fetcher,
            keys: KeyHub::new(),
            projector: DebugProjector::new(),
            grid: None,
        })
    }

    /// Hands a worker's answer to the session; superseded answers are dropped.
    fn apply(&mut self, resolution: Resolution) {
        if self.session.complete(resolution.seq, resolution.outcome) != SubmitOutcome::Applied {
            return;
        }
        self.grid = self
            .session
            .ready_data()
            .map(|data| ResultGrid::from_response(data, &self.config.origin));
        println!();
        print_session(&self.session, self.grid.as_ref());
        if self.projector.is_open() {
            println!(
                "{}",
                render_debug(&self.projector, self.session.ready_data())
            );
        }
    }

    /// Runs one input line. Returns false when the user asked to quit.
    fn handle_line(&mut self, line: &str, results: &Sender<ChatEvent>) -> Result<bool> {
        let intent = parse_intent(line);

        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => return Ok(false),
            "search" | "submit" => {
                if let Some(text) = intent.text.as_deref() {
                    self.session.update_draft(Some(text), None);
                }
                match self.session.submit_in_background(results.clone()) {
                    Some(_) => println!(
                        "{}",
                        searching_notice(self.session.first_search_active())
                    ),
                    None => println!("Type a query or attach an image with /image first."),
                }
            }
            "attach_image" => match intent.arg_str("path") {
                None => println!("/image requires a path"),
                Some(path) => match ImageAttachment::from_path(Path::new(path)) {
                    Ok(image) => {
                        println!("Attached {} ({} bytes)", image.filename, image.bytes.len());
                        self.session.update_draft(None, Some(image));
                    }
                    Err(err) => println!("Attach failed: {err:#}"),
                },
            },
            "clear_image" => {
                self.session.clear_image();
                println!("Image cleared.");
            }
            "reset" => {
                self.session.reset();
                self.grid = None;
                println!(
                    "Session reset. Draft text kept: {:?}",
                    self.session.draft().raw_text()
                );
            }
            "toggle_debug" => {
                self.projector.toggle(&self.keys);
                let event_type = if self.projector.is_open() {
                    "debug_opened"
                } else {
                    "debug_closed"
                };
                log_event(
                    self.session.events(),
                    event_type,
                    json!({ "tab": self.projector.active_tab().label() }),
                );
                if self.projector.is_open() {
                    println!(
                        "{}",
                        render_debug(&self.projector, self.session.ready_data())
                    );
                } else {
                    println!("Debug view closed.");
                }
            }
            "set_debug_tab" => {
                let tab = match intent.arg_str("tab") {
                    Some("raw") => DebugTab::Raw,
                    _ => DebugTab::Plan,
                };
                self.projector.select_tab(tab);
                if self.projector.is_open() {
                    println!(
                        "{}",
                        render_debug(&self.projector, self.session.ready_data())
                    );
                } else {
                    println!("{} tab selected. Open it with /debug.", tab.label());
                }
            }
            "escape" => {
                self.keys.dispatch(Key::Escape);
                if self.projector.pump_keys() {
                    log_event(
                        self.session.events(),
                        "debug_closed",
                        json!({ "via": "escape" }),
                    );
                    println!("Debug view closed.");
                }
            }
            "load_images" => match self.grid.as_mut() {
                None => println!("No results to load images for."),
                Some(grid) => {
                    let outcomes = load_images(grid, &self.fetcher);
                    log_image_outcomes(self.session.events(), &outcomes);
                    println!("{}", render_grid(grid));
                }
            },
            "summary" => match self.session.summary() {
                Some(summary) => println!("{}", render_summary(&summary)),
                None => println!("State: {}", self.session.state().kind()),
            },
            "set_origin" => self.set_origin(intent.arg_str("value"))?,
            "health" => match self.session.gateway().health() {
                Ok(true) => println!("Backend healthy ({})", self.config.origin),
                Ok(false) => println!("Backend unhealthy ({})", self.config.origin),
                Err(err) => println!("Health check failed: {err:#}"),
            },
            "unknown" => {
                println!(
                    "Unknown command /{}. Type /help.",
                    intent.arg_str("command").unwrap_or_default()
                );
            }
            other => println!("Unhandled action: {other}"),
        }

        Ok(true)
    }

    fn set_origin(&mut self, requested: Option<&str>) -> Result<()> {
        let next = self.config.clone().with_origin(requested);
        if requested.is_none() || next.origin == self.config.origin {
            println!("Origin: {}", self.config.origin);
            return Ok(());
        }
        self.session.set_gateway(HttpGateway::new(&next)?);
        self.fetcher = HttpImageFetcher::new(&next)?;
        self.config = next;
        println!("Origin set to {}", self.config.origin);
        Ok(())
    }
}

fn print_session(session: &SearchSession<HttpGateway>, grid: Option<&ResultGrid>) {
    match session.state() {
        SessionState::Failed { message } => println!("{message}"),
        SessionState::Ready(_) => {
            if let Some(summary) = session.summary() {
                println!("{}", render_summary(&summary));
            }
            if let Some(grid) = grid {
                println!("{}", render_grid(grid));
            }
        }
        other => println!("State: {}", other.kind()),
    }
}

fn render_summary(summary: &SessionSummary) -> String {
    let top = summary
        .top_score
        .map(format_score)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "Query used: {} | results: {} | top score: {}",
        summary.query_used, summary.result_count, top
    )
}

fn render_grid(grid: &ResultGrid) -> String {
    if let Some(empty) = grid.empty_state() {
        return empty.to_string();
    }
    let mut lines = Vec::new();
    for (idx, card) in grid.cards().enumerate() {
        lines.push(format!(
            "{:>2}. [{}] {}  {}",
            idx + 1,
            card.score_label(),
            card.product_id(),
            card.description_label()
        ));
        let image = card_image_label(&card.loader().view(), card.loader().state());
        match card.image_path_line() {
            Some(path) => lines.push(format!("      {path} ({image})")),
            None => lines.push(format!("      ({image})")),
        }
    }
    lines.join("\n")
}

fn card_image_label(view: &CardImage, state: ImageLoadState) -> String {
    match view {
        CardImage::Image(url) => format!("loaded: {url}"),
        CardImage::Skeleton if state == ImageLoadState::Loading => "loading...".to_string(),
        CardImage::Skeleton => "not loaded".to_string(),
        CardImage::Placeholder => vestis_engine::NO_IMAGE_LABEL.to_string(),
    }
}

fn render_debug(projector: &DebugProjector, data: Option<&SearchResponse>) -> String {
    let view = projector.render(data);
    match view {
        DebugView::Hidden => String::new(),
        _ => format!(
            "── Debug · {} ──\n{}",
            projector.active_tab().label(),
            view
        ),
    }
}

fn log_image_outcomes(events: Option<&EventWriter>, outcomes: &[ImageOutcome]) {
    for outcome in outcomes {
        let event_type = if outcome.state == ImageLoadState::Loaded {
            "image_loaded"
        } else {
            "image_broken"
        };
        log_event(
            events,
            event_type,
            json!({
                "product_id": outcome.product_id,
                "error": outcome.error,
            }),
        );
    }
}

fn log_event(events: Option<&EventWriter>, event_type: &str, payload: Value) {
    let Some(events) = events else {
        return;
    };
    let payload = match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    events.emit_lossy(event_type, payload);
}
