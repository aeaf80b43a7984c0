use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::auth::AuthApi;
use crate::channel::ChannelKey;
use crate::config::{checked_url, Config, DEFAULT_API_URL, DEFAULT_PUSH_URL};
use crate::events::{BusEvent, EventBus, SessionEvent};
use crate::metrics;
use crate::pagination::{ChatPane, CursorOptions, MemoryView, PageLoad, ScrollPosition};
use crate::protocol::{InboundFrame, Message};
use crate::push::PushAdapter;
use crate::request::{HttpFetcher, Outcome, RequestManager};
use crate::resources;
use crate::session::{FileCredentialStore, SessionContext};
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::transport::{WebSocketConfig, WebSocketConnector};

#[derive(Parser, Debug)]
#[command(
    name = "agora",
    about = "Headless forum client: live chat, history and session management",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "AGORA_API_URL",
        default_value = DEFAULT_API_URL,
        help = "Base URL of the forum HTTP API"
    )]
    pub api_url: String,

    #[arg(
        long,
        global = true,
        env = "AGORA_PUSH_URL",
        default_value = DEFAULT_PUSH_URL,
        help = "WebSocket endpoint for push events"
    )]
    pub push_url: String,

    #[arg(
        long = "credentials",
        global = true,
        env = "AGORA_CREDENTIALS_PATH",
        value_name = "PATH",
        help = "Where the signed-in user record is kept"
    )]
    pub credentials: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "AGORA_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "AGORA_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and remember the session
    Login(LoginArgs),
    /// Sign out and forget the stored session
    Logout,
    /// Show who the stored session belongs to
    Whoami,
    /// List the members you can chat with
    Users,
    /// List forum posts, newest first
    Posts,
    /// Show the comments under a post
    Comments(CommentsArgs),
    /// Send a private message
    Send(SendArgs),
    /// Print a conversation, paging backward through its history
    History(HistoryArgs),
    /// Follow a conversation live until interrupted
    Tail(TailArgs),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long, help = "Nickname or email")]
    pub identifier: String,

    #[arg(long, env = "AGORA_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long, help = "User id of the other participant")]
    pub peer: String,

    #[arg(long, default_value_t = 3, help = "Pages to load, newest first")]
    pub pages: u32,
}

#[derive(Args, Debug)]
pub struct CommentsArgs {
    #[arg(long = "post", help = "Id of the post")]
    pub post_id: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[arg(long, help = "User id of the recipient")]
    pub peer: String,

    pub text: String,
}

#[derive(Args, Debug)]
pub struct TailArgs {
    #[arg(long, help = "User id of the other participant")]
    pub peer: String,

    #[arg(long, help = "Nickname of the participant, to follow their presence")]
    pub nickname: Option<String>,

    #[arg(long, help = "Print prometheus metrics on exit")]
    pub metrics: bool,
}

impl Cli {
    /// Environment configuration with command line overrides applied.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::from_env().context("invalid AGORA_* configuration")?;
        config.api_url = checked_url("--api-url", &self.api_url)?;
        config.push_url = checked_url("--push-url", &self.push_url)?;
        if let Some(path) = &self.credentials {
            config.credentials_path = path.clone();
        }
        Ok(config)
    }
}

struct Client {
    config: Config,
    session: SessionContext,
    bus: EventBus,
    requests: RequestManager,
    auth: AuthApi,
}

impl Client {
    fn new(config: Config) -> Result<Self> {
        let store = Arc::new(FileCredentialStore::new(&config.credentials_path));
        let session = SessionContext::new(store);
        session
            .restore()
            .with_context(|| format!("reading {}", config.credentials_path.display()))?;
        let bus = EventBus::new();
        let fetcher = HttpFetcher::new(&config.api_url).with_cookie_file(config.cookie_path());
        let requests = RequestManager::new(Arc::new(fetcher), session.clone()).with_bus(bus.clone());
        let auth = AuthApi::new(requests.clone()).with_bus(bus.clone());
        Ok(Self {
            config,
            session,
            bus,
            requests,
            auth,
        })
    }

    fn require_session(&self) -> Result<String> {
        match self.session.user_id() {
            Some(user_id) => Ok(user_id),
            None => bail!("not signed in; run `agora login` first"),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let client = Client::new(cli.resolve_config()?)?;
    match cli.command {
        Command::Login(args) => {
            let user = settle(client.auth.sign_in(&args.identifier, &args.password).await)?;
            println!("signed in as {} ({})", user.nickname, user.id);
        }
        Command::Logout => {
            if client.session.is_authenticated() {
                client.auth.sign_out().await;
            }
            println!("signed out");
        }
        Command::Whoami => {
            client.require_session()?;
            let user = settle(client.auth.whoami().await)?;
            println!("{} ({}) <{}>", user.nickname, user.id, user.email);
        }
        Command::Users => {
            client.require_session()?;
            let users = settle(client.requests.request(resources::chat_users()).await)?;
            for user in users.unwrap_or_default() {
                let marker = if user.online { "*" } else { " " };
                println!("{marker} {:>6}  {}", user.id, user.nickname);
            }
        }
        Command::Posts => {
            client.require_session()?;
            let posts = settle(client.requests.request(resources::posts()).await)?;
            for post in posts.unwrap_or_default() {
                println!(
                    "{:>6}  {}  by {} ({} comments)",
                    post.id, post.title, post.author_name, post.number_of_comments
                );
            }
        }
        Command::Comments(args) => {
            let comments = settle(client.requests.request(resources::comments(&args.post_id)).await)?;
            for comment in comments.unwrap_or_default() {
                println!("{}: {}", comment.author_name, comment.text);
            }
        }
        Command::Send(args) => {
            let me = client.require_session()?;
            let sent = settle(
                client
                    .requests
                    .request(resources::send_message(&me, &args.peer, &args.text))
                    .await,
            )?;
            print_message(&sent);
        }
        Command::History(args) => history(&client, &args).await?,
        Command::Tail(args) => tail(&client, &args).await?,
    }
    Ok(())
}

fn settle<T>(outcome: Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Success(value) => Ok(value),
        Outcome::Failure(err) => bail!(err.user_message()),
        Outcome::Cancelled => bail!("request was cancelled"),
    }
}

fn print_message(message: &Message) {
    println!("[{}] {}: {}", message.created_at, message.author_id, message.text);
}

async fn history(client: &Client, args: &HistoryArgs) -> Result<()> {
    client.require_session()?;
    let view = Arc::new(MemoryView::new());
    let options = CursorOptions::from(&client.config);
    let pane = ChatPane::new(client.requests.clone(), client.bus.clone(), view.clone(), options);
    settle(pane.open(&args.peer).await)?;

    // the first scroll after opening only arms the cursor
    pane.on_scroll(ScrollPosition::TOP).await;
    for _ in 1..args.pages {
        tokio::time::sleep(options.scroll_throttle).await;
        match pane.on_scroll(ScrollPosition::TOP).await {
            PageLoad::Loaded { .. } => continue,
            PageLoad::Failed(err) => bail!(err.user_message()),
            _ => break,
        }
    }
    pane.close();

    for message in view.messages() {
        print_message(&message);
    }
    Ok(())
}

async fn tail(client: &Client, args: &TailArgs) -> Result<()> {
    let me = client.require_session()?;
    let connector = WebSocketConnector::new(WebSocketConfig::new(client.config.push_url.clone()));
    let push = PushAdapter::new(Arc::new(connector), client.bus.clone(), client.session.clone())
        .with_reconnect(client.config.reconnect)
        .spawn();

    let _messages = client
        .bus
        .subscribe(ChannelKey::conversation(&me, &args.peer), |_, event| {
            if let BusEvent::Push(InboundFrame::Message { message }) = event {
                print_message(message);
            }
        });
    let _typing = client
        .bus
        .subscribe(ChannelKey::typing(&me, &args.peer), |_, event| {
            if let BusEvent::Push(InboundFrame::Typing {
                author_id, typing, ..
            }) = event
            {
                println!("-- {author_id} {}", if *typing { "is typing" } else { "stopped typing" });
            }
        });
    let _status = args.nickname.as_deref().map(|nickname| {
        client.bus.subscribe(ChannelKey::status(nickname), |_, event| {
            if let BusEvent::Push(InboundFrame::Status { username, online }) = event {
                println!("-- {username} is {}", if *online { "online" } else { "offline" });
            }
        })
    });
    let _session = client.bus.subscribe(ChannelKey::session(), |_, event| {
        if let BusEvent::Session(SessionEvent::SignedOut { .. }) = event {
            println!("-- signed out");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    push.shutdown().await;
    if args.metrics {
        print!("{}", metrics::gather_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_history_with_defaults() {
        let cli = Cli::try_parse_from(["agora", "history", "--peer", "42"]).unwrap();
        match cli.command {
            Command::History(args) => {
                assert_eq!(args.peer, "42");
                assert_eq!(args.pages, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn send_takes_text_as_positional() {
        let cli = Cli::try_parse_from(["agora", "send", "--peer", "42", "see you at noon"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Send(SendArgs { ref peer, ref text }) if peer == "42" && text == "see you at noon"
        ));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "agora",
            "tail",
            "--peer",
            "9",
            "--push-url",
            "ws://localhost:9000/ws",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.push_url, "ws://localhost:9000/ws");
        assert_eq!(cli.logging.level, LogLevel::Debug);
    }
}
