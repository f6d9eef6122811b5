//! DocuBot client - command-line entry point
//!
//! Streams chat answers to stdout; logs and notifications go to stderr.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use docubot_client::api::types::Documentation;
use docubot_client::{
    ApiClient, ApiError, AuthSession, ChatEvent, ChatSession, Config, ExchangeOutcome, LocalStore,
    Notifier, SharedTaskRegistry, TaskItem, TaskPoller, TaskRegistry, ToastKind, ToastStore,
    TokenStore,
};
use tokio::io::AsyncBufReadExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docubot")]
#[command(about = "Chat with your repositories and track documentation jobs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DocType {
    Readme,
    Api,
}

impl DocType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Readme => "readme",
            Self::Api => "api",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with a password or a one-time code
    Login {
        email: String,
        /// Password; may also come from DOCUBOT_PASSWORD
        #[arg(long, env = "DOCUBOT_PASSWORD", conflicts_with = "code")]
        password: Option<String>,
        /// One-time login code
        #[arg(long)]
        code: Option<String>,
        /// Keep the token for this process only
        #[arg(long)]
        no_remember: bool,
    },
    /// Forget the stored token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Change the display name
    SetName { name: String },
    /// List connected repositories
    Repos,
    /// Connect a repository by URL
    AddRepo { url: String },
    /// Start a repository analysis and track it
    Analyze { repo_id: i64 },
    /// Start documentation generation and track it
    GenerateDocs {
        repo_id: i64,
        #[arg(long, value_enum, default_value = "readme")]
        doc_type: DocType,
    },
    /// Print generated documentation
    Docs {
        repo_id: i64,
        #[arg(long, value_enum, default_value = "readme")]
        doc_type: DocType,
    },
    /// List tracked tasks
    Tasks,
    /// Stop tracking a task
    Dismiss { task_id: String },
    /// Poll tracked tasks until none is active
    Watch {
        /// Keep polling after the last task settles
        #[arg(long)]
        forever: bool,
    },
    /// Ask a single question and stream the answer
    Ask {
        repo_id: i64,
        query: String,
        /// Continue an existing chat session
        #[arg(long)]
        session: Option<i64>,
        /// Wait for the full answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive chat; one question per line
    Chat {
        repo_id: i64,
        #[arg(long)]
        session: Option<i64>,
    },
}

/// Prints notifications as they arrive and keeps them in a toast list.
struct Console {
    toasts: ToastStore,
}

impl Notifier for Console {
    fn notify(&mut self, message: &str, kind: ToastKind) {
        self.toasts.prune_expired(Instant::now());
        eprintln!("[{}] {}", kind, message);
        self.toasts.notify(message, kind);
    }
}

struct App {
    config: Config,
    client: ApiClient,
    store: Arc<LocalStore>,
    console: Console,
    cancel: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docubot_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Using API at {}", config.api_base());

    let store = Arc::new(LocalStore::open(&config.state_dir).await);
    let client = ApiClient::new(&config, TokenStore::new(store.clone()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut app = App {
        console: Console {
            toasts: ToastStore::new(config.toast_duration),
        },
        config,
        client,
        store,
        cancel,
    };

    if let Err(e) = app.run(cli.command).await {
        if e.is_unauthorized() {
            eprintln!("Session expired, please log in again.");
        } else {
            e.surface(&mut app.console);
        }
        std::process::exit(1);
    }

    Ok(())
}

impl App {
    async fn registry(&self) -> SharedTaskRegistry {
        Arc::new(RwLock::new(TaskRegistry::load(self.store.clone()).await))
    }

    async fn run(&mut self, command: Commands) -> Result<(), ApiError> {
        match command {
            Commands::Login {
                email,
                password,
                code,
                no_remember,
            } => {
                let remember = self.config.remember_login && !no_remember;
                let mut auth = AuthSession::new(self.client.clone());
                let user = match (password, code) {
                    (_, Some(code)) => auth.login_with_code(&email, &code, remember).await?,
                    (Some(password), None) => auth.login(&email, &password, remember).await?,
                    (None, None) => {
                        return Err(ApiError::InvalidInput(
                            "Pass --password or --code".to_string(),
                        ))
                    }
                };
                println!("Signed in as {}", user.email);
                if !remember {
                    println!("Token kept for this process only.");
                }
            }
            Commands::Logout => {
                AuthSession::new(self.client.clone()).logout().await?;
                println!("Signed out.");
            }
            Commands::Whoami => {
                let mut auth = AuthSession::new(self.client.clone());
                auth.hydrate().await;
                match auth.refresh().await {
                    Some(user) => match &user.full_name {
                        Some(name) => println!("{} <{}>", name, user.email),
                        None => println!("{}", user.email),
                    },
                    None => println!("Not signed in."),
                }
            }
            Commands::SetName { name } => {
                let mut auth = AuthSession::new(self.client.clone());
                let user = auth.update_name(&name).await?;
                println!("Name set to {}", user.full_name.as_deref().unwrap_or(&name));
            }
            Commands::Repos => {
                let repos = self.client.list_repos().await?;
                if repos.is_empty() {
                    println!("No repositories connected.");
                }
                for repo in repos {
                    let id = repo.get("id").map(|v| v.to_string()).unwrap_or_default();
                    let name = repo
                        .get("full_name")
                        .or_else(|| repo.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("?");
                    println!("{:>6}  {}", id, name);
                }
            }
            Commands::AddRepo { url } => {
                let repo = self.client.create_repo(&url).await?;
                self.console
                    .notify(&format!("Repository {} connected", repo.name), ToastKind::Success);
                println!("{}", repo.id);
            }
            Commands::Analyze { repo_id } => {
                let submitted = self.client.start_analysis(repo_id).await?;
                let task_id = submitted
                    .task_id
                    .ok_or_else(|| ApiError::InvalidInput("No task id returned".to_string()))?;
                let registry = self.registry().await;
                registry
                    .write()
                    .await
                    .add(TaskItem::analysis(task_id.clone(), repo_id))
                    .await?;
                self.console.notify("Analysis started", ToastKind::Info);
                println!("{}", task_id);
            }
            Commands::GenerateDocs { repo_id, doc_type } => {
                let submitted = self.client.generate_docs(repo_id, doc_type.as_str()).await?;
                let task_id = submitted
                    .task_id
                    .ok_or_else(|| ApiError::InvalidInput("No task id returned".to_string()))?;
                let registry = self.registry().await;
                registry
                    .write()
                    .await
                    .add(TaskItem::docs(task_id.clone(), repo_id, doc_type.as_str()))
                    .await?;
                self.console.notify("Documentation generation started", ToastKind::Info);
                println!("{}", task_id);
            }
            Commands::Docs { repo_id, doc_type } => {
                let docs: Documentation = self.client.get_docs(repo_id, doc_type.as_str()).await?;
                println!("{}", docs.content);
            }
            Commands::Tasks => {
                let registry = self.registry().await;
                let registry = registry.read().await;
                if registry.is_empty() {
                    println!("No tracked tasks.");
                }
                for task in registry.tasks() {
                    println!(
                        "{}  {:<9}  repo {:<5}  {}  ({})",
                        task.id,
                        task.status,
                        task.subject_id,
                        task.label,
                        task.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            Commands::Dismiss { task_id } => {
                let registry = self.registry().await;
                if registry.write().await.remove(&task_id).await? {
                    println!("Dismissed {}", task_id);
                } else {
                    println!("No task {}", task_id);
                }
            }
            Commands::Watch { forever } => {
                let registry = self.registry().await;
                let poller =
                    TaskPoller::new(self.client.clone()).with_interval(self.config.poll_interval);
                if forever {
                    poller.run(&registry, &mut self.console, &self.cancel).await;
                } else {
                    poller
                        .run_until_idle(&registry, &mut self.console, &self.cancel)
                        .await;
                }
                let remaining = registry.read().await.active().len();
                if remaining > 0 {
                    println!("{} task(s) still active.", remaining);
                }
            }
            Commands::Ask {
                repo_id,
                query,
                session,
                no_stream,
            } => {
                let mut chat = match session {
                    Some(id) => ChatSession::resume(repo_id, id),
                    None => ChatSession::new(repo_id),
                };
                if no_stream {
                    println!("{}", chat.ask_once(&self.client, &query).await?);
                } else {
                    self.exchange(&mut chat, &query).await?;
                }
                if let Some(id) = chat.state().session_id {
                    eprintln!("session: {}", id);
                }
            }
            Commands::Chat { repo_id, session } => {
                let mut chat = match session {
                    Some(id) => ChatSession::resume(repo_id, id),
                    None => ChatSession::new(repo_id),
                };
                let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
                loop {
                    eprint!("> ");
                    let line = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        line = lines.next_line() => line,
                    };
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Failed to read input: {}", e);
                            break;
                        }
                    };
                    let query = line.trim();
                    if query.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.exchange(&mut chat, query).await {
                        if e.is_unauthorized() {
                            return Err(e);
                        }
                        e.surface(&mut self.console);
                    }
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stream one answer to stdout.
    async fn exchange(&mut self, chat: &mut ChatSession, query: &str) -> Result<(), ApiError> {
        let mut stdout = std::io::stdout();
        let outcome = chat
            .ask(&self.client, query, &self.cancel, |event| {
                if let ChatEvent::Text { content } = event {
                    let _ = write!(stdout, "{}", content);
                    let _ = stdout.flush();
                }
            })
            .await;
        println!();

        match outcome {
            ExchangeOutcome::Completed => Ok(()),
            ExchangeOutcome::Cancelled => {
                eprintln!("(cancelled)");
                Ok(())
            }
            ExchangeOutcome::Rejected { status: 401 } => {
                Err(ApiError::StreamRejected { status: 401 })
            }
            ExchangeOutcome::Rejected { .. } => {
                let message = chat.state().error.clone().unwrap_or_default();
                self.console.notify(&message, ToastKind::Error);
                Ok(())
            }
            ExchangeOutcome::Failed(message) => {
                self.console.notify(&message, ToastKind::Error);
                Ok(())
            }
        }
    }
}
