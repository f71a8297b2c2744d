//! CLI interface for gchat - Google Chat from the terminal.

use std::env;
use std::fs;
use std::future::Future;
use std::io::{self, BufRead as _, IsTerminal, Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::Target;
use env_logger::fmt::WriteStyle;
use gchat_core::chat::models::next_page_token;
use gchat_core::chat::{
    ApiError, AuthenticatedTransport, AuthorizationFlow, ChatClient, CreateMessage,
    CredentialResolver, Credentials, CustomEmoji, ListMembers, ListMessages, Membership, Message,
    OAuthEndpoints, Page, PageRequest, Reaction, SearchSpaces, Space, TokenStore,
    build_http_client, normalize_name,
};
use gchat_core::config::ADMIN_SCOPES;
use gchat_core::paths::{expand_str_path, write_default_config};
use gchat_core::{APP_NAME, AppConfig, AppPaths, CoreError, LogLevel, write_generated_files};
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt as _;

/// Repository URL for the schema `$id`.
const REPO_URL: &str = "https://github.com/byteowlz/gchat";

/// Whether stdout output may carry ANSI styling.
static STYLED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.common.verbose;

    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, verbose);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn try_main(cli: Cli) -> Result<()> {
    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Auth { subcommand } => {
            let limit = match subcommand {
                AuthSubcommand::Login => None,
                _ => ctx.command_timeout(),
            };
            ctx.block_on(limit, handle_auth(&ctx, subcommand))
        }
        Command::Spaces { command } => {
            ctx.block_on(ctx.command_timeout(), handle_spaces(&ctx, command))
        }
        Command::Messages { command } => {
            ctx.block_on(ctx.command_timeout(), handle_messages(&ctx, command))
        }
        Command::Members { command } => {
            ctx.block_on(ctx.command_timeout(), handle_members(&ctx, command))
        }
        Command::Reactions { command } => {
            ctx.block_on(ctx.command_timeout(), handle_reactions(&ctx, command))
        }
        Command::Attachments { command } => {
            ctx.block_on(ctx.command_timeout(), handle_attachments(&ctx, command))
        }
        Command::Emoji { command } => {
            ctx.block_on(ctx.command_timeout(), handle_emoji(&ctx, command))
        }
        Command::Media { command } => {
            ctx.block_on(ctx.command_timeout(), handle_media(&ctx, command))
        }
        Command::Events { command } => {
            ctx.block_on(ctx.command_timeout(), handle_events(&ctx, command))
        }
        Command::Readstate { command } => {
            ctx.block_on(ctx.command_timeout(), handle_readstate(&ctx, command))
        }
        Command::Notifications { command } => {
            ctx.block_on(ctx.command_timeout(), handle_notifications(&ctx, command))
        }
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "gchat",
    author,
    version,
    about = "Google Chat from the terminal",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not change anything on disk.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", global = true)]
    pub assume_yes: bool,
    /// Act with Workspace administrator privileges (`useAdminAccess`).
    #[arg(long, global = true)]
    pub admin: bool,
    /// OAuth2 client ID (overrides config and environment).
    #[arg(long, value_name = "ID", global = true)]
    pub client_id: Option<String>,
    /// OAuth2 client secret (overrides config and environment).
    #[arg(long, value_name = "SECRET", global = true)]
    pub client_secret: Option<String>,
    /// Token file location (overrides `auth.token_file`).
    #[arg(long, value_name = "PATH", global = true)]
    pub token_file: Option<PathBuf>,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authentication management.
    Auth {
        #[command(subcommand)]
        subcommand: AuthSubcommand,
    },
    /// Spaces, group chats and direct messages.
    Spaces {
        #[command(subcommand)]
        command: SpacesCommand,
    },
    /// Messages in a space.
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    /// Space memberships.
    Members {
        #[command(subcommand)]
        command: MembersCommand,
    },
    /// Emoji reactions on messages.
    Reactions {
        #[command(subcommand)]
        command: ReactionsCommand,
    },
    /// Message attachments.
    Attachments {
        #[command(subcommand)]
        command: AttachmentsCommand,
    },
    /// Custom emoji of the organization.
    Emoji {
        #[command(subcommand)]
        command: EmojiCommand,
    },
    /// Upload and download attachment content.
    Media {
        #[command(subcommand)]
        command: MediaCommand,
    },
    /// Space events.
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Read state of spaces and threads.
    Readstate {
        #[command(subcommand)]
        command: ReadStateCommand,
    },
    /// Per-space notification settings.
    Notifications {
        #[command(subcommand)]
        command: NotificationsCommand,
    },
    /// Create config directories and default files.
    Init(InitCommand),
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum AuthSubcommand {
    /// Authorize gchat in the browser and store the token.
    Login,
    /// Remove the stored token.
    Logout,
    /// Show whether a usable token is stored.
    Status,
}

/// Paging flags shared by list commands.
#[derive(Debug, Clone, Args)]
struct PageOpts {
    /// Maximum number of items per page (server default when omitted).
    #[arg(long, value_name = "N")]
    page_size: Option<u32>,
    /// Continue from a previous page.
    #[arg(long, value_name = "TOKEN")]
    page_token: Option<String>,
    /// Follow `nextPageToken` until every page is fetched.
    #[arg(long)]
    all: bool,
}

impl PageOpts {
    fn request(&self) -> PageRequest {
        PageRequest {
            page_size: self.page_size.unwrap_or(0),
            page_token: self.page_token.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum SpacesCommand {
    /// List spaces you are a member of.
    List {
        /// Filter, e.g. `spaceType = "SPACE"`.
        #[arg(long, default_value = "")]
        filter: String,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Show a space.
    Get {
        /// Space name (`spaces/AAAA` or `AAAA`).
        name: String,
    },
    /// Create a named space.
    Create {
        /// Display name of the new space.
        display_name: String,
        /// Space description.
        #[arg(long)]
        description: Option<String>,
        /// Idempotency key.
        #[arg(long, default_value = "")]
        request_id: String,
    },
    /// Rename a space or change its description.
    Update {
        /// Space name.
        name: String,
        /// New display name.
        #[arg(long)]
        display_name: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a space.
    Delete {
        /// Space name.
        name: String,
    },
    /// Search spaces (administrators only).
    Search {
        /// Search query, e.g. `customer = "customers/my_customer" AND spaceType = "SPACE"`.
        query: String,
        /// Sort order, e.g. `create_time desc`.
        #[arg(long, default_value = "")]
        order_by: String,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Create a space and add members in one call.
    Setup {
        /// Display name (omit for a group chat or direct message).
        #[arg(long)]
        display_name: Option<String>,
        /// Space type.
        #[arg(long, value_enum, default_value_t = SpaceType::Space)]
        space_type: SpaceType,
        /// Members to add (`users/{id}`, `users/{email}` or bare ID), repeatable.
        #[arg(long = "member", value_name = "USER")]
        members: Vec<String>,
    },
    /// Find the direct message space with a user.
    FindDm {
        /// User (`users/{id}`, `users/{email}` or bare ID).
        user: String,
    },
    /// Finish importing a space created in import mode.
    CompleteImport {
        /// Space name.
        name: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SpaceType {
    /// Named space.
    Space,
    /// Unnamed group conversation.
    GroupChat,
    /// One-to-one conversation.
    DirectMessage,
}

impl SpaceType {
    const fn api_name(self) -> &'static str {
        match self {
            Self::Space => "SPACE",
            Self::GroupChat => "GROUP_CHAT",
            Self::DirectMessage => "DIRECT_MESSAGE",
        }
    }
}

#[derive(Debug, Subcommand)]
enum MessagesCommand {
    /// List messages in a space.
    List {
        /// Space name.
        space: String,
        /// Filter, e.g. `createTime > "2024-01-01T00:00:00Z"`.
        #[arg(long, default_value = "")]
        filter: String,
        /// `createTime asc` or `createTime desc`.
        #[arg(long, default_value = "")]
        order_by: String,
        /// Include deleted messages.
        #[arg(long)]
        show_deleted: bool,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Show a message.
    Get {
        /// Message name (`spaces/AAAA/messages/BBBB`).
        name: String,
    },
    /// Send a text message (`-` reads the text from stdin).
    Send {
        /// Space name.
        space: String,
        /// Message text.
        text: String,
        /// Start or continue the thread with this key.
        #[arg(long)]
        thread_key: Option<String>,
        /// Reply in the keyed thread, or start a new one if it does not exist.
        #[arg(long, requires = "thread_key")]
        reply: bool,
        /// Idempotency key.
        #[arg(long, default_value = "")]
        request_id: String,
        /// Client-assigned message ID (`client-...`).
        #[arg(long, default_value = "")]
        message_id: String,
    },
    /// Replace the text of a message.
    Update {
        /// Message name.
        name: String,
        /// New text (`-` reads stdin).
        text: String,
        /// Create the message if it does not exist (requires a client message ID).
        #[arg(long)]
        allow_missing: bool,
    },
    /// Delete a message.
    Delete {
        /// Message name.
        name: String,
        /// Also delete threaded replies.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum MembersCommand {
    /// List members of a space.
    List {
        /// Space name.
        space: String,
        /// Filter, e.g. `role = "ROLE_MANAGER"`.
        #[arg(long, default_value = "")]
        filter: String,
        /// Include pending invitations.
        #[arg(long)]
        show_invited: bool,
        /// Include Google Groups memberships.
        #[arg(long)]
        show_groups: bool,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Show a membership.
    Get {
        /// Membership name (`spaces/AAAA/members/BBBB`).
        name: String,
    },
    /// Add a user to a space.
    Add {
        /// Space name.
        space: String,
        /// User (`users/{id}`, `users/{email}` or bare ID).
        user: String,
        /// Membership role.
        #[arg(long, value_enum)]
        role: Option<MemberRole>,
    },
    /// Change the role of a member.
    Update {
        /// Membership name.
        name: String,
        /// New role.
        #[arg(long, value_enum)]
        role: MemberRole,
    },
    /// Remove a member from a space.
    Remove {
        /// Membership name.
        name: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MemberRole {
    /// Regular member.
    Member,
    /// Space manager.
    Manager,
}

impl MemberRole {
    const fn api_name(self) -> &'static str {
        match self {
            Self::Member => "ROLE_MEMBER",
            Self::Manager => "ROLE_MANAGER",
        }
    }
}

#[derive(Debug, Subcommand)]
enum ReactionsCommand {
    /// List reactions on a message.
    List {
        /// Message name.
        message: String,
        /// Filter, e.g. `emoji.unicode = "🙂"`.
        #[arg(long, default_value = "")]
        filter: String,
        #[command(flatten)]
        page: PageOpts,
    },
    /// React to a message with a unicode emoji.
    Add {
        /// Message name.
        message: String,
        /// Emoji character.
        emoji: String,
    },
    /// Remove a reaction.
    Remove {
        /// Reaction name (`spaces/AAAA/messages/BBBB/reactions/CCCC`).
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum AttachmentsCommand {
    /// Show attachment metadata.
    Get {
        /// Attachment name (`spaces/AAAA/messages/BBBB/attachments/CCCC`).
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum EmojiCommand {
    /// List custom emoji.
    List {
        /// Filter, e.g. `creator("users/me")`.
        #[arg(long, default_value = "")]
        filter: String,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Show a custom emoji.
    Get {
        /// Emoji name (`customEmojis/{id}` or bare ID).
        name: String,
    },
    /// Create a custom emoji from an image.
    Create {
        /// Shortcode, e.g. `:party-owl:`.
        shortcode: String,
        /// Image file (PNG, JPEG or GIF).
        file: PathBuf,
    },
    /// Delete a custom emoji.
    Delete {
        /// Emoji name.
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum MediaCommand {
    /// Upload a file to a space; prints the attachment reference.
    Upload {
        /// Space name.
        space: String,
        /// File to upload.
        file: PathBuf,
    },
    /// Download attachment content by its resource name.
    Download {
        /// `attachmentDataRef.resourceName` of the attachment.
        resource_name: String,
        /// Destination file (`-` for stdout).
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum EventsCommand {
    /// List events in a space.
    List {
        /// Space name.
        space: String,
        /// Event-type filter, e.g. `event_types:"google.workspace.chat.message.v1.created"`.
        #[arg(long)]
        filter: String,
        #[command(flatten)]
        page: PageOpts,
    },
    /// Show a space event.
    Get {
        /// Event name (`spaces/AAAA/spaceEvents/BBBB`).
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum ReadStateCommand {
    /// Show when you last read a space.
    Get {
        /// Space name or full `users/.../spaceReadState` name.
        space: String,
    },
    /// Mark a space as read up to a point in time.
    Update {
        /// Space name or full `users/.../spaceReadState` name.
        space: String,
        /// RFC 3339 timestamp (defaults to now).
        #[arg(long)]
        last_read_time: Option<String>,
    },
    /// Show when you last read a thread.
    Thread {
        /// Thread name (`spaces/AAAA/threads/BBBB`) or full `threadReadState` name.
        thread: String,
    },
}

#[derive(Debug, Subcommand)]
enum NotificationsCommand {
    /// Show your notification setting for a space.
    Get {
        /// Space name or full `users/.../spaceNotificationSetting` name.
        space: String,
    },
    /// Change your notification setting for a space.
    Update {
        /// Space name or full `users/.../spaceNotificationSetting` name.
        space: String,
        /// `ALL`, `MAIN_CONVERSATIONS`, `FOR_YOU` or `OFF`.
        #[arg(long)]
        notification_setting: Option<String>,
        /// `MUTED` or `UNMUTED`.
        #[arg(long)]
        mute_setting: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists.
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration.
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print all resolved paths.
    Paths,
    /// Print the JSON schema.
    Schema,
    /// Regenerate the default configuration file.
    Reset,
    /// Write `config.schema.json` and an example `config.toml` to a directory.
    Generate {
        /// Output directory.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let config = AppConfig::load(&paths, common.dry_run)?;
        let paths = paths
            .apply_overrides(&config)?
            .with_token_file(common.token_file.as_deref())?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        STYLED.store(ctx.stdout_styled(), Ordering::Relaxed);
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !io::stderr().is_terminal());

        if let Some(file) = &self.config.logging.file {
            let path = expand_str_path(file)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let sink = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.target(Target::Pipe(Box::new(sink)));
            builder.write_style(WriteStyle::Never);
        } else if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    const fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => match self.config.logging.level {
                    LogLevel::Error => LevelFilter::Error,
                    LogLevel::Warn => LevelFilter::Warn,
                    LogLevel::Info => LevelFilter::Info,
                    LogLevel::Debug => LevelFilter::Debug,
                    LogLevel::Trace => LevelFilter::Trace,
                },
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn stdout_styled(&self) -> bool {
        if self.common.json
            || self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
        {
            return false;
        }
        matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some()
            || io::stdout().is_terminal()
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            self.paths.log_dry_run();
            return Ok(());
        }
        self.paths.ensure_directories()
    }

    /// Per-command deadline from `runtime.timeout`; `0` disables it.
    fn command_timeout(&self) -> Option<Duration> {
        self.config
            .runtime
            .timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Run `fut` to completion unless it times out or Ctrl-C arrives.
    /// Either way the future is dropped, closing its connections.
    fn block_on<F>(&self, limit: Option<Duration>, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let rt = tokio::runtime::Runtime::new().context("starting async runtime")?;
        rt.block_on(async {
            let bounded = async {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                        anyhow!(
                            "command timed out after {}s (see runtime.timeout)",
                            limit.as_secs()
                        )
                    })?,
                    None => fut.await,
                }
            };
            tokio::select! {
                result = bounded => result,
                _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
            }
        })
    }

    fn token_store(&self) -> TokenStore {
        TokenStore::new(&self.paths.token_file)
    }

    fn credentials(&self) -> Result<Credentials> {
        let resolver = CredentialResolver::new(&self.config.auth);
        Ok(resolver.resolve(
            self.common.client_id.as_deref(),
            self.common.client_secret.as_deref(),
        )?)
    }

    fn chat_client(&self) -> Result<ChatClient> {
        let credentials = self.credentials()?;
        let http = build_http_client(&self.config.api)?;
        let endpoints = OAuthEndpoints::from_config(&self.config.auth)?;
        let transport = AuthenticatedTransport::from_store(
            http,
            credentials,
            endpoints.token_url,
            self.token_store(),
        )?;
        Ok(ChatClient::new(
            Arc::new(transport),
            &self.config.api.base_url,
        ))
    }

    fn scopes(&self) -> Vec<String> {
        let mut scopes = self.config.auth.scopes.clone();
        if self.common.admin {
            for scope in ADMIN_SCOPES {
                if !scopes.iter().any(|s| s == scope) {
                    scopes.push((*scope).to_string());
                }
            }
        }
        scopes
    }

    /// Print `value` as JSON in `--json` mode, otherwise through `text`.
    fn emit(&self, value: &Value, text: impl FnOnce(&Value) -> Result<()>) -> Result<()> {
        if self.common.json {
            print_json(value)
        } else {
            text(value)
        }
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.common.assume_yes {
            return Ok(true);
        }
        if !io::stdin().is_terminal() {
            bail!("{prompt} (refusing without a terminal; pass --yes)");
        }
        eprint!("{prompt} [y/N] ");
        io::stderr().flush().context("flushing prompt")?;
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("reading answer")?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn handle_auth(ctx: &RuntimeContext, cmd: AuthSubcommand) -> Result<()> {
    let store = ctx.token_store();

    match cmd {
        AuthSubcommand::Login => {
            if store.exists()
                && !ctx.confirm(&format!(
                    "A token is already stored at {}. Log in again?",
                    store.path().display()
                ))?
            {
                println!("Keeping the existing token.");
                return Ok(());
            }

            let credentials = ctx.credentials()?;
            let http = build_http_client(&ctx.config.api)?;
            let endpoints = OAuthEndpoints::from_config(&ctx.config.auth)?;
            let mut flow = AuthorizationFlow::new(http, endpoints, credentials, ctx.scopes())
                .with_timeout(Duration::from_secs(ctx.config.runtime.login_timeout));

            let token = flow
                .run(|url| {
                    eprintln!("Open this URL in your browser to authorize {APP_NAME}:\n");
                    eprintln!("  {url}\n");
                    if let Err(e) = open::that_detached(url.as_str()) {
                        warn!("could not open a browser: {e}");
                    }
                    eprintln!("Waiting for authorization...");
                })
                .await
                .map_err(CoreError::from)?;

            if ctx.common.dry_run {
                info!("dry-run: would save token to {}", store.path().display());
                return Ok(());
            }
            store.save(&token)?;
            println!("Logged in. Token saved to {}", store.path().display());
            Ok(())
        }
        AuthSubcommand::Logout => {
            if !store.exists() {
                println!("Not logged in.");
                return Ok(());
            }
            if ctx.common.dry_run {
                info!("dry-run: would delete {}", store.path().display());
                return Ok(());
            }
            store.delete()?;
            println!("Logged out. Removed {}", store.path().display());
            Ok(())
        }
        AuthSubcommand::Status => {
            let status = AuthStatus::inspect(&store);
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status).context("serializing status to JSON")?
                );
            } else {
                status.print();
            }
            Ok(())
        }
    }
}

/// Snapshot of the stored token for `auth status`.
#[derive(Debug, Serialize)]
struct AuthStatus {
    state: AuthState,
    token_file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refreshable: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum AuthState {
    NotLoggedIn,
    Corrupt,
    Expired,
    Valid,
}

impl AuthStatus {
    fn inspect(store: &TokenStore) -> Self {
        let mut status = Self {
            state: AuthState::NotLoggedIn,
            token_file: store.path().to_path_buf(),
            expiry: None,
            refreshable: None,
            scopes: Vec::new(),
            problem: None,
        };
        match store.load() {
            Ok(token) => {
                status.state = if token.is_expired() {
                    AuthState::Expired
                } else {
                    AuthState::Valid
                };
                status.expiry = token
                    .expiry
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
                status.refreshable = Some(token.can_refresh());
                status.scopes = token.scopes.into_iter().collect();
            }
            Err(CoreError::NotAuthenticated(_)) => {}
            Err(CoreError::CorruptToken { reason, .. }) => {
                status.state = AuthState::Corrupt;
                status.problem = Some(reason);
            }
            Err(e) => {
                status.state = AuthState::Corrupt;
                status.problem = Some(e.to_string());
            }
        }
        status
    }

    fn print(&self) {
        let file = self.token_file.display();
        match self.state {
            AuthState::NotLoggedIn => {
                println!("Not logged in. Run '{APP_NAME} auth login' to authenticate.");
            }
            AuthState::Corrupt => {
                println!("Token file {file} cannot be read.");
                if let Some(problem) = &self.problem {
                    println!("  {}", dim(problem));
                }
                println!("Run '{APP_NAME} auth login' to replace it.");
            }
            AuthState::Expired => {
                let expiry = self.expiry.as_deref().unwrap_or("unknown");
                if self.refreshable == Some(true) {
                    println!("Access token expired at {expiry}; it will be refreshed on next use.");
                } else {
                    println!(
                        "Access token expired at {expiry} and cannot be refreshed. Run '{APP_NAME} auth login'."
                    );
                }
            }
            AuthState::Valid => match &self.expiry {
                Some(expiry) => println!("Logged in. Access token valid until {expiry}."),
                None => println!("Logged in. Access token has no recorded expiry."),
            },
        }
        if matches!(self.state, AuthState::Expired | AuthState::Valid) {
            println!("Token file: {file}");
            if !self.scopes.is_empty() {
                println!("Scopes:");
                for scope in &self.scopes {
                    println!("  {}", dim(scope));
                }
            }
        }
    }
}

async fn handle_spaces(ctx: &RuntimeContext, command: SpacesCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let spaces = client.spaces();
    let admin = ctx.common.admin;

    match command {
        SpacesCommand::List { filter, page } => {
            let filter = filter.as_str();
            let value = collect_pages(&page, "spaces", |p| async move {
                spaces.list(filter, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "spaces", "No spaces.", |s: &Space| {
                    format!(
                        "{}  {}  {}",
                        bold(s.title()),
                        dim(&s.name),
                        s.space_type.as_deref().unwrap_or_default()
                    )
                })
            })
        }
        SpacesCommand::Get { name } => {
            let value = spaces.get(&name, admin).await?;
            ctx.emit(&value, print_space)
        }
        SpacesCommand::Create {
            display_name,
            description,
            request_id,
        } => {
            let mut body = json!({ "spaceType": "SPACE", "displayName": display_name });
            if let Some(description) = description {
                body["spaceDetails"] = json!({ "description": description });
            }
            let value = spaces.create(&body, &request_id).await?;
            ctx.emit(&value, print_space)
        }
        SpacesCommand::Update {
            name,
            display_name,
            description,
        } => {
            let mut body = json!({});
            let mut mask = Vec::new();
            if let Some(display_name) = display_name {
                body["displayName"] = json!(display_name);
                mask.push("displayName");
            }
            if let Some(description) = description {
                body["spaceDetails"] = json!({ "description": description });
                mask.push("spaceDetails");
            }
            if mask.is_empty() {
                bail!("nothing to update: pass --display-name and/or --description");
            }
            let value = spaces.patch(&name, &body, &mask.join(","), admin).await?;
            ctx.emit(&value, print_space)
        }
        SpacesCommand::Delete { name } => {
            if !ctx.confirm(&format!("Delete space {name} and all of its messages?"))? {
                return Ok(());
            }
            let value = spaces.delete(&name, admin).await?;
            ctx.emit(&value, |_| {
                println!("Deleted {}", normalize_name(&name, "spaces"));
                Ok(())
            })
        }
        SpacesCommand::Search {
            query,
            order_by,
            page,
        } => {
            let options = SearchSpaces {
                query,
                order_by,
                admin: true,
            };
            let options = &options;
            let value = collect_pages(&page, "spaces", |p| async move {
                spaces.search(options, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "spaces", "No matching spaces.", |s: &Space| {
                    format!("{}  {}", bold(s.title()), dim(&s.name))
                })
            })
        }
        SpacesCommand::Setup {
            display_name,
            space_type,
            members,
        } => {
            let mut space = json!({ "spaceType": space_type.api_name() });
            if let Some(display_name) = display_name {
                space["displayName"] = json!(display_name);
            }
            let memberships: Vec<Value> = members
                .iter()
                .map(|user| {
                    json!({ "member": { "name": normalize_name(user, "users"), "type": "HUMAN" } })
                })
                .collect();
            let body = json!({ "space": space, "memberships": memberships });
            let value = spaces.setup(&body).await?;
            ctx.emit(&value, print_space)
        }
        SpacesCommand::FindDm { user } => {
            let value = spaces.find_direct_message(&user).await?;
            ctx.emit(&value, print_space)
        }
        SpacesCommand::CompleteImport { name } => {
            let value = spaces.complete_import(&name).await?;
            ctx.emit(&value, |_| {
                println!("Import completed for {}", normalize_name(&name, "spaces"));
                Ok(())
            })
        }
    }
}

async fn handle_messages(ctx: &RuntimeContext, command: MessagesCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let messages = client.messages();

    match command {
        MessagesCommand::List {
            space,
            filter,
            order_by,
            show_deleted,
            page,
        } => {
            let options = ListMessages {
                filter,
                order_by,
                show_deleted,
            };
            let (space, options) = (space.as_str(), &options);
            let value = collect_pages(&page, "messages", |p| async move {
                messages.list(space, options, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "messages", "No messages.", format_message)
            })
        }
        MessagesCommand::Get { name } => {
            let value = messages.get(&name).await?;
            ctx.emit(&value, print_message)
        }
        MessagesCommand::Send {
            space,
            text,
            thread_key,
            reply,
            request_id,
            message_id,
        } => {
            let text = read_text(&text)?;
            let mut body = json!({ "text": text });
            if let Some(key) = &thread_key {
                body["thread"] = json!({ "threadKey": key });
            }
            let options = CreateMessage {
                thread_key: thread_key.unwrap_or_default(),
                request_id,
                message_id,
                reply_option: if reply {
                    "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD".to_string()
                } else {
                    String::new()
                },
            };
            let value = messages.create(&space, &body, &options).await?;
            ctx.emit(&value, |v| {
                println!("Sent {}", v["name"].as_str().unwrap_or_default());
                Ok(())
            })
        }
        MessagesCommand::Update {
            name,
            text,
            allow_missing,
        } => {
            let body = json!({ "text": read_text(&text)? });
            let value = messages.patch(&name, &body, "text", allow_missing).await?;
            ctx.emit(&value, print_message)
        }
        MessagesCommand::Delete { name, force } => {
            let value = messages.delete(&name, force).await?;
            ctx.emit(&value, |_| {
                println!("Deleted {name}");
                Ok(())
            })
        }
    }
}

async fn handle_members(ctx: &RuntimeContext, command: MembersCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let members = client.members();
    let admin = ctx.common.admin;

    match command {
        MembersCommand::List {
            space,
            filter,
            show_invited,
            show_groups,
            page,
        } => {
            let options = ListMembers {
                filter,
                show_invited,
                show_groups,
                admin,
            };
            let (space, options) = (space.as_str(), &options);
            let value = collect_pages(&page, "memberships", |p| async move {
                members.list(space, options, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "memberships", "No members.", format_membership)
            })
        }
        MembersCommand::Get { name } => {
            let value = members.get(&name, admin).await?;
            ctx.emit(&value, print_json)
        }
        MembersCommand::Add { space, user, role } => {
            let mut body =
                json!({ "member": { "name": normalize_name(&user, "users"), "type": "HUMAN" } });
            if let Some(role) = role {
                body["role"] = json!(role.api_name());
            }
            let value = members.create(&space, &body, admin).await?;
            ctx.emit(&value, |v| {
                println!("Added {}", v["name"].as_str().unwrap_or_default());
                Ok(())
            })
        }
        MembersCommand::Update { name, role } => {
            let body = json!({ "role": role.api_name() });
            let value = members.patch(&name, &body, "role", admin).await?;
            ctx.emit(&value, print_json)
        }
        MembersCommand::Remove { name } => {
            let value = members.delete(&name, admin).await?;
            ctx.emit(&value, |_| {
                println!("Removed {name}");
                Ok(())
            })
        }
    }
}

async fn handle_reactions(ctx: &RuntimeContext, command: ReactionsCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let reactions = client.reactions();

    match command {
        ReactionsCommand::List {
            message,
            filter,
            page,
        } => {
            let (message, filter) = (message.as_str(), filter.as_str());
            let value = collect_pages(&page, "reactions", |p| async move {
                reactions.list(message, filter, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "reactions", "No reactions.", |r: &Reaction| {
                    let who = r.user.as_ref().map_or("", |u| u.name.as_str());
                    let emoji = r.emoji.as_ref().map(|e| e.label()).unwrap_or_default();
                    format!("{emoji}  {who}  {}", dim(&r.name))
                })
            })
        }
        ReactionsCommand::Add { message, emoji } => {
            let body = json!({ "emoji": { "unicode": emoji } });
            let value = reactions.create(&message, &body).await?;
            ctx.emit(&value, |v| {
                println!("Reacted {}", v["name"].as_str().unwrap_or_default());
                Ok(())
            })
        }
        ReactionsCommand::Remove { name } => {
            let value = reactions.delete(&name).await?;
            ctx.emit(&value, |_| {
                println!("Removed {name}");
                Ok(())
            })
        }
    }
}

async fn handle_attachments(ctx: &RuntimeContext, command: AttachmentsCommand) -> Result<()> {
    let client = ctx.chat_client()?;

    match command {
        AttachmentsCommand::Get { name } => {
            let value = client.attachments().get(&name).await?;
            ctx.emit(&value, |v| {
                println!("{}", bold(v["contentName"].as_str().unwrap_or("(unnamed)")));
                println!("  type:     {}", v["contentType"].as_str().unwrap_or("-"));
                if let Some(resource) = v["attachmentDataRef"]["resourceName"].as_str() {
                    println!("  download: {APP_NAME} media download {resource} -o <file>");
                }
                if let Some(drive) = v["driveDataRef"]["driveFileId"].as_str() {
                    println!("  drive:    {drive}");
                }
                Ok(())
            })
        }
    }
}

async fn handle_emoji(ctx: &RuntimeContext, command: EmojiCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let emoji = client.emoji();

    match command {
        EmojiCommand::List { filter, page } => {
            let filter = filter.as_str();
            let value = collect_pages(&page, "customEmojis", |p| async move {
                emoji.list(filter, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                render_page(v, "customEmojis", "No custom emoji.", |e: &CustomEmoji| {
                    format!(
                        "{}  {}",
                        bold(e.emoji_name.as_deref().unwrap_or_default()),
                        dim(&e.name)
                    )
                })
            })
        }
        EmojiCommand::Get { name } => {
            let value = emoji.get(&name).await?;
            ctx.emit(&value, print_json)
        }
        EmojiCommand::Create { shortcode, file } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("{} is not a file", file.display()))?;
            let body = json!({
                "emojiName": shortcode,
                "payload": { "fileContent": BASE64.encode(content), "filename": filename },
            });
            let value = emoji.create(&body).await?;
            ctx.emit(&value, |v| {
                println!("Created {}", v["name"].as_str().unwrap_or_default());
                Ok(())
            })
        }
        EmojiCommand::Delete { name } => {
            let value = emoji.delete(&name).await?;
            ctx.emit(&value, |_| {
                println!("Deleted {name}");
                Ok(())
            })
        }
    }
}

async fn handle_media(ctx: &RuntimeContext, command: MediaCommand) -> Result<()> {
    let client = ctx.chat_client()?;

    match command {
        MediaCommand::Upload { space, file } => {
            let value = client.media().upload(&space, &file).await?;
            ctx.emit(&value, |v| {
                let reference = &v["attachmentDataRef"];
                println!(
                    "Uploaded {}",
                    file.file_name().unwrap_or_default().to_string_lossy()
                );
                if let Some(resource) = reference["resourceName"].as_str() {
                    println!("  resource: {resource}");
                }
                if let Some(token) = reference["attachmentUploadToken"].as_str() {
                    println!("  upload token: {}", dim(token));
                }
                Ok(())
            })
        }
        MediaCommand::Download {
            resource_name,
            output,
        } => {
            let download = client.media().download(&resource_name).await?;
            let content_type = download.content_type.clone();
            let written = if output == Path::new("-") {
                let mut stdout = tokio::io::stdout();
                let n = download.copy_to(&mut stdout).await?;
                stdout.flush().await.context("flushing stdout")?;
                n
            } else {
                save_to_file(&output, async move |file| {
                    download.copy_to(file).await.map_err(anyhow::Error::from)
                })
                .await?
            };
            info!(
                "downloaded {written} bytes ({}) to {}",
                content_type.as_deref().unwrap_or("unknown type"),
                output.display()
            );
            if output != Path::new("-") {
                let value = json!({
                    "path": output,
                    "bytes": written,
                    "contentType": content_type,
                });
                ctx.emit(&value, |_| {
                    println!("Saved {written} bytes to {}", output.display());
                    Ok(())
                })?;
            }
            Ok(())
        }
    }
}

/// Sibling path a download is streamed into before being renamed over `output`.
fn partial_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .ok_or_else(|| anyhow!("{} is not a file path", output.display()))?;
    let mut partial = name.to_os_string();
    partial.push(".part");
    Ok(output.with_file_name(partial))
}

/// Run `write` against a temporary file and move it to `output` on success.
/// On failure the temporary file is removed and `output` is left as it was.
async fn save_to_file<F>(output: &Path, write: F) -> Result<u64>
where
    F: AsyncFnOnce(&mut tokio::fs::File) -> Result<u64>,
{
    let partial = partial_path(output)?;
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;
    let result = async {
        let written = write(&mut file).await?;
        file.flush()
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        Ok::<_, anyhow::Error>(written)
    }
    .await;
    drop(file);

    let result = match result {
        Ok(written) => tokio::fs::rename(&partial, output)
            .await
            .with_context(|| format!("moving download to {}", output.display()))
            .map(|()| written),
        failed @ Err(_) => failed,
    };
    if result.is_err()
        && let Err(err) = tokio::fs::remove_file(&partial).await
    {
        warn!("could not remove {}: {err}", partial.display());
    }
    result
}

async fn handle_events(ctx: &RuntimeContext, command: EventsCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let events = client.events();

    match command {
        EventsCommand::List {
            space,
            filter,
            page,
        } => {
            let (space, filter) = (space.as_str(), filter.as_str());
            let value = collect_pages(&page, "spaceEvents", |p| async move {
                events.list(space, filter, &p).await
            })
            .await?;
            ctx.emit(&value, |v| {
                let items = v["spaceEvents"].as_array().map(Vec::as_slice).unwrap_or_default();
                if items.is_empty() {
                    println!("No events.");
                }
                for event in items {
                    println!(
                        "{}  {}  {}",
                        event["eventTime"].as_str().unwrap_or_default(),
                        bold(event["eventType"].as_str().unwrap_or_default()),
                        dim(event["name"].as_str().unwrap_or_default())
                    );
                }
                print_more(v);
                Ok(())
            })
        }
        EventsCommand::Get { name } => {
            let value = events.get(&name).await?;
            ctx.emit(&value, print_json)
        }
    }
}

async fn handle_readstate(ctx: &RuntimeContext, command: ReadStateCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let read_state = client.read_state();

    match command {
        ReadStateCommand::Get { space } => {
            let name = user_space_setting(&space, "spaceReadState");
            let value = read_state.get_space_read_state(&name).await?;
            ctx.emit(&value, print_read_state)
        }
        ReadStateCommand::Update {
            space,
            last_read_time,
        } => {
            let name = user_space_setting(&space, "spaceReadState");
            let last_read_time = last_read_time
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
            let body = json!({ "lastReadTime": last_read_time });
            let value = read_state
                .update_space_read_state(&name, &body, "lastReadTime")
                .await?;
            ctx.emit(&value, print_read_state)
        }
        ReadStateCommand::Thread { thread } => {
            let name = user_space_setting(&thread, "threadReadState");
            let value = read_state.get_thread_read_state(&name).await?;
            ctx.emit(&value, print_read_state)
        }
    }
}

async fn handle_notifications(ctx: &RuntimeContext, command: NotificationsCommand) -> Result<()> {
    let client = ctx.chat_client()?;
    let notifications = client.notifications();

    match command {
        NotificationsCommand::Get { space } => {
            let name = user_space_setting(&space, "spaceNotificationSetting");
            let value = notifications.get(&name).await?;
            ctx.emit(&value, print_notification_setting)
        }
        NotificationsCommand::Update {
            space,
            notification_setting,
            mute_setting,
        } => {
            let name = user_space_setting(&space, "spaceNotificationSetting");
            let mut body = json!({});
            let mut mask = Vec::new();
            if let Some(setting) = notification_setting {
                body["notificationSetting"] = json!(setting.to_ascii_uppercase());
                mask.push("notificationSetting");
            }
            if let Some(mute) = mute_setting {
                body["muteSetting"] = json!(mute.to_ascii_uppercase());
                mask.push("muteSetting");
            }
            if mask.is_empty() {
                bail!("nothing to update: pass --notification-setting and/or --mute-setting");
            }
            let value = notifications.patch(&name, &body, &mask.join(",")).await?;
            ctx.emit(&value, print_notification_setting)
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }
    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)?;
    println!("Wrote {}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Paths => {
            if ctx.common.json {
                let paths = json!({
                    "config": ctx.paths.config_file,
                    "data": ctx.paths.data_dir,
                    "state": ctx.paths.state_dir,
                    "token": ctx.paths.token_file,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&paths).context("serializing paths to JSON")?
                );
            } else {
                println!("config: {}", ctx.paths.config_file.display());
                println!("data:   {}", ctx.paths.data_dir.display());
                println!("state:  {}", ctx.paths.state_dir.display());
                println!("token:  {}", ctx.paths.token_file.display());
            }
            Ok(())
        }
        ConfigCommand::Schema => {
            println!("{}", gchat_core::generate_schema(REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
        ConfigCommand::Generate { dir } => {
            if ctx.common.dry_run {
                info!("dry-run: would write generated files to {}", dir.display());
                return Ok(());
            }
            write_generated_files(&dir, REPO_URL)?;
            println!("Generated config.schema.json and config.toml in {}", dir.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Paging ──────────────────────────────────────────────────────────

/// Fetch one page, or with `--all` every page merged under `key`.
async fn collect_pages<F, Fut>(page: &PageOpts, key: &str, fetch: F) -> Result<Value>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = Result<Value, CoreError>>,
{
    let mut request = page.request();
    if !page.all {
        return Ok(fetch(request).await?);
    }

    let mut items = Vec::new();
    let mut pages = 0_usize;
    loop {
        let value = fetch(request.clone()).await?;
        pages += 1;
        if let Some(Value::Array(batch)) = value.get(key) {
            items.extend(batch.iter().cloned());
        }
        match next_page_token(&value) {
            Some(token) => request = request.next(token),
            None => break,
        }
    }
    debug!("fetched {} {key} over {pages} page(s)", items.len());

    let mut merged = serde_json::Map::new();
    merged.insert(key.to_string(), Value::Array(items));
    Ok(Value::Object(merged))
}

// ─── Formatting helpers ──────────────────────────────────────────────

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing response to JSON")?
    );
    Ok(())
}

fn render_page<T: DeserializeOwned>(
    value: &Value,
    key: &str,
    empty: &str,
    line: impl Fn(&T) -> String,
) -> Result<()> {
    let page = Page::<T>::from_value(value, key)?;
    if page.items.is_empty() {
        println!("{empty}");
    }
    for item in &page.items {
        println!("{}", line(item));
    }
    print_more(value);
    Ok(())
}

fn print_more(value: &Value) {
    if let Some(token) = next_page_token(value) {
        eprintln!("{}", dim(&format!("more results: --page-token {token} (or --all)")));
    }
}

fn print_space(value: &Value) -> Result<()> {
    let space: Space = serde_json::from_value(value.clone()).context("decoding space")?;
    println!("{}", bold(space.title()));
    println!("  name:    {}", space.name);
    if let Some(kind) = &space.space_type {
        println!("  type:    {kind}");
    }
    if let Some(threading) = &space.space_threading_state {
        println!("  threads: {threading}");
    }
    if let Some(created) = &space.create_time {
        println!("  created: {created}");
    }
    if let Some(active) = &space.last_active_time {
        println!("  active:  {active}");
    }
    Ok(())
}

fn format_message(message: &Message) -> String {
    let sender = message.sender.as_ref().map_or("unknown", |u| {
        u.display_name.as_deref().unwrap_or(u.name.as_str())
    });
    let time = message.create_time.as_deref().unwrap_or_default();
    let text = message.text.as_deref().unwrap_or_default().replace('\n', " ");
    format!(
        "{}  {}  {}\n    {}",
        dim(time),
        bold(sender),
        truncate(&text, 100),
        dim(&message.name)
    )
}

fn print_message(value: &Value) -> Result<()> {
    let message: Message = serde_json::from_value(value.clone()).context("decoding message")?;
    let sender = message.sender.as_ref().map_or("unknown", |u| {
        u.display_name.as_deref().unwrap_or(u.name.as_str())
    });
    println!("{}  {}", bold(sender), dim(message.create_time.as_deref().unwrap_or_default()));
    println!("{}", message.text.as_deref().unwrap_or_default());
    println!("{}", dim(&message.name));
    if let Some(thread) = &message.thread {
        println!("{}", dim(&format!("thread: {}", thread.name)));
    }
    Ok(())
}

fn format_membership(membership: &Membership) -> String {
    let member = membership.member.as_ref();
    let who = member
        .and_then(|u| u.display_name.as_deref())
        .or_else(|| member.map(|u| u.name.as_str()))
        .unwrap_or("unknown");
    format!(
        "{}  {}  {}  {}",
        bold(who),
        membership.role.as_deref().unwrap_or_default(),
        membership.state.as_deref().unwrap_or_default(),
        dim(&membership.name)
    )
}

fn print_read_state(value: &Value) -> Result<()> {
    println!(
        "{}  last read {}",
        value["name"].as_str().unwrap_or_default(),
        value["lastReadTime"].as_str().unwrap_or("never")
    );
    Ok(())
}

fn print_notification_setting(value: &Value) -> Result<()> {
    println!("{}", value["name"].as_str().unwrap_or_default());
    println!(
        "  notifications: {}",
        value["notificationSetting"].as_str().unwrap_or("-")
    );
    println!("  mute:          {}", value["muteSetting"].as_str().unwrap_or("-"));
    Ok(())
}

/// Expand a space or thread name into a `users/me/.../{leaf}` resource name.
/// Names already rooted at `users/` are used as given.
fn user_space_setting(name: &str, leaf: &str) -> String {
    if name.starts_with("users/") {
        name.to_string()
    } else {
        format!("users/me/{}/{leaf}", normalize_name(name, "spaces"))
    }
}

/// `-` reads the whole of stdin.
fn read_text(text: &str) -> Result<String> {
    if text != "-" {
        return Ok(text.to_string());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading message text from stdin")?;
    Ok(buffer.trim_end_matches('\n').to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 1).collect();
        format!("{truncated}...")
    }
}

fn bold(s: &str) -> String {
    if STYLED.load(Ordering::Relaxed) {
        format!("\x1b[1m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn dim(s: &str) -> String {
    if STYLED.load(Ordering::Relaxed) {
        format!("\x1b[2m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

fn core_error(err: &anyhow::Error) -> Option<&CoreError> {
    err.chain().find_map(|e| e.downcast_ref::<CoreError>())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    core_error(err).map_or(1, |e| e.kind().exit_code())
}

fn report_error(err: &anyhow::Error, verbose: u8) {
    match core_error(err).and_then(CoreError::api_error) {
        Some(api) => print_api_error(api, verbose),
        None => eprintln!("Error: {err:#}"),
    }
}

fn print_api_error(api: &ApiError, verbose: u8) {
    eprintln!("API Error {} ({})", api.code, api.status);
    if !api.message.is_empty() {
        eprintln!("  {}", api.message);
    }
    if let Some(hint) = api.hint() {
        eprintln!();
        for line in hint.lines() {
            eprintln!("  {line}");
        }
    }
    let links: Vec<_> = api.help_links().collect();
    if !links.is_empty() {
        eprintln!();
        eprintln!("  Help:");
        for link in links {
            eprintln!("    {}: {}", link.description, link.url);
        }
    }
    if verbose == 0 {
        return;
    }
    if let Some(reason) = api.reason() {
        eprintln!();
        eprintln!("  Reason: {reason}");
    }
    for detail in &api.details {
        for (key, value) in &detail.metadata {
            eprintln!("  {key}: {value}");
        }
    }
    if !api.raw_body.is_empty() {
        eprintln!();
        eprintln!("  Raw response:");
        for line in api.raw_body.lines() {
            eprintln!("    {line}");
        }
    }
}
