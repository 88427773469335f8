use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use infloso::config::ClientConfig;
use infloso::error::{ApiError, ConfigError, StoreError};
use infloso::flows::{self, Confirmation, FlowError, LoginForm, LogoutOutcome, Transition};
use infloso::gate::{GateDecision, Route, SessionGate};
use infloso::landing;
use infloso::session::{FileStore, SessionStore};
use infloso::validate::{Criterion, PasswordCriteria, ProfilePicture, SignupForm, validate_mobile, validate_password};
use infloso::HttpAuthApi;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{}", .0.notice())]
    Flow(#[from] FlowError),
    #[error("missing expected field `{0}`; pass --{0}")]
    MissingField(&'static str),
    #[error("no page at {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    ReadFile { path: String, source: io::Error },
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "infloso-cli", about = "Infloso account CLI")]
struct Cli {
    /// Auth service base URL (overrides `INFLOSO_API_BASE_URL`).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Session file (overrides `INFLOSO_STORE_PATH`).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log requests and store activity to stderr.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new account (`/`).
    Signup(SignupArgs),
    /// Log in and store the session token (`/login`).
    Login(LoginArgs),
    /// Log out after confirmation.
    Logout {
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
    /// Resolve a route through the session gate.
    Open {
        #[arg(default_value = "/home")]
        path: String,
    },
    /// Report whether a session is stored.
    Status,
    /// Show which password criteria a candidate meets.
    CheckPassword { password: String },
    /// Check a mobile number's format.
    CheckMobile { mobile: String },
    /// Turn remember-me on or off.
    Remember {
        state: Toggle,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
struct SignupArgs {
    #[arg(long)]
    full_name: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    mobile: String,
    #[arg(long, env = "INFLOSO_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    confirm_password: String,
    #[arg(long, help = "Profile picture file (image)")]
    profile: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Defaults to the remembered email.
    #[arg(long)]
    email: Option<String>,
    #[arg(long, env = "INFLOSO_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, conflicts_with = "forget")]
    remember: bool,
    #[arg(long)]
    forget: bool,
}

struct CliContext {
    config: ClientConfig,
    store: FileStore,
}

impl CliContext {
    fn api(&self) -> Result<HttpAuthApi, CliError> {
        Ok(HttpAuthApi::new(&self.config)?)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(path) = cli.store {
        config.store_path = path;
    }
    let store = FileStore::open(&config.store_path)?;
    tracing::debug!(base_url = %config.base_url, store = %store.path().display(), "cli context ready");
    let ctx = CliContext { config, store };

    match cli.command {
        Command::Signup(args) => run_signup(&ctx, args).await,
        Command::Login(args) => run_login(&ctx, args).await,
        Command::Logout { yes } => run_logout(&ctx, yes).await,
        Command::Open { path } => run_open(&ctx, &path),
        Command::Status => {
            let present = SessionGate::new(&ctx.store).is_authenticated();
            println!("session: {}", if present { "present" } else { "absent" });
            Ok(())
        }
        Command::CheckPassword { password } => {
            print!("{}", render_criteria(&validate_password(&password)));
            Ok(())
        }
        Command::CheckMobile { mobile } => {
            println!("{}", if validate_mobile(&mobile) { "valid" } else { "invalid" });
            Ok(())
        }
        Command::Remember { state, email } => run_remember(&ctx, state, email),
    }
}

async fn run_signup(ctx: &CliContext, args: SignupArgs) -> Result<(), CliError> {
    let mut form = SignupForm {
        full_name: args.full_name,
        username: args.username,
        email: args.email,
        password: args.password,
        confirm_password: args.confirm_password,
        ..SignupForm::default()
    };
    // A rejected edit keeps the field empty and validation reports it.
    if !form.edit_mobile(&args.mobile) {
        tracing::debug!(mobile = %args.mobile, "mobile input rejected by keystroke filter");
    }
    if let Some(path) = args.profile {
        form.profile_picture = Some(read_profile(&path)?);
    }

    let api = ctx.api()?;
    let transition = flows::signup(&api, &form).await?;
    show_transition(&transition);
    Ok(())
}

async fn run_login(ctx: &CliContext, args: LoginArgs) -> Result<(), CliError> {
    let mut form = LoginForm::restore(&ctx.store);
    if let Some(email) = args.email.as_deref() {
        form.set_email(&ctx.store, email)?;
    }
    if args.remember || args.forget {
        form.set_remember_me(&ctx.store, args.remember)?;
    }
    if form.email.is_empty() {
        return Err(CliError::MissingField("email"));
    }
    form.password = args.password;

    let api = ctx.api()?;
    let transition = flows::login(&api, &ctx.store, &form).await?;
    show_transition(&transition);
    Ok(())
}

async fn run_logout(ctx: &CliContext, yes: bool) -> Result<(), CliError> {
    let confirmation = if yes { Confirmation::Confirmed } else { prompt_confirmation()? };

    let api = ctx.api()?;
    match flows::logout(&api, &ctx.store, confirmation).await? {
        LogoutOutcome::Cancelled => println!("cancelled"),
        LogoutOutcome::LoggedOut(transition) => show_transition(&transition),
    }
    Ok(())
}

fn run_open(ctx: &CliContext, path: &str) -> Result<(), CliError> {
    match SessionGate::new(&ctx.store).resolve_path(path) {
        GateDecision::Render(Route::Home) => println!("{}", landing::HOME.render_text()),
        GateDecision::Render(Route::Login) => {
            let form = LoginForm::restore(&ctx.store);
            println!("Login");
            if !form.email.is_empty() {
                println!("email: {} (remembered)", form.email);
            }
            println!("remember me: {}", if form.remember_me { "on" } else { "off" });
        }
        GateDecision::Render(route) => println!("Register ({route})"),
        GateDecision::Redirect(route) => println!("→ {route}"),
        GateDecision::NotFound => return Err(CliError::NotFound(path.to_owned())),
    }
    Ok(())
}

fn run_remember(ctx: &CliContext, state: Toggle, email: Option<String>) -> Result<(), CliError> {
    let enabled = state == Toggle::On;
    let mut form = LoginForm::restore(&ctx.store);
    if let Some(email) = email {
        form.email = email;
    }
    form.set_remember_me(&ctx.store, enabled)?;
    // No long-lived form between invocations, so the preference is saved now.
    ctx.store.set_remember_me(enabled)?;
    println!("remember me: {}", if enabled { "on" } else { "off" });
    Ok(())
}

fn show_transition(transition: &Transition) {
    println!("{}", transition.notice);
    println!("→ {}", transition.next);
}

fn prompt_confirmation() -> Result<Confirmation, CliError> {
    eprint!("Are you sure? You will be logged out! [y/N] ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(parse_confirmation(&line))
}

fn parse_confirmation(answer: &str) -> Confirmation {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation::Confirmed,
        _ => Confirmation::Cancelled,
    }
}

fn render_criteria(criteria: &PasswordCriteria) -> String {
    Criterion::ALL
        .iter()
        .map(|c| format!("{} {}\n", if criteria.is_met(*c) { "✓" } else { "✗" }, c.label()))
        .collect()
}

fn read_profile(path: &Path) -> Result<ProfilePicture, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::ReadFile { path: path.display().to_string(), source })?;
    let file_name = path
        .file_name()
        .map_or_else(|| "profile".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(ProfilePicture { mime: guess_image_mime(path).to_owned(), file_name, bytes })
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
