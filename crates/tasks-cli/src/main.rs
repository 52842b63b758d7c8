//! Tasks CLI - sign in to the Tasks API and make authenticated requests.
//!
//! The session is kept between runs in the configured token store and is
//! renewed transparently when the access token expires.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use tasks_session::auth::age_display;
use tasks_session::{ApiClient, Config, Registration};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Set to "1" to also write logs to `tasks.log` in the cache directory
const LOG_FILE_ENV: &str = "TASKS_LOG_FILE";

const LOG_FILE_NAME: &str = "tasks.log";

const USAGE: &str = "\
Usage: tasks <command>

Commands:
  login [email]   Sign in and store the session
  register        Create a new account
  logout          Forget the stored session
  status          Show whether a session is stored
  whoami          Show the signed-in user's profile
  get <path>      Send an authenticated GET request and print the JSON response

Environment:
  TASKS_API_URL   Override the API base URL
  RUST_LOG        Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must stay alive until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|v| v == "1")
        .and_then(|_| config.cache_dir().ok())
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    config.apply_env();

    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let client = ApiClient::from_config(&config)?;
    let mut expired = client.session_expired();
    info!(base_url = client.base_url(), command = %command, "Tasks CLI starting");

    let result = match command.as_str() {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "register" => register(&client).await,
        "logout" => logout(&client).await,
        "status" => status(&client, &config).await,
        "whoami" => print_json(client.fetch_user().await),
        "get" => match args.get(1) {
            Some(path) => print_json(client.get_json(&normalize_path(path)).await),
            None => bail!("Usage: tasks get <path>"),
        },
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };

    // Renewal failures are published before the failing request returns
    if let Ok(event) = expired.try_recv() {
        eprintln!(
            "Session expired ({}). Run `tasks login` to sign in again.",
            event.reason
        );
    }

    result
}

/// Prompt on stdout and read one trimmed line from stdin
fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_password() -> Result<String> {
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    let password = prompt_password()?;

    client.sign_in(&email, &password).await?;

    config.last_email = Some(email.clone());
    config.save()?;
    println!("Signed in as {}", email);
    Ok(())
}

async fn register(client: &ApiClient) -> Result<()> {
    let registration = Registration {
        username: prompt("Email: ")?,
        name: prompt("Name: ")?,
        nick: prompt("Nickname: ")?,
        password: prompt_password()?,
    };
    client.register(&registration).await?;
    println!("Account created. Run `tasks login` to sign in.");
    Ok(())
}

async fn logout(client: &ApiClient) -> Result<()> {
    client.logout().await?;
    println!("Logged out");
    Ok(())
}

async fn status(client: &ApiClient, config: &Config) -> Result<()> {
    println!("API:   {}", client.base_url());
    println!("Store: {:?}", config.store);
    if !client.is_authenticated().await {
        println!("Not signed in");
        return Ok(());
    }
    match client.session_saved_at().await? {
        Some(saved_at) => println!("Signed in (tokens saved {})", age_display(saved_at)),
        None => println!("Signed in"),
    }
    if let Some(ref email) = config.last_email {
        println!("Email: {}", email);
    }
    Ok(())
}

fn print_json(value: Result<serde_json::Value>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value?)?);
    Ok(())
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
