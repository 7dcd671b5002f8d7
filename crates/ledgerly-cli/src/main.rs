//! Ledgerly CLI - sign in to the accounting backend, switch companies and
//! check what a navigation would do, from the terminal.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledgerly_core::auth::{CredentialStore, LoginRequest, SignupRequest};
use ledgerly_core::redirect::Navigation;
use ledgerly_core::{
    ApiClient, AuthConfig, AuthOutcome, AuthService, AuthorizationMiddleware, CompanySwitchGuard,
    Decision, FileRepository, GuardOutcome, Location, PermissionKey, RedirectTarget,
};

type Service = AuthService<ApiClient, FileRepository>;

/// Session state file inside the cache directory
const SESSION_FILE: &str = "session.json";

/// Log file name inside the cache directory
const LOG_FILE: &str = "ledgerly.log";

/// Password source for non-interactive use
const PASSWORD_ENV: &str = "LEDGERLY_PASSWORD";

const USAGE: &str = "\
Usage: ledgerly [--verbose] <command> [args]

Commands:
  login <email> [--remember]     Sign in (password from keychain, $LEDGERLY_PASSWORD or prompt)
  logout                         Sign out and forget the session
  forget <email>                 Remove a remembered password from the keychain
  signup <email> [name]          Create an account
  verify <key>                   Confirm an email address
  forgot <email>                 Request a password reset email
  reset <key>                    Set a new password with a reset key
  provider <name> <callback>     Print the provider authorization URL
  session                        Re-read the session from the server
  refresh                        Exchange the refresh token for a new access token
  whoami                         Show the signed-in user and company
  switch <company>               Make <company> the active company
  can <permission>...            Check permissions (resource or resource.action)
  navigate <path> [--from path]  Run the route guard and authorization for a path";

/// Initialize the tracing subscriber.
///
/// Logs go to a file in the cache directory unless `verbose` is set, in
/// which case they go to stderr. Use RUST_LOG to control the level.
fn init_tracing(verbose: bool, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if verbose || std::fs::create_dir_all(log_dir).is_err() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr))
            .with(filter)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, "--verbose");
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = AuthConfig::load()?.with_env_overrides();
    config.validate()?;
    let cache_dir = config.cache_dir()?;

    let _log_guard = init_tracing(verbose, &cache_dir);
    info!(api = %config.api_base_url, "Ledgerly CLI starting");

    let repository = FileRepository::open(cache_dir.join(SESSION_FILE))?;
    let client = ApiClient::new(&config.api_base_url)?;
    let mut auth = AuthService::new(config, client, repository);

    let command = args.remove(0);
    match command.as_str() {
        "login" => login(&mut auth, &mut args).await,
        "logout" => {
            auth.logout().await?;
            println!("Signed out");
            Ok(())
        }
        "forget" => {
            let email = arg(&args, 0, "email")?;
            CredentialStore::delete(email)?;
            println!("Forgot the remembered password for {}", email);
            Ok(())
        }
        "signup" => signup(&mut auth, &args).await,
        "verify" => {
            let key = arg(&args, 0, "key")?;
            let outcome = auth.verify_email(key, RedirectTarget::Hint).await?;
            report_outcome(&outcome);
            Ok(())
        }
        "forgot" => {
            let email = arg(&args, 0, "email")?;
            auth.request_password_reset(email).await?;
            println!("If {} has an account, a reset link is on its way", email);
            Ok(())
        }
        "reset" => {
            let key = arg(&args, 0, "key")?;
            let password = read_password("New password")?;
            let outcome = auth.reset_password(key, &password, RedirectTarget::Hint).await?;
            report_outcome(&outcome);
            Ok(())
        }
        "provider" => {
            let provider = arg(&args, 0, "provider")?;
            let callback = arg(&args, 1, "callback URL")?;
            let url = auth.provider_redirect_url(provider, callback).await?;
            println!("{}", url);
            Ok(())
        }
        "session" => {
            let authenticated = auth.fetch_session().await?;
            println!("{}", if authenticated { "Authenticated" } else { "Not signed in" });
            Ok(())
        }
        "refresh" => {
            auth.refresh().await?;
            println!("Access token refreshed");
            Ok(())
        }
        "whoami" => whoami(&auth),
        "switch" => {
            let slug = arg(&args, 0, "company")?;
            let company = auth.switch_company(slug).await?;
            println!("Active company: {} ({})", company.display_name(), company.slug);
            Ok(())
        }
        "can" => can(&auth, &args),
        "navigate" => navigate(&mut auth, &mut args).await,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(auth: &mut Service, args: &mut Vec<String>) -> Result<()> {
    let remember = take_flag(args, "--remember");
    let email = arg(args, 0, "email")?.to_string();

    let password = match CredentialStore::get_password(&email) {
        Ok(password) => password,
        Err(_) => read_password("Password")?,
    };

    let request = LoginRequest {
        email: email.clone(),
        password,
    };
    let outcome = auth.login(&request, RedirectTarget::Hint).await?;
    if remember && matches!(outcome, AuthOutcome::Authenticated(_)) {
        CredentialStore::store(&email, &request.password)?;
    }
    report_outcome(&outcome);
    Ok(())
}

async fn signup(auth: &mut Service, args: &[String]) -> Result<()> {
    let email = arg(args, 0, "email")?;
    let password = read_password("Password")?;
    let request = SignupRequest {
        email: email.to_string(),
        password,
        display_name: args.get(1).cloned(),
        invitation: None,
    };
    let outcome = auth.signup(&request, RedirectTarget::Hint).await?;
    report_outcome(&outcome);
    Ok(())
}

fn whoami(auth: &Service) -> Result<()> {
    if !auth.is_authenticated() {
        println!("Not signed in");
        return Ok(());
    }
    match auth.current_user() {
        Some(user) => println!("{} <{}> ({})", user.label(), user.email, user.access_level),
        None => println!("Signed in (no user profile loaded)"),
    }
    match auth.current_company() {
        Some(company) => println!("Company: {} ({})", company.display_name(), company.slug),
        None => println!("No active company"),
    }
    let roles: Vec<String> = auth.store().roles().into_iter().collect();
    if !roles.is_empty() {
        println!("Roles: {}", roles.join(", "));
    }
    let permissions = auth.store().permissions();
    if !permissions.is_empty() {
        println!("Permissions: {}", serde_json::to_string(&permissions)?);
    }
    Ok(())
}

fn can(auth: &Service, args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("Missing permission\n\n{}", USAGE);
    }
    for raw in args {
        let key: PermissionKey = raw.parse()?;
        let verdict = if auth.has_permission(&key) { "yes" } else { "no" };
        println!("{}: {}", key, verdict);
    }
    Ok(())
}

/// Run the company-switch guard and then the authorization middleware, the
/// same sequence a navigation goes through in the browser.
async fn navigate(auth: &mut Service, args: &mut Vec<String>) -> Result<()> {
    let from = take_option(args, "--from")?.map(|p| Location::parse(&p));
    let mut to = Location::parse(arg(args, 0, "path")?);

    let guard = CompanySwitchGuard::new(auth.config());
    match guard.before_each(auth, &to, from.as_ref()).await? {
        GuardOutcome::Continue => {}
        GuardOutcome::NotFound => {
            println!("Not found: {}", to);
            return Ok(());
        }
        GuardOutcome::Redirect(next) => {
            println!("Guard redirected to {}", next);
            to = next;
        }
    }

    let middleware = AuthorizationMiddleware::new(auth.config());
    match middleware.check(&auth.auth_state(), &to, from.as_ref()) {
        Decision::Allow => println!("Allowed: {}", to),
        Decision::Redirect(next) => println!("Redirect to {}", next),
        Decision::Abort(status) => println!("Denied ({})", status),
    }
    Ok(())
}

fn report_outcome(outcome: &AuthOutcome) {
    match outcome {
        AuthOutcome::Authenticated(Navigation::Stay) => println!("Signed in"),
        AuthOutcome::Authenticated(Navigation::Push(location)) => {
            println!("Signed in, continue at {}", location)
        }
        AuthOutcome::Authenticated(Navigation::Reload(path)) => {
            println!("Signed in, continue at {}", path)
        }
        AuthOutcome::Pending(flows) => println!("More steps required: {}", flows.join(", ")),
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing {}\n\n{}", name, USAGE))
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} needs a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    let password =
        rpassword::prompt_password(format!("{}: ", prompt)).context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}
