use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use custos_clock::{Clock, System};
use custos_session::{
    backend::{Credentials, HttpAuthBackend, Registration},
    persistence::FileSessionPersistence,
    token_clock, EmailRef, Password, ResetToken, SessionConfig, SessionManager, TokenStatus,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the authentication API
    #[arg(short, long, env = "AUTH_BASE_URL")]
    base_url: reqwest::Url,

    /// The local file used to remember the session
    #[arg(short = 'f', long, env = "SESSION_FILE", default_value = ".session.json")]
    session_file: PathBuf,

    /// Seconds before expiry at which the access token is refreshed
    #[arg(long, env = "REFRESH_LOOKAHEAD", default_value_t = 60)]
    refresh_lookahead: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Signs in and remembers the session
    Login {
        #[arg(short, long, env = "AUTH_EMAIL")]
        email: String,
        #[arg(short, long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Creates an account and signs in
    Register {
        #[arg(short, long, env = "AUTH_EMAIL")]
        email: String,
        #[arg(short, long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Shows the remembered session
    Status,
    /// Keeps the remembered session fresh, reporting on its token
    Watch {
        /// Seconds between reports
        #[arg(long, default_value_t = 5)]
        every: u64,
    },
    /// Signs out and forgets the session
    Logout,
    /// Requests a password reset link
    ForgotPassword {
        #[arg(short, long, env = "AUTH_EMAIL")]
        email: String,
    },
    /// Sets a new password with a reset token
    ResetPassword {
        #[arg(short, long)]
        token: String,
        #[arg(short, long, env = "AUTH_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let backend = HttpAuthBackend::new(reqwest::Client::new(), opts.base_url);
    let config = SessionConfig::default()
        .with_refresh_lookahead(custos_clock::DurationSecs(opts.refresh_lookahead))
        .with_remember_me_default(true);

    let manager = SessionManager::builder(backend)
        .with_persistence(FileSessionPersistence::new(opts.session_file))
        .with_config(config)
        .build();

    manager.store().add_listener(|s| {
        tracing::debug!(
            authenticated = s.is_authenticated(),
            refreshing = s.is_refreshing(),
            loading = s.is_loading(),
            "session changed"
        );
    });

    match opts.command {
        Command::Login { email, password } => {
            let user = manager
                .login(&Credentials::new(email, password), true)
                .await?;
            tracing::info!(user = %user.id(), roles = ?user.roles(), "signed in");
        }
        Command::Register {
            email,
            password,
            full_name,
        } => {
            let mut registration = Registration::new(email, password);
            if let Some(full_name) = full_name {
                registration = registration.with_full_name(full_name);
            }
            let user = manager.register(&registration).await?;
            tracing::info!(user = %user.id(), "registered");
        }
        Command::Status => {
            if manager.restore().await {
                let snapshot = manager.snapshot();
                if let (Some(user), Some(tokens)) = (snapshot.user(), snapshot.tokens()) {
                    tracing::info!(
                        user = %user.id(),
                        email = ?user.email(),
                        roles = ?user.roles(),
                        expires_in = ?token_clock::until_expired(tokens.access_token(), System.now()),
                        "signed in"
                    );
                }
            } else {
                tracing::info!("not signed in");
            }
        }
        Command::Watch { every } => {
            if !manager.restore().await {
                color_eyre::eyre::bail!("not signed in; run `login` first");
            }

            let _refresher = manager.spawn_background_refresh();
            let lookahead = manager.config().refresh_lookahead();

            let mut interval = time::interval(Duration::from_secs(every));
            loop {
                interval.tick().await;

                let token = match manager.get_valid_access_token().await {
                    Ok(token) => token,
                    Err(error) => {
                        tracing::error!(%error, "session lost");
                        break;
                    }
                };

                let status = token_clock::token_status(&token, System.now(), lookahead);
                match status {
                    TokenStatus::Fresh => tracing::debug!(
                        ?status,
                        token = format_args!("{:#?}", token),
                        "pulled token"
                    ),
                    TokenStatus::Stale => tracing::warn!(?status, "pulled token"),
                    TokenStatus::Expired => tracing::error!(?status, "pulled token"),
                }
            }
        }
        Command::Logout => {
            manager.restore().await;
            manager.logout().await;
            tracing::info!("signed out");
        }
        Command::ForgotPassword { email } => {
            manager.forgot_password(EmailRef::from_str(&email)).await?;
            tracing::info!("if the account exists, a reset link is on its way");
        }
        Command::ResetPassword { token, password } => {
            manager
                .reset_password(&ResetToken::new(token), &Password::new(password))
                .await?;
            tracing::info!("password changed; sign in again");
        }
    }

    Ok(())
}
