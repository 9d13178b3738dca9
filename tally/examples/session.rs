use std::path::PathBuf;

use clap::Parser;
use tally::{
    api::{absences, events, groups},
    auth::{LoginOutcome, LoginRequest},
    Session, SessionConfig,
};
use tally_reqwest::Termination;
use tally_tokens::store::FileStorage;

#[derive(Debug, Parser)]
struct Opts {
    /// The root URL of the attendance API
    #[arg(short, long, env = "TALLY_BASE_URL")]
    base_url: reqwest::Url,

    /// The administrator's username
    #[arg(short, long, env = "TALLY_USERNAME")]
    username: String,

    /// The administrator's password
    #[arg(short, long, env = "TALLY_PASSWORD", hide_env_values = true)]
    password: String,

    /// A solved captcha response token
    #[arg(short, long, env = "TALLY_CAPTCHA", hide_env_values = true)]
    captcha: String,

    /// The local file used to keep the session between runs
    #[arg(short = 'f', long, env = "TALLY_SESSION_FILE", default_value = ".session.json")]
    session_file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;
    let config = SessionConfig::new(opts.base_url)?;
    let session = Session::new(config, client, FileStorage::new(opts.session_file))
        .with_termination_handler(|reason: Termination| {
            tracing::error!(%reason, next = reason.path(), "session ended");
        });

    if session.is_signed_in().await? {
        tracing::info!(identity = ?session.identity().await?, "resuming stored session");
    } else {
        let request = LoginRequest {
            username: opts.username,
            password: opts.password,
            captcha_response: opts.captcha,
        };

        match session.login(&request).await? {
            LoginOutcome::Authenticated(identity) => {
                tracing::info!(?identity, "signed in")
            }
            LoginOutcome::MfaRequired(challenge) => {
                tracing::info!("approve the sign-in on your device");
                let identity = session.await_mfa_approval(&challenge).await?;
                tracing::info!(?identity, "signed in after approval");
            }
        }
    }

    let permissions = session.permissions();
    let granted = permissions.loaded().await;
    tracing::info!(?granted, "permissions");

    for group in groups::list(session.client()).await? {
        tracing::info!(uuid = %group.group_uuid, name = %group.group_name, "group");
    }

    for event in events::list(session.client()).await? {
        tracing::info!(
            uuid = %event.event_uuid,
            name = %event.event_name,
            active = event.event_active,
            "event"
        );
    }

    if permissions.has_permission("absent:read") {
        let prediction = absences::predict(session.client()).await?;
        tracing::info!(
            date = %prediction.date,
            expected = prediction.predicted_attendance,
            reported_absent = prediction.reported_absents,
            "attendance forecast"
        );
    }

    Ok(())
}
