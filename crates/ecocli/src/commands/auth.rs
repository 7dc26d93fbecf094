//! Authentication commands.

use anyhow::Result;
use pin_auth::{AuthError, SessionState, SessionStatus};

use super::AppContext;
use crate::output::{self, OutputFormat};
use crate::prompt::StdinConfirmation;

/// Run the PIN authorization unless a session already exists.
pub async fn login(ctx: &AppContext, force: bool) -> Result<()> {
    let session = ctx.session()?;

    if session.restore().await? == SessionState::Authorized {
        if !force {
            let status = session.status().await;
            let until = status
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            output::print_success(
                &format!("Already authorized (access token valid until {})", until),
                &ctx.format,
            );
            return Ok(());
        }
        session.logout().await?;
    }

    session.authorize(&StdinConfirmation).await?;

    let status = session.status().await;
    let until = status
        .expires_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    output::print_success(
        &format!("Authorized (access token valid until {})", until),
        &ctx.format,
    );
    Ok(())
}

/// Forget the stored token. The client id stays on record.
pub async fn logout(ctx: &AppContext) -> Result<()> {
    let session = ctx.session()?;
    session.restore().await?;
    session.logout().await?;
    output::print_success("Logged out", &ctx.format);
    Ok(())
}

/// Show the stored session without touching the network.
pub async fn auth_status(ctx: &AppContext) -> Result<()> {
    let session = ctx.session()?;
    session.restore().await?;
    let status = session.status().await;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => print_status_text(&status),
    }
    Ok(())
}

fn print_status_text(status: &SessionStatus) {
    output::print_heading("Session");
    output::print_row("Client id", &status.client_id);
    let state = match status.state {
        SessionState::Authorized if status.expired => "authorized (access token expired)",
        SessionState::Authorized => "authorized",
        SessionState::NoSession => "not logged in",
        SessionState::AwaitingUserConfirmation => "awaiting PIN confirmation",
        SessionState::Refreshing => "refreshing",
        SessionState::Invalid => "invalid",
    };
    output::print_row("State", state);
    if let Some(expires_at) = status.expires_at {
        output::print_row("Expires at", &expires_at.to_rfc3339());
    }
    if !status.scope.is_empty() {
        output::print_row("Scope", &status.scope.join(" "));
    }
}

/// Refresh the access token now.
pub async fn refresh(ctx: &AppContext) -> Result<()> {
    let session = ctx.session()?;
    if session.restore().await? != SessionState::Authorized {
        return Err(AuthError::NotAuthorized.into());
    }
    session.refresh().await?;

    let status = session.status().await;
    let until = status
        .expires_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    output::print_success(
        &format!("Token refreshed (valid until {})", until),
        &ctx.format,
    );
    Ok(())
}
