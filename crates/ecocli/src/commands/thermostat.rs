//! Thermostat commands.

use anyhow::Result;

use super::AppContext;
use crate::output;
use crate::prompt::StdinConfirmation;
use crate::thermostat::{Hold, HvacMode, Selection, ThermostatClient};

/// Establish the session (authorizing interactively if needed) and build the
/// API client.
async fn connect(ctx: &AppContext) -> Result<ThermostatClient> {
    let session = ctx.session()?;
    session.ensure_session(&StdinConfirmation).await?;

    let api_base = ctx.config.api_base_url()?;
    let selection = Selection::from_id(ctx.thermostat_id());
    Ok(ThermostatClient::new(session, &api_base, selection)?)
}

pub async fn status(ctx: &AppContext) -> Result<()> {
    let client = connect(ctx).await?;
    let statuses = client.status().await?;

    output::print_list(&statuses, &ctx.format);
    Ok(())
}

pub async fn set_mode(ctx: &AppContext, mode: HvacMode) -> Result<()> {
    let client = connect(ctx).await?;
    let ack = client.set_mode(mode).await?;
    output::print_success(&format!("HVAC mode set to {}: {}", mode, ack), &ctx.format);
    Ok(())
}

pub async fn set_temp(ctx: &AppContext, temperature: f64, duration_hours: Option<u32>) -> Result<()> {
    let client = connect(ctx).await?;
    let ack = client
        .set_hold(Hold {
            temperature,
            duration_hours,
        })
        .await?;

    let until = match duration_hours {
        Some(hours) => format!("for {} hour(s)", hours),
        None => "until the next scheduled transition".to_string(),
    };
    output::print_success(
        &format!("Holding {}°F {}: {}", temperature, until, ack),
        &ctx.format,
    );
    Ok(())
}

pub async fn resume(ctx: &AppContext) -> Result<()> {
    let client = connect(ctx).await?;
    let ack = client.resume_program().await?;
    output::print_success(&format!("Schedule resumed: {}", ack), &ctx.format);
    Ok(())
}
