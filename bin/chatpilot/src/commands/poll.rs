use super::Context;
use chatpilot_backend::BackendPoller;
use std::time::Duration;

pub async fn run(
    ctx: &Context,
    conversation_id: &str,
    timeout_secs: u64,
    interval_secs: Option<f64>,
) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    if config.backend.auth_token.trim().is_empty() {
        anyhow::bail!("backend.authToken is not set (or export CHATPILOT_AUTH_TOKEN)");
    }

    let interval = match interval_secs {
        Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
        _ => config.backend.poll_interval(),
    };
    let poller = BackendPoller::from_config(&config.backend, &config.browser.home_url);
    let reply = poller
        .wait_for_completion(conversation_id, Duration::from_secs(timeout_secs), interval)
        .await?;
    println!("{}", reply);
    Ok(())
}
