use super::{build_pool, Context};
use chatpilot_core::AskRequest;
use std::io::Read;
use std::time::Duration;
use tracing::warn;

pub async fn run(
    ctx: &Context,
    prompt: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let prompt = match prompt {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let config = ctx.load_config()?;
    let pool = build_pool(&config, &ctx.paths)?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.session.default_timeout());

    let request = AskRequest::new(prompt)
        .with_model(model)
        .with_timeout(timeout);
    let result = pool.submit(request).await;

    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Browser shutdown failed");
    }

    let result = result?;
    println!("{}", result.fragments.join("\n\n"));
    Ok(())
}
