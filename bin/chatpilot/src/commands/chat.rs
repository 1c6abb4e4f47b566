use super::{build_pool, Context};
use chatpilot_orchestrator::spawn_idle_reaper;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run(ctx: &Context, model: Option<String>) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let pool = build_pool(&config, &ctx.paths)?;
    let timeout = config.session.default_timeout();

    let cancel = CancellationToken::new();
    let reaper = config.session.idle_timeout().map(|idle| {
        let check_every = (idle / 4).max(Duration::from_secs(1));
        spawn_idle_reaper(pool.clone(), check_every, idle, cancel.clone())
    });

    println!("chatpilot interactive mode. Empty line is ignored, /quit or Ctrl-D exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        match pool.ask(line, model.as_deref(), timeout).await {
            Ok(result) => println!("{}\n", result.fragments.join("\n\n")),
            Err(e) => eprintln!("{}\n", e),
        }
    }

    cancel.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Browser shutdown failed");
    }
    Ok(())
}
