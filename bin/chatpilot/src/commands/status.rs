use super::Context;
use chatpilot_core::CompletionStrategy;
use chatpilot_driver::{find_browser_binary, BrowserEngine};

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    println!("chatpilot status");
    println!("================");
    println!();

    let config_exists = ctx.config_path.exists();
    println!(
        "Config:    {} {}",
        ctx.config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let config = ctx.load_config()?;

    let engine = config.browser.engine.parse::<BrowserEngine>();
    let browser = match &engine {
        Ok(engine) => match find_browser_binary(*engine) {
            Some(path) => format!("{} ✓ ({})", engine.name(), path),
            None => format!("{} ✗ (not installed)", engine.name()),
        },
        Err(e) => format!("✗ {}", e),
    };
    println!("Browser:   {}", browser);

    let profile = match config.browser.profile_dir.as_deref() {
        Some(raw) => ctx.paths.resolve_profile(raw).display().to_string(),
        None => "temporary (removed on exit)".to_string(),
    };
    println!("Profile:   {}", profile);
    println!("Home URL:  {}", config.browser.home_url);
    println!("Headless:  {}", config.browser.headless);
    println!("Typing:    {:?}", config.browser.typing_mode);
    let login = match (config.browser.auto_login, config.browser.credentials.is_complete()) {
        (false, _) => "manual".to_string(),
        (true, true) => format!("auto ({})", config.browser.credentials.email),
        (true, false) => "auto ✗ (credentials missing)".to_string(),
    };
    println!("Login:     {}", login);
    println!();

    let strategy = match config.session.strategy {
        CompletionStrategy::Direct => "direct (page observation)",
        CompletionStrategy::Polling => "polling (backend API)",
    };
    println!("Strategy:  {}", strategy);
    println!(
        "Retries:   {} extra on network errors",
        config.session.network_error_retries
    );
    println!(
        "Auth:      {}",
        if config.backend.auth_token.trim().is_empty() {
            "✗ no token"
        } else {
            "✓ token set"
        }
    );

    if let Err(e) = config.validate() {
        println!();
        println!("⚠ {}", e);
    }
    Ok(())
}
