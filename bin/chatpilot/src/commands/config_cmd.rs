use super::Context;
use chatpilot_core::Config;
use serde_json::Value;

/// Show the effective configuration as pretty-printed JSON, token masked.
pub async fn show(ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let mut json = serde_json::to_value(&config)?;
    mask_secrets(&mut json);

    println!();
    println!("📋 Current Configuration");
    println!("  File: {}", ctx.config_path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Write the default configuration.
pub async fn init(ctx: &Context, force: bool) -> anyhow::Result<()> {
    if ctx.config_path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            ctx.config_path.display()
        );
        return Ok(());
    }
    ctx.paths.ensure_dirs()?;
    Config::default().save(&ctx.config_path)?;
    println!("✓ Wrote {}", ctx.config_path.display());
    Ok(())
}

fn mask_secrets(json: &mut Value) {
    for pointer in ["/backend/authToken", "/browser/credentials/password"] {
        if let Some(secret) = json.pointer_mut(pointer) {
            if let Some(masked) = secret.as_str().and_then(mask) {
                *secret = Value::String(masked);
            }
        }
    }
}

fn mask(secret: &str) -> Option<String> {
    match secret.chars().count() {
        0 => None,
        n if n > 8 => Some(format!("{}…", secret.chars().take(4).collect::<String>())),
        _ => Some("****".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_token() {
        let mut v = json!({"backend": {"authToken": "eyJhbGciOiJSUzI1NiJ9"}});
        mask_secrets(&mut v);
        assert_eq!(v["backend"]["authToken"], "eyJh…");

        let mut short = json!({"backend": {"authToken": "abc"}});
        mask_secrets(&mut short);
        assert_eq!(short["backend"]["authToken"], "****");

        let mut empty = json!({"backend": {"authToken": ""}});
        mask_secrets(&mut empty);
        assert_eq!(empty["backend"]["authToken"], "");
    }

    #[test]
    fn test_mask_login_password() {
        let mut v = json!({
            "browser": {"credentials": {"email": "me@example.com", "password": "hunter2"}}
        });
        mask_secrets(&mut v);
        assert_eq!(v["browser"]["credentials"]["password"], "****");
        assert_eq!(v["browser"]["credentials"]["email"], "me@example.com");
    }
}
