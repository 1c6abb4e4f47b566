//! Fixed locator table for the chat UI and the page scripts built from it.
//!
//! Every script is a self-contained expression evaluated with
//! `returnByValue`, so results come back as plain JSON.

/// Rendered assistant reply blocks.
pub const ASSISTANT_BLOCK: &str =
    r#"div[data-message-author-role="assistant"] div[class*="prose"]"#;
/// Composer input (a textarea or a contenteditable div depending on UI version).
pub const PROMPT_INPUT_ID: &str = "prompt-textarea";
pub const SUBMIT_BUTTON_ID: &str = "composer-submit-button";
/// Present while a reply is being generated.
pub const STOP_BUTTON: &str = r#"button[data-testid="stop-button"]"#;
/// Error bubble styling.
pub const ERROR_BUBBLE: &str = "div.text-token-text-error.border-token-surface-error";
/// "Regenerate" button rendered inside thread-level error bubbles.
pub const REGENERATE_ERROR_BUTTON: &str = r#"button[data-testid="regenerate-thread-error-button"]"#;
/// Login form fields and their "Continue" buttons.
pub const EMAIL_INPUT_ID: &str = ":r1:-email";
pub const EMAIL_CONTINUE_XPATH: &str = "//*[@id=':r1:']/div[2]/button";
pub const PASSWORD_INPUT_ID: &str = ":re:-password";
pub const PASSWORD_CONTINUE_XPATH: &str = "//*[@id=':re:']/div[2]/button";
/// Paragraph shown instead of a reply when the prompt is too long.
pub const TOO_LONG_NOTICE: &str = "The message you submitted was too long, please reload the conversation and submit something shorter.";

/// Declares `__cpErrors()` returning every visible error node, deduplicated.
fn error_nodes_fn() -> String {
    format!(
        r#"const __cpErrors = () => {{
  const out = new Set();
  document.querySelectorAll({bubble}).forEach(e => out.add(e));
  document.querySelectorAll({regen}).forEach(b => {{ const d = b.closest('div'); if (d) out.add(d); }});
  document.querySelectorAll('p').forEach(p => {{ if (p.textContent.trim() === {notice}) out.add(p); }});
  return Array.from(out);
}};"#,
        bubble = js_string(ERROR_BUBBLE),
        regen = js_string(REGENERATE_ERROR_BUTTON),
        notice = js_string(TOO_LONG_NOTICE),
    )
}

/// Number of assistant blocks currently rendered.
pub fn count_blocks_script() -> String {
    format!(
        "document.querySelectorAll({}).length",
        js_string(ASSISTANT_BLOCK)
    )
}

/// Trimmed text of every assistant block from index `start` on.
pub fn block_texts_script(start: usize) -> String {
    format!(
        "Array.from(document.querySelectorAll({})).slice({}).map(e => e.innerText.trim())",
        js_string(ASSISTANT_BLOCK),
        start
    )
}

/// Trimmed text of every visible error node.
pub fn error_texts_script() -> String {
    format!(
        "(() => {{ {} return __cpErrors().map(e => e.innerText.trim()).filter(t => t.length > 0); }})()",
        error_nodes_fn()
    )
}

/// `{ count, errors }` used while waiting for the reply to start.
pub fn reply_started_script() -> String {
    format!(
        "(() => {{ {} return {{ count: document.querySelectorAll({}).length, errors: __cpErrors().length }}; }})()",
        error_nodes_fn(),
        js_string(ASSISTANT_BLOCK)
    )
}

/// `{ error, busy, texts }` sampled by the completion detector. Reading
/// `innerText` of a node detached mid-render throws, which surfaces as an
/// evaluation exception.
pub fn observe_script(start: usize) -> String {
    format!(
        r#"(() => {{ {errors}
  const blocks = Array.from(document.querySelectorAll({block})).slice({start});
  return {{
    error: __cpErrors().length > 0,
    busy: document.querySelector({stop}) !== null,
    texts: blocks.map(e => {{ if (!e.isConnected) throw new Error('stale block'); return e.innerText; }}),
  }};
}})()"#,
        errors = error_nodes_fn(),
        block = js_string(ASSISTANT_BLOCK),
        start = start,
        stop = js_string(STOP_BUTTON),
    )
}

/// True once the composer is rendered and visible.
pub fn prompt_ready_script() -> String {
    field_visible_script(PROMPT_INPUT_ID)
}

/// True once the element with `id` is rendered and visible.
pub fn field_visible_script(id: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementById({}); return !!el && el.offsetParent !== null; }})()",
        js_string(id)
    )
}

/// Focus the element with `id`; returns false when it is missing.
pub fn focus_field_script(id: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementById({}); if (!el) return false; el.focus(); return true; }})()",
        js_string(id)
    )
}

/// Click the first node matching `xpath` if it is enabled.
pub fn click_xpath_script(xpath: &str) -> String {
    format!(
        "(() => {{ const el = document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; if (!el || el.disabled) return false; el.click(); return true; }})()",
        js_string(xpath)
    )
}

/// Click the submit button if it is enabled; returns whether it was clicked.
pub fn click_submit_script() -> String {
    format!(
        "(() => {{ const el = document.getElementById({}); if (!el || el.disabled) return false; el.click(); return true; }})()",
        js_string(SUBMIT_BUTTON_ID)
    )
}

pub fn location_path_script() -> &'static str {
    "window.location.pathname"
}

/// Quote a Rust string as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
