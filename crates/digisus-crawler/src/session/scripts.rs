//! JavaScript snippets evaluated in the portal page.
//!
//! Every snippet is a self-invoking function returning a reply object
//! `{ ok: true, value }` or `{ ok: false, reason }`, so a missing element is
//! reported as data rather than a JS exception. Reasons: `"missing"` (the
//! element is absent, possibly mid re-render), `"no_option"` (selector has no
//! such value), `"hidden"` (element exists but is not visible).
//!
//! All caller-supplied values are escaped with [`sanitize_js_string`] and only
//! ever injected into string literals.

use super::Facet;
use serde::Deserialize;

/// CSS selector of the results table body.
pub const RESULTS_TABLE: &str = "table.table-hover tbody";
/// CSS selector of the per-row button that opens the document dialog.
pub const ROW_BUTTON: &str = "button[title='Exibir lista de documentos']";
/// CSS selector of the document dialog.
pub const MODAL_CONTENT: &str = ".modal-content";
/// Close controls tried in order before falling back to Escape.
pub const CLOSE_BUTTONS: [&str; 3] = ["button.btn-close", "button.close", "[data-dismiss='modal']"];

/// Decoded reply of a page script.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptReply {
    pub ok: bool,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ScriptReply {
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }
}

fn select_expr(facet: Facet) -> String {
    format!(
        "document.querySelector('select[name=\"{}\"]')",
        sanitize_js_string(facet.field_name())
    )
}

/// `[{value, label}]` of every option of a selector.
pub fn facet_options(facet: Facet) -> String {
    format!(
        r#"(() => {{
    const sel = {sel};
    if (!sel) return {{ ok: false, reason: 'missing' }};
    return {{ ok: true, value: Array.from(sel.options).map(o => ({{
        value: o.value || '',
        label: (o.text || '').trim()
    }})) }};
}})()"#,
        sel = select_expr(facet)
    )
}

/// Number of options of a selector; 0 when the selector is absent.
pub fn facet_option_count(facet: Facet) -> String {
    format!(
        r#"(() => {{
    const sel = {sel};
    return {{ ok: true, value: sel ? sel.options.length : 0 }};
}})()"#,
        sel = select_expr(facet)
    )
}

/// Select `value` and fire the events the portal's form listens to.
pub fn select_facet(facet: Facet, value: &str) -> String {
    format!(
        r#"(() => {{
    const sel = {sel};
    if (!sel) return {{ ok: false, reason: 'missing' }};
    const opt = Array.from(sel.options).find(o => o.value === '{value}');
    if (!opt) return {{ ok: false, reason: 'no_option' }};
    sel.value = opt.value;
    opt.selected = true;
    sel.dispatchEvent(new Event('input', {{ bubbles: true }}));
    sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return {{ ok: true }};
}})()"#,
        sel = select_expr(facet),
        value = sanitize_js_string(value)
    )
}

/// Display text of the selected option.
pub fn selected_label(facet: Facet) -> String {
    format!(
        r#"(() => {{
    const sel = {sel};
    if (!sel || sel.selectedIndex < 0) return {{ ok: false, reason: 'missing' }};
    return {{ ok: true, value: (sel.options[sel.selectedIndex].text || '').trim() }};
}})()"#,
        sel = select_expr(facet)
    )
}

/// Whether the results table body is present.
pub fn results_table_present() -> String {
    format!(
        r#"(() => ({{ ok: true, value: document.querySelector("{RESULTS_TABLE}") !== null }}))()"#
    )
}

/// Scroll the `index`-th row button into view and click it directly,
/// bypassing whatever overlay would intercept a pointer click.
pub fn click_row_button(index: usize) -> String {
    format!(
        r#"(() => {{
    const btn = document.querySelectorAll("{ROW_BUTTON}")[{index}];
    if (!btn) return {{ ok: false, reason: 'missing' }};
    btn.scrollIntoView({{ block: 'center' }});
    btn.click();
    return {{ ok: true }};
}})()"#
    )
}

/// HTML and base URI of the first visible dialog.
pub fn visible_modal() -> String {
    format!(
        r#"(() => {{
    const visible = el => {{
        const r = el.getBoundingClientRect();
        const s = window.getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    }};
    const modal = Array.from(document.querySelectorAll("{MODAL_CONTENT}")).find(visible);
    if (!modal) return {{ ok: false, reason: 'hidden' }};
    return {{ ok: true, value: {{ html: modal.outerHTML, base: document.baseURI }} }};
}})()"#
    )
}

/// Click the first close control found, in [`CLOSE_BUTTONS`] order.
pub fn click_close_button() -> String {
    let selectors = CLOSE_BUTTONS
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(() => {{
    for (const css of [{selectors}]) {{
        const btn = document.querySelector(css);
        if (btn) {{
            btn.scrollIntoView({{ block: 'center' }});
            btn.click();
            return {{ ok: true, value: css }};
        }}
    }}
    return {{ ok: false, reason: 'missing' }};
}})()"#
    )
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes all characters that could break out of a JS string context:
/// - Backslashes, single/double quotes, backticks
/// - Newlines, carriage returns, tabs
/// - Angle brackets, so a value can never close a `<script>` element
/// - Null bytes are stripped
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
