use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use serde::Deserialize;
use tracing::trace;

use crate::browser::automation::BrowserContext;
use crate::browser::error::{BrowserError, BrowserResult};
use crate::browser::human::InputPacer;

use super::field::ControlKind;

/// A single DOM query run by a locator strategy. Candidates matched by the
/// probe are tagged in the page so they can be addressed afterwards.
#[derive(Debug, Clone)]
pub enum Probe<'a> {
    /// Accessible role/name match against label-ish metadata.
    Role {
        names: &'a [String],
        kind: ControlKind,
    },
    /// Exact visible text anchor; resolves to the adjacent control, or the
    /// anchor itself for click-to-open dropdowns.
    TextAnchor { text: &'a str, kind: ControlKind },
    /// Visible empty text inputs below the header threshold, in page order.
    EmptyTextInputBelow { y_threshold: f64 },
    /// Visible empty text inputs after the one holding `value`.
    EmptyTextInputAfterValue { value: &'a str },
    /// Visible empty textareas, in page order.
    EmptyTextArea,
    /// Elements whose exact visible text is `text` (options, buttons).
    VisibleText { text: &'a str },
    /// Elements carrying role=option with a matching name.
    RoleOption { name: &'a str },
    /// File inputs; hidden ones count, they usually are.
    FileInput { require_image_accept: bool },
}

impl Probe<'_> {
    pub fn describe(&self) -> String {
        match self {
            Probe::Role { names, .. } => format!("role:{}", names.join("|")),
            Probe::TextAnchor { text, .. } => format!("text-anchor:{text}"),
            Probe::EmptyTextInputBelow { .. } => "structural:empty-below".to_string(),
            Probe::EmptyTextInputAfterValue { .. } => "structural:empty-after".to_string(),
            Probe::EmptyTextArea => "structural:textarea".to_string(),
            Probe::VisibleText { text } => format!("visible-text:{text}"),
            Probe::RoleOption { name } => format!("role-option:{name}"),
            Probe::FileInput { .. } => "file-input".to_string(),
        }
    }
}

/// An addressable control tagged by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    pub selector: String,
}

/// The slice of page behaviour the form engine needs. Strategies and the
/// filler only ever talk to this trait, which keeps the locator chain
/// testable without a browser.
#[async_trait]
pub trait FormSurface: Send {
    async fn probe(&mut self, probe: Probe<'_>) -> BrowserResult<Vec<ControlHandle>>;
    async fn click(&mut self, control: &ControlHandle) -> BrowserResult<()>;
    async fn fill_text(&mut self, control: &ControlHandle, text: &str) -> BrowserResult<()>;
    async fn press_keys(&mut self, keys: &[&str]) -> BrowserResult<()>;
    async fn set_files(&mut self, control: &ControlHandle, path: &Path) -> BrowserResult<()>;
    async fn settle(&mut self, ms: u64) -> BrowserResult<()>;
}

#[derive(Debug, Deserialize)]
struct TaggedCandidate {
    index: u32,
}

/// Live implementation over a chromiumoxide page.
pub struct PageSurface<'a> {
    context: &'a BrowserContext,
    pacer: InputPacer,
    probe_seq: u32,
}

impl<'a> PageSurface<'a> {
    pub fn new(context: &'a BrowserContext, pacer: InputPacer) -> Self {
        Self {
            context,
            pacer,
            probe_seq: 0,
        }
    }

    fn next_tag(&mut self) -> String {
        self.probe_seq += 1;
        format!("data-ap-probe-{}", self.probe_seq)
    }

    async fn run_probe(&mut self, script: String) -> BrowserResult<Vec<TaggedCandidate>> {
        let value = self
            .context
            .page()
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode probe payload: {err}"))
            })?;
        let candidates: Vec<TaggedCandidate> = serde_json::from_value(value).map_err(|err| {
            BrowserError::Unexpected(format!("failed to deserialize probe payload: {err}"))
        })?;
        Ok(candidates)
    }
}

#[async_trait]
impl FormSurface for PageSurface<'_> {
    async fn probe(&mut self, probe: Probe<'_>) -> BrowserResult<Vec<ControlHandle>> {
        let tag = self.next_tag();
        let script = probe_script(&probe, &tag);
        let candidates = self.run_probe(script).await?;
        trace!(probe = %probe.describe(), matches = candidates.len(), "probe ran");
        Ok(candidates
            .into_iter()
            .map(|candidate| ControlHandle {
                selector: format!("[{tag}='{}']", candidate.index),
            })
            .collect())
    }

    async fn click(&mut self, control: &ControlHandle) -> BrowserResult<()> {
        let element = self
            .context
            .page()
            .find_element(control.selector.as_str())
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!(
                    "tagged control {} disappeared: {err}",
                    control.selector
                ))
            })?;
        if let Err(err) = element.scroll_into_view().await {
            trace!(error = %err, "scroll_into_view failed, clicking anyway");
        }
        self.pacer.click_element(&element).await
    }

    async fn fill_text(&mut self, control: &ControlHandle, text: &str) -> BrowserResult<()> {
        let element = self
            .context
            .page()
            .find_element(control.selector.as_str())
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!(
                    "tagged control {} disappeared: {err}",
                    control.selector
                ))
            })?;
        self.pacer.type_text(&element, text).await
    }

    async fn press_keys(&mut self, keys: &[&str]) -> BrowserResult<()> {
        // Keystrokes go to whatever holds focus after the last click.
        let element = match self.context.page().find_element(":focus").await {
            Ok(element) => element,
            Err(_) => self.context.page().find_element("body").await?,
        };
        for key in keys {
            element.press_key(key).await?;
            self.pacer.settle(60).await?;
        }
        Ok(())
    }

    async fn set_files(&mut self, control: &ControlHandle, path: &Path) -> BrowserResult<()> {
        let element = self
            .context
            .page()
            .find_element(control.selector.as_str())
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!(
                    "tagged file input {} disappeared: {err}",
                    control.selector
                ))
            })?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string_lossy().to_string()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.context.page().execute(params).await?;
        Ok(())
    }

    async fn settle(&mut self, ms: u64) -> BrowserResult<()> {
        self.pacer.settle(ms).await
    }
}

const VISIBLE_HELPER: &str = r#"
    const visible = (el) => {
        const rect = el.getBoundingClientRect();
        if (rect.width <= 0 || rect.height <= 0) return false;
        const style = window.getComputedStyle(el);
        return style.visibility !== 'hidden' && style.display !== 'none';
    };
"#;

fn probe_script(probe: &Probe<'_>, tag: &str) -> String {
    match probe {
        Probe::Role { names, kind } => {
            let names_json = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
            let selector = match kind {
                ControlKind::TextInput => {
                    "input[type='text'], input:not([type]), [role='textbox']"
                }
                ControlKind::TextArea => "textarea, [role='textbox']",
                ControlKind::Dropdown => "select, [role='combobox'], [role='listbox'], [role='button'], [aria-haspopup]",
                ControlKind::FileInput => "input[type='file']",
            };
            format!(
                r#"(() => {{
    {VISIBLE_HELPER}
    const names = {names_json};
    const results = [];
    let idx = 0;
    const accessibleName = (el) => {{
        const parts = [];
        const aria = el.getAttribute('aria-label');
        if (aria) parts.push(aria);
        if (el.id) {{
            const label = document.querySelector('label[for="' + el.id + '"]');
            if (label) parts.push(label.innerText || '');
        }}
        const labelledby = el.getAttribute('aria-labelledby');
        if (labelledby) {{
            labelledby.split(/\s+/).forEach(id => {{
                const node = document.getElementById(id);
                if (node) parts.push(node.innerText || '');
            }});
        }}
        if (el.placeholder) parts.push(el.placeholder);
        return parts.join(' ').trim().toLowerCase();
    }};
    document.querySelectorAll("{selector}").forEach(el => {{
        if (!visible(el)) return;
        const name = accessibleName(el);
        if (!name) return;
        if (names.some(candidate => name.includes(candidate))) {{
            el.setAttribute('{tag}', String(idx));
            results.push({{ index: idx }});
            idx += 1;
        }}
    }});
    return results;
}})()"#
            )
        }
        Probe::TextAnchor { text, kind } => {
            let text_json = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
            let mode = match kind {
                ControlKind::Dropdown => "click",
                ControlKind::TextArea => "textarea",
                _ => "input",
            };
            format!(
                r#"(() => {{
    {VISIBLE_HELPER}
    const anchor = {text_json};
    const mode = '{mode}';
    const matches = [];
    document.querySelectorAll('span, div, label, button, a, [role]').forEach(el => {{
        if (!visible(el)) return;
        const text = (el.innerText || el.textContent || '').trim();
        if (text === anchor) matches.push(el);
    }});
    const innermost = matches.filter(el =>
        !matches.some(other => other !== el && el.contains(other)));
    const targets = [];
    innermost.forEach(el => {{
        let target = el;
        if (mode !== 'click') {{
            const controlSelector = mode === 'textarea'
                ? 'textarea'
                : "input[type='text'], input:not([type])";
            target = null;
            let scope = el;
            for (let depth = 0; depth < 4 && scope; depth += 1) {{
                const control = scope.querySelector(controlSelector);
                if (control && visible(control)) {{ target = control; break; }}
                scope = scope.parentElement;
            }}
        }}
        if (target && !targets.includes(target)) targets.push(target);
    }});
    return targets.map((el, idx) => {{
        el.setAttribute('{tag}', String(idx));
        return {{ index: idx }};
    }});
}})()"#
            )
        }
        Probe::EmptyTextInputBelow { y_threshold } => format!(
            r#"(() => {{
    {VISIBLE_HELPER}
    const threshold = {y_threshold};
    const results = [];
    let idx = 0;
    document.querySelectorAll("input[type='text'], input:not([type])").forEach(el => {{
        if (!visible(el)) return;
        if ((el.value || '') !== '') return;
        const rect = el.getBoundingClientRect();
        if (rect.top + window.scrollY <= threshold) return;
        el.setAttribute('{tag}', String(idx));
        results.push({{ index: idx }});
        idx += 1;
    }});
    return results;
}})()"#
        ),
        Probe::EmptyTextInputAfterValue { value } => {
            let value_json = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
            format!(
                r#"(() => {{
    {VISIBLE_HELPER}
    const previous = {value_json};
    const results = [];
    let idx = 0;
    let seen = false;
    document.querySelectorAll("input[type='text'], input:not([type])").forEach(el => {{
        if (!visible(el)) return;
        if (!seen) {{
            if ((el.value || '') === previous) seen = true;
            return;
        }}
        if ((el.value || '') === '') {{
            el.setAttribute('{tag}', String(idx));
            results.push({{ index: idx }});
            idx += 1;
        }}
    }});
    return results;
}})()"#
            )
        }
        Probe::EmptyTextArea => format!(
            r#"(() => {{
    {VISIBLE_HELPER}
    const results = [];
    let idx = 0;
    document.querySelectorAll('textarea').forEach(el => {{
        if (!visible(el)) return;
        if ((el.value || '') !== '') return;
        el.setAttribute('{tag}', String(idx));
        results.push({{ index: idx }});
        idx += 1;
    }});
    return results;
}})()"#
        ),
        Probe::VisibleText { text } => {
            let text_json = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
            format!(
                r#"(() => {{
    {VISIBLE_HELPER}
    const wanted = {text_json};
    const matches = [];
    document.querySelectorAll('button, a, span, div, label, [role]').forEach(el => {{
        if (!visible(el)) return;
        const text = (el.innerText || el.textContent || '').trim();
        if (text === wanted) matches.push(el);
    }});
    const innermost = matches.filter(el =>
        !matches.some(other => other !== el && el.contains(other)));
    return innermost.map((el, idx) => {{
        el.setAttribute('{tag}', String(idx));
        return {{ index: idx }};
    }});
}})()"#
            )
        }
        Probe::RoleOption { name } => {
            let name_json = serde_json::to_string(name).unwrap_or_else(|_| "\"\"".to_string());
            format!(
                r#"(() => {{
    {VISIBLE_HELPER}
    const wanted = {name_json}.toLowerCase();
    const results = [];
    let idx = 0;
    document.querySelectorAll("[role='option'], option").forEach(el => {{
        if (!visible(el)) return;
        const text = (el.innerText || el.textContent || '').trim().toLowerCase();
        if (text === wanted) {{
            el.setAttribute('{tag}', String(idx));
            results.push({{ index: idx }});
            idx += 1;
        }}
    }});
    return results;
}})()"#
            )
        }
        Probe::FileInput {
            require_image_accept,
        } => {
            let selector = if *require_image_accept {
                "input[type='file'][accept*='image']"
            } else {
                "input[type='file']"
            };
            // No visibility gate: upload inputs are routinely hidden behind
            // styled buttons.
            format!(
                r#"(() => {{
    const results = [];
    let idx = 0;
    document.querySelectorAll("{selector}").forEach(el => {{
        el.setAttribute('{tag}', String(idx));
        results.push({{ index: idx }});
        idx += 1;
    }});
    return results;
}})()"#
            )
        }
    }
}
