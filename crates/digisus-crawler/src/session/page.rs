//! [`FacetPage`] backed by a live browser context.

use super::retry::{poll_until, retry_stale, RetryPolicy};
use super::scripts::{self, ScriptReply};
use super::{
    Facet, FacetOption, FacetPage, ModalHandle, RowButton, SessionError, SessionResult,
};
use crate::renderer::RenderContext;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Timing knobs of a [`PageSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Retry budget for reads that hit a re-rendering element.
    pub retry: RetryPolicy,
    /// Interval between polls of a bounded wait.
    pub poll_interval: Duration,
    /// Budget for each individual close attempt.
    pub close_timeout: Duration,
    /// Budget for the initial page load and filter form.
    pub load_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
            close_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct ModalReply {
    html: String,
    base: Option<String>,
}

/// Owns the browser tab showing the portal for the whole run.
pub struct PageSession {
    context: Box<dyn RenderContext>,
    config: SessionConfig,
}

/// A JS evaluation that failed because the page navigated or re-rendered
/// underneath it, or whose CDP request timed out, is a stale read; anything
/// else means the session is broken.
fn js_failure(err: anyhow::Error) -> SessionError {
    let msg = format!("{err:#}");
    if msg.contains("Execution context was destroyed")
        || msg.contains("Cannot find context with specified id")
        || msg.contains("Could not find node")
        || msg.to_lowercase().contains("timed out")
    {
        SessionError::StaleReference(msg)
    } else {
        SessionError::Browser(msg)
    }
}

impl PageSession {
    pub fn new(context: Box<dyn RenderContext>, config: SessionConfig) -> Self {
        Self { context, config }
    }

    /// Navigate to the portal and wait for the `uf` and `fase` selectors.
    pub async fn open(
        mut context: Box<dyn RenderContext>,
        url: &str,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let nav = context
            .navigate(url, config.load_timeout.as_millis() as u64)
            .await
            .map_err(|e| SessionError::Browser(format!("{e:#}")))?;
        tracing::info!("loaded {} in {}ms", nav.final_url, nav.load_time_ms);

        let session = Self::new(context, config);
        let this = &session;
        let uf = scripts::facet_option_count(Facet::State);
        let fase = scripts::facet_option_count(Facet::Phase);
        let (uf, fase) = (uf.as_str(), fase.as_str());
        let ready = poll_until(config.load_timeout, config.poll_interval, move || async move {
            let states: usize = match this.read("uf options", uf).await {
                Err(SessionError::StaleReference(_)) => 0,
                other => other?,
            };
            let phases: usize = match this.read("fase options", fase).await {
                Err(SessionError::StaleReference(_)) => 0,
                other => other?,
            };
            Ok((states > 0 && phases > 0).then_some(()))
        })
        .await?;

        if ready.is_none() {
            return Err(SessionError::Browser(format!(
                "filter form did not render within {:?}",
                config.load_timeout
            )));
        }
        Ok(session)
    }

    /// Release the browser tab.
    pub async fn close(self) -> anyhow::Result<()> {
        self.context.close().await
    }

    async fn eval(&self, script: &str) -> SessionResult<ScriptReply> {
        let raw = self.context.execute_js(script).await.map_err(js_failure)?;
        serde_json::from_value(raw)
            .map_err(|e| SessionError::Browser(format!("unexpected script reply: {e}")))
    }

    /// Single optimistic read; a `{ ok: false }` reply means the element is
    /// gone for now.
    async fn read<T: DeserializeOwned>(&self, what: &str, script: &str) -> SessionResult<T> {
        let reply = self.eval(script).await?;
        if !reply.ok {
            return Err(SessionError::StaleReference(format!("{what} ({})", reply.reason())));
        }
        serde_json::from_value(reply.value)
            .map_err(|e| SessionError::Browser(format!("unexpected value for {what}: {e}")))
    }

    async fn read_with_retry<T: DeserializeOwned + Send>(
        &self,
        what: &str,
        script: &str,
    ) -> SessionResult<T> {
        retry_stale(self.config.retry, move || self.read(what, script)).await
    }

    async fn modal_visible(&self) -> SessionResult<Option<ModalReply>> {
        match self.read::<ModalReply>("modal", &scripts::visible_modal()).await {
            Ok(modal) => Ok(Some(modal)),
            Err(SessionError::StaleReference(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Wait for every dialog to be hidden. `Ok(false)` if one stays up.
    async fn wait_modal_hidden(&self, timeout: Duration) -> SessionResult<bool> {
        let hidden = poll_until(timeout, self.config.poll_interval, move || async move {
            Ok(self.modal_visible().await?.is_none().then_some(()))
        })
        .await?;
        Ok(hidden.is_some())
    }
}

#[async_trait]
impl FacetPage for PageSession {
    async fn facet_options(&mut self, facet: Facet) -> SessionResult<Vec<FacetOption>> {
        let what = format!("{facet} options");
        self.read_with_retry(&what, &scripts::facet_options(facet)).await
    }

    async fn select_facet(&mut self, facet: Facet, value: &str) -> SessionResult<()> {
        let script = scripts::select_facet(facet, value);
        let this = &*self;
        let script = script.as_str();
        retry_stale(self.config.retry, move || async move {
            let reply = this.eval(script).await?;
            match (reply.ok, reply.reason()) {
                (true, _) => Ok(()),
                (false, "no_option") => Err(SessionError::FacetNotFound {
                    field: facet,
                    value: value.to_string(),
                }),
                (false, reason) => Err(SessionError::StaleReference(format!(
                    "{facet} selector ({reason})"
                ))),
            }
        })
        .await
    }

    async fn current_selection_label(&mut self, facet: Facet) -> SessionResult<String> {
        let what = format!("{facet} selection");
        self.read_with_retry(&what, &scripts::selected_label(facet)).await
    }

    async fn wait_for_results_table(&mut self, timeout: Duration) -> SessionResult<bool> {
        let this = &*self;
        let script = scripts::results_table_present();
        let script = script.as_str();
        let found = poll_until(timeout, self.config.poll_interval, move || async move {
            match this.read::<bool>("results table", script).await {
                Ok(present) => Ok(present.then_some(())),
                Err(SessionError::StaleReference(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;
        Ok(found.is_some())
    }

    async fn wait_for_municipality_options(
        &mut self,
        timeout: Duration,
    ) -> SessionResult<Option<Vec<FacetOption>>> {
        let this = &*self;
        let script = scripts::facet_option_count(Facet::Municipality);
        let script = script.as_str();
        let populated = poll_until(timeout, self.config.poll_interval, move || async move {
            match this.read::<usize>("municipio option count", script).await {
                Ok(count) => Ok((count > 1).then_some(())),
                Err(SessionError::StaleReference(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

        if populated.is_none() {
            return Ok(None);
        }
        self.facet_options(Facet::Municipality).await.map(Some)
    }

    async fn results_html(&mut self) -> SessionResult<String> {
        self.context.get_html().await.map_err(js_failure)
    }

    async fn open_modal_for(
        &mut self,
        button: RowButton,
        timeout: Duration,
    ) -> SessionResult<ModalHandle> {
        // A dialog left open would be read back as this row's.
        if self.modal_visible().await?.is_some() {
            return Err(SessionError::StaleReference(
                "a document list is still open".to_string(),
            ));
        }

        let what = format!("row button #{}", button.index);
        self.read_with_retry::<serde_json::Value>(&what, &scripts::click_row_button(button.index))
            .await?;

        let this = &*self;
        let modal = poll_until(timeout, self.config.poll_interval, move || async move {
            this.modal_visible().await
        })
        .await?
        .ok_or(SessionError::ModalTimeout(timeout))?;

        Ok(ModalHandle {
            html: modal.html,
            base_url: modal.base,
        })
    }

    async fn close_modal(&mut self) -> SessionResult<()> {
        let bound = self.config.close_timeout;

        match tokio::time::timeout(bound, self.eval(&scripts::click_close_button())).await {
            Ok(Ok(reply)) if reply.ok => {
                if self.wait_modal_hidden(bound).await? {
                    return Ok(());
                }
                tracing::debug!("modal still visible after close button, sending Escape");
            }
            Ok(Ok(_)) => tracing::debug!("no close button, sending Escape"),
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => tracing::debug!("close button click failed: {e}"),
            Err(_) => tracing::debug!("close button click timed out after {bound:?}"),
        }

        match tokio::time::timeout(bound, self.context.press_key("Escape")).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => match js_failure(e) {
                SessionError::Browser(msg) => return Err(SessionError::Browser(msg)),
                other => tracing::debug!("Escape not delivered: {other}"),
            },
            Err(_) => tracing::warn!("Escape key press timed out after {bound:?}"),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        if !self.wait_modal_hidden(bound).await? {
            tracing::warn!("modal still visible after Escape");
            return Err(SessionError::StaleReference(
                "document list still visible after Escape".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NavigationResult;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Context that answers scripts from a queue, then with a default reply.
    #[derive(Clone, Default)]
    struct ScriptedContext {
        replies: Arc<Mutex<VecDeque<anyhow::Result<Value>>>>,
        default: Arc<Mutex<Option<Value>>>,
        scripts: Arc<Mutex<Vec<String>>>,
        keys: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedContext {
        fn reply(&self, value: Value) -> &Self {
            self.replies.lock().unwrap().push_back(Ok(value));
            self
        }

        fn fail(&self, msg: &str) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(anyhow::anyhow!(msg.to_string())));
            self
        }

        fn otherwise(&self, value: Value) -> &Self {
            *self.default.lock().unwrap() = Some(value);
            self
        }

        fn script_count(&self) -> usize {
            self.scripts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RenderContext for ScriptedContext {
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 1,
            })
        }
        async fn execute_js(&self, script: &str) -> anyhow::Result<Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            if let Some(next) = self.replies.lock().unwrap().pop_front() {
                return next;
            }
            self.default
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply"))
        }
        async fn get_html(&self) -> anyhow::Result<String> {
            Ok("<html></html>".to_string())
        }
        async fn press_key(&self, key: &str) -> anyhow::Result<()> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
            poll_interval: Duration::from_millis(1),
            close_timeout: Duration::from_millis(20),
            load_timeout: Duration::from_millis(50),
        }
    }

    fn session(ctx: &ScriptedContext) -> PageSession {
        PageSession::new(Box::new(ctx.clone()), fast_config())
    }

    fn missing() -> Value {
        json!({ "ok": false, "reason": "missing" })
    }

    fn hidden() -> Value {
        json!({ "ok": false, "reason": "hidden" })
    }

    #[tokio::test]
    async fn test_facet_options_retries_stale_reads() {
        let ctx = ScriptedContext::default();
        ctx.reply(missing()).reply(missing()).reply(json!({
            "ok": true,
            "value": [{ "value": "", "label": "Selecione" }, { "value": "12", "label": "Acre" }]
        }));
        let mut page = session(&ctx);

        let options = page.facet_options(Facet::State).await.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[1], FacetOption::new("12", "Acre"));
        assert_eq!(ctx.script_count(), 3);
    }

    #[tokio::test]
    async fn test_facet_options_surfaces_stale_after_budget() {
        let ctx = ScriptedContext::default();
        ctx.otherwise(missing());
        let mut page = session(&ctx);

        let err = page.facet_options(Facet::Municipality).await.unwrap_err();
        assert!(matches!(err, SessionError::StaleReference(_)));
        assert_eq!(ctx.script_count(), 3);
    }

    #[tokio::test]
    async fn test_select_unknown_value_is_facet_not_found() {
        let ctx = ScriptedContext::default();
        ctx.reply(json!({ "ok": false, "reason": "no_option" }));
        let mut page = session(&ctx);

        let err = page.select_facet(Facet::State, "99").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::FacetNotFound {
                field: Facet::State,
                value: "99".to_string()
            }
        );
        assert_eq!(ctx.script_count(), 1);
    }

    #[tokio::test]
    async fn test_results_table_absent_is_not_an_error() {
        let ctx = ScriptedContext::default();
        ctx.otherwise(json!({ "ok": true, "value": false }));
        let mut page = session(&ctx);

        let found = page
            .wait_for_results_table(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn test_municipality_wait_times_out_with_placeholder_only() {
        let ctx = ScriptedContext::default();
        ctx.otherwise(json!({ "ok": true, "value": 1 }));
        let mut page = session(&ctx);

        let options = page
            .wait_for_municipality_options(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(options.is_none());
    }

    #[tokio::test]
    async fn test_municipality_wait_reads_options_once_populated() {
        let ctx = ScriptedContext::default();
        ctx.reply(json!({ "ok": true, "value": 1 }))
            .reply(json!({ "ok": true, "value": 3 }))
            .reply(missing())
            .reply(json!({
                "ok": true,
                "value": [
                    { "value": "", "label": "Selecione" },
                    { "value": "3509502", "label": "Campinas" },
                    { "value": "3550308", "label": "São Paulo" }
                ]
            }));
        let mut page = session(&ctx);

        let options = page
            .wait_for_municipality_options(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(options.len(), 3);
        assert_eq!(options[1].label, "Campinas");
    }

    #[tokio::test]
    async fn test_browser_disconnect_is_fatal() {
        let ctx = ScriptedContext::default();
        ctx.fail("websocket connection closed");
        let mut page = session(&ctx);

        let err = page.current_selection_label(Facet::State).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_destroyed_context_is_retried() {
        let ctx = ScriptedContext::default();
        ctx.fail("Execution context was destroyed.")
            .reply(json!({ "ok": true, "value": "2016 a 2019" }));
        let mut page = session(&ctx);

        let label = page.current_selection_label(Facet::Phase).await.unwrap();
        assert_eq!(label, "2016 a 2019");
    }

    #[tokio::test]
    async fn test_open_modal_times_out() {
        let ctx = ScriptedContext::default();
        ctx.reply(hidden())
            .reply(json!({ "ok": true }))
            .otherwise(json!({ "ok": false, "reason": "hidden" }));
        let mut page = session(&ctx);

        let err = page
            .open_modal_for(RowButton { index: 0 }, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::ModalTimeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_open_modal_returns_snapshot() {
        let ctx = ScriptedContext::default();
        ctx.reply(hidden()).reply(json!({ "ok": true })).reply(json!({
            "ok": true,
            "value": { "html": "<div class=\"modal-content\"></div>", "base": "https://portal/" }
        }));
        let mut page = session(&ctx);

        let modal = page
            .open_modal_for(RowButton { index: 4 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(modal.html.contains("modal-content"));
        assert_eq!(modal.base_url.as_deref(), Some("https://portal/"));
    }

    #[tokio::test]
    async fn test_close_modal_falls_back_to_escape() {
        let ctx = ScriptedContext::default();
        ctx.reply(missing())
            .otherwise(json!({ "ok": false, "reason": "hidden" }));
        let mut page = session(&ctx);

        page.close_modal().await.unwrap();
        assert_eq!(*ctx.keys.lock().unwrap(), vec!["Escape".to_string()]);
    }

    #[tokio::test]
    async fn test_close_modal_uses_close_button_first() {
        let ctx = ScriptedContext::default();
        ctx.reply(json!({ "ok": true, "value": "button.btn-close" }))
            .otherwise(json!({ "ok": false, "reason": "hidden" }));
        let mut page = session(&ctx);

        page.close_modal().await.unwrap();
        assert!(ctx.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_modal_never_blocks_when_modal_sticks() {
        let ctx = ScriptedContext::default();
        ctx.otherwise(json!({ "ok": true, "value": { "html": "<div></div>", "base": null } }));
        let mut page = session(&ctx);

        let err = tokio::time::timeout(Duration::from_secs(2), page.close_modal())
            .await
            .expect("close_modal must be bounded")
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleReference(_)));
        assert!(!err.is_fatal());
        assert_eq!(ctx.keys.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stuck_dialog_is_not_read_as_next_row() {
        let ctx = ScriptedContext::default();
        ctx.otherwise(json!({
            "ok": true,
            "value": { "html": "<div class=\"modal-content\">ROW-2020</div>", "base": null }
        }));
        let mut page = session(&ctx);

        assert!(page.close_modal().await.is_err());
        let err = page
            .open_modal_for(RowButton { index: 5 }, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleReference(_)));
        let click = scripts::click_row_button(5);
        assert!(!ctx.scripts.lock().unwrap().iter().any(|s| *s == click));
    }

    #[tokio::test]
    async fn test_cdp_timeout_is_retried_not_fatal() {
        let ctx = ScriptedContext::default();
        ctx.fail("Request timed out.")
            .reply(json!({ "ok": true, "value": "Acre" }));
        let mut page = session(&ctx);

        let label = page.current_selection_label(Facet::State).await.unwrap();
        assert_eq!(label, "Acre");
        assert!(!js_failure(anyhow::anyhow!("Request timed out.")).is_fatal());
    }

    #[tokio::test]
    async fn test_open_waits_for_filter_form() {
        let ctx = ScriptedContext::default();
        ctx.reply(json!({ "ok": true, "value": 0 }))
            .reply(json!({ "ok": true, "value": 0 }))
            .otherwise(json!({ "ok": true, "value": 28 }));

        let page = PageSession::open(Box::new(ctx.clone()), "https://portal/", fast_config()).await;
        assert!(page.is_ok());

        let never = ScriptedContext::default();
        never.otherwise(json!({ "ok": true, "value": 0 }));
        let err = PageSession::open(Box::new(never), "https://portal/", fast_config())
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
