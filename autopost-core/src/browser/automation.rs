use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, GetCookiesParams, SetCookiesParams, SetUserAgentOverrideParams,
    TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ChromiumSection, FlagsSection};
use crate::session::{SessionCookie, StorageState};

use super::error::{BrowserError, BrowserResult};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko)";

const SCRATCH_PROFILE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Builds and launches Chromium instances. Each launch gets a throwaway
/// user-data dir under the scratch root; authenticated state comes from the
/// session store, never from the profile.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    chromium: ChromiumSection,
    flags: FlagsSection,
    scratch_root: PathBuf,
}

impl BrowserLauncher {
    pub fn new(
        chromium: ChromiumSection,
        flags: FlagsSection,
        scratch_root: impl AsRef<Path>,
    ) -> BrowserResult<Self> {
        let scratch_root = scratch_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&scratch_root).map_err(|err| {
            BrowserError::Profile(format!("failed to create scratch profile root: {err}"))
        })?;
        Ok(Self {
            chromium,
            flags,
            scratch_root,
        })
    }

    pub fn user_agent(&self) -> &str {
        self.flags.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserAutomation> {
        self.cleanup_stale_profiles();
        let profile_dir = self.allocate_profile()?;
        let headless = overrides.headless.unwrap_or(self.chromium.headless);
        let user_agent = self.user_agent().to_string();
        let chromium_config = self.build_chromium_config(&profile_dir, &user_agent, headless)?;
        info!(
            profile = %profile_dir.display(),
            headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            flags: self.flags.clone(),
            user_agent,
        })
    }

    fn allocate_profile(&self) -> BrowserResult<PathBuf> {
        let dir = self.scratch_root.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(dir)
    }

    fn cleanup_stale_profiles(&self) {
        let now = SystemTime::now();
        let Ok(entries) = std::fs::read_dir(&self.scratch_root) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(|modified| {
                    now.duration_since(modified).unwrap_or(Duration::ZERO) > SCRATCH_PROFILE_TTL
                })
                .unwrap_or(false);
            if stale {
                if let Err(err) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %err, "failed to remove stale profile");
                }
            }
        }
    }

    fn build_chromium_config(
        &self,
        profile_dir: &Path,
        user_agent: &str,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .chrome_executable(&self.chromium.executable_path)
            .user_data_dir(profile_dir);

        if !headless {
            builder = builder.with_head();
        }
        if !self.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.chromium.tab_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![format!("--user-agent={user_agent}")];
        if self.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if let Some(lang) = &self.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        for feature in &self.flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if self.flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if self.flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(accept) = &self.flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--password-store=basic".into());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    flags: FlagsSection,
    user_agent: String,
}

impl BrowserAutomation {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(BrowserContext { page })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(accept) = &self.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        if let Some(lang) = &self.flags.lang {
            let languages_script = format!(
                "Object.defineProperty(navigator, 'language', {{ get: () => '{lang}' }});\nObject.defineProperty(navigator, 'languages', {{ get: () => ['{lang}', 'en-US'] }});"
            );
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(languages_script)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| BrowserError::Navigation(format!("{url}: {err}")))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| BrowserError::Navigation(format!("{url}: {err}")))?;
        Ok(())
    }

    /// Installs a saved session's cookies into the browsing context. Must
    /// run before navigating to an authenticated page.
    pub async fn seed_cookies(&self, state: &StorageState) -> BrowserResult<()> {
        if state.cookies.is_empty() {
            return Ok(());
        }
        let mut cookies = Vec::with_capacity(state.cookies.len());
        for cookie in &state.cookies {
            cookies.push(cookie_param(cookie)?);
        }
        self.page.execute(SetCookiesParams::new(cookies)).await?;
        Ok(())
    }

    /// Restores captured localStorage pairs. Must run after navigation, so
    /// the write lands on the right origin.
    pub async fn restore_local_storage(&self, state: &StorageState) -> BrowserResult<()> {
        if state.local_storage.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_string(&state.local_storage)
            .map_err(|err| BrowserError::Unexpected(format!("storage encode failed: {err}")))?;
        let script = format!(
            "(() => {{ const data = {payload}; for (const [key, value] of Object.entries(data)) {{ try {{ localStorage.setItem(key, value); }} catch (_) {{}} }} }})()"
        );
        self.page.evaluate(script.as_str()).await?;
        Ok(())
    }

    pub async fn capture_storage_state(&self) -> BrowserResult<StorageState> {
        let response = self.page.execute(GetCookiesParams::default()).await?;
        let cookies = response
            .result
            .cookies
            .iter()
            .map(|cookie| SessionCookie {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                domain: cookie.domain.clone(),
                path: cookie.path.clone(),
                expires: cookie.expires,
                http_only: cookie.http_only,
                secure: cookie.secure,
                same_site: cookie.same_site.as_ref().map(same_site_label),
            })
            .collect();

        let local_storage: BTreeMap<String, String> = self
            .page
            .evaluate(LOCAL_STORAGE_DUMP_SCRIPT)
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode localStorage dump: {err}"))
            })?;

        Ok(StorageState {
            cookies,
            local_storage,
        })
    }

    pub async fn has_cookie(&self, name: &str) -> BrowserResult<bool> {
        let response = self.page.execute(GetCookiesParams::default()).await?;
        Ok(response
            .result
            .cookies
            .iter()
            .any(|cookie| cookie.name == name))
    }

    pub async fn screenshot_to(&self, path: &Path) -> BrowserResult<PathBuf> {
        let params = ScreenshotParams::builder().build();
        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(|err| BrowserError::Screenshot(err.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok(path.to_path_buf())
    }
}

fn cookie_param(cookie: &SessionCookie) -> BrowserResult<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure);
    if cookie.expires > 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    if let Some(same_site) = cookie.same_site.as_deref().and_then(parse_same_site) {
        builder = builder.same_site(same_site);
    }
    builder.build().map_err(BrowserError::Configuration)
}

fn same_site_label(value: &CookieSameSite) -> String {
    match value {
        CookieSameSite::Strict => "Strict".to_string(),
        CookieSameSite::Lax => "Lax".to_string(),
        CookieSameSite::None => "None".to_string(),
    }
}

fn parse_same_site(value: &str) -> Option<CookieSameSite> {
    match value {
        "Strict" => Some(CookieSameSite::Strict),
        "Lax" => Some(CookieSameSite::Lax),
        "None" => Some(CookieSameSite::None),
        _ => None,
    }
}

const LOCAL_STORAGE_DUMP_SCRIPT: &str = r#"
(() => {
    const out = {};
    for (let i = 0; i < localStorage.length; i++) {
        const key = localStorage.key(i);
        out[key] = localStorage.getItem(key);
    }
    return out;
})()
"#;
