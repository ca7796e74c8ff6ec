//! The worker's single cached browser.
//!
//! A worker keeps at most one browser alive between runs. A cached browser
//! of the requested kind is cleaned and reused; any other cached browser is
//! torn down first. Teardown tolerates sessions that are already gone and
//! always kills the driver's process group.

use std::sync::Arc;

use super::{BrowserHandle, BrowserLauncher, BrowserSession};
use crate::config::BrowserSection;
use crate::errors::BrowserError;
use crate::steps::status::StepStatus;
use crate::steps::transport::{ClientType, TransportSet};

pub struct BrowserPool {
    launcher: Arc<dyn BrowserLauncher>,
    settings: BrowserSection,
    cached: Option<BrowserHandle>,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: BrowserSection) -> Self {
        Self {
            launcher,
            settings,
            cached: None,
        }
    }

    /// Kind of the cached browser, if one is alive.
    pub fn cached_kind(&self) -> Option<ClientType> {
        self.cached.as_ref().map(|handle| handle.kind)
    }

    pub fn cached(&self) -> Option<&BrowserHandle> {
        self.cached.as_ref()
    }

    /// Pick the transport for a check that supports `supported`.
    ///
    /// Requests win whenever allowed. Otherwise the first supported browser
    /// is used, unless a different supported browser is already cached and
    /// `prefer_cached_browser` is set.
    pub fn select_transport(&self, supported: TransportSet) -> Option<ClientType> {
        if supported.contains(ClientType::Requests) {
            return Some(ClientType::Requests);
        }
        let first = supported.first_browser()?;
        if self.settings.prefer_cached_browser
            && let Some(cached) = self.cached_kind()
            && cached != first
            && supported.contains(cached)
        {
            tracing::info!(%cached, %first, "switching run to cached browser");
            return Some(cached);
        }
        Some(first)
    }

    /// A clean session of `kind`, reusing the cached browser when possible.
    pub async fn acquire(&mut self, kind: ClientType) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        if let Some(handle) = &self.cached {
            if handle.kind == kind {
                let cleaned = clean(handle.session.as_ref()).await;
                match cleaned {
                    Ok(()) => {
                        tracing::debug!(browser = %kind, id = %handle.id, "using cached browser");
                        return Ok(Arc::clone(&handle.session));
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "error whilst cleaning cached browser");
                        self.teardown().await;
                    }
                }
            } else {
                tracing::debug!(cached = %handle.kind, wanted = %kind, "cached browser type does not match");
                self.teardown().await;
            }
        }

        tracing::debug!(browser = %kind, "creating new browser");
        let handle = self.launcher.launch(kind).await?;
        let session = Arc::clone(&handle.session);
        self.cached = Some(handle);
        Ok(session)
    }

    /// Apply the caching policy once a run has finished.
    pub async fn release(&mut self, status: StepStatus) {
        let failed = !status.is_success();
        if (failed && self.settings.teardown_on_failure) || !self.settings.cache_browser {
            self.teardown().await;
        }
    }

    /// Close the cached browser, if any. Never fails.
    pub async fn teardown(&mut self) {
        let Some(handle) = self.cached.take() else {
            return;
        };
        tracing::debug!(browser = %handle.kind, id = %handle.id, "tearing down browser");

        for (action, result) in [
            ("close", handle.session.close_window().await),
            ("quit", handle.session.quit().await),
        ] {
            match result {
                Ok(()) => {}
                Err(err) if err.is_dead_session() => {
                    tracing::debug!(action, error = %err, "browser session already gone");
                }
                Err(err) => {
                    tracing::warn!(action, error = %err, "failed to close browser cleanly");
                }
            }
        }

        kill_process(handle).await;
    }
}

impl std::fmt::Debug for BrowserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPool")
            .field("settings", &self.settings)
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

async fn clean(session: &dyn BrowserSession) -> Result<(), BrowserError> {
    session.goto("about:blank").await?;
    session.delete_all_cookies().await
}

/// Kill the driver and everything it started.
async fn kill_process(handle: BrowserHandle) {
    #[cfg(unix)]
    {
        if let Some(pid) = handle.pid.and_then(|pid| i32::try_from(pid).ok()) {
            // SAFETY: kill(2) has no memory-safety preconditions. The driver was
            // spawned as its own process group leader, so -pid is that group.
            let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(pid, error = %std::io::Error::last_os_error(), "browser process group already gone");
            }
        }
    }

    if let Some(mut child) = handle.process {
        if let Err(err) = child.start_kill() {
            tracing::debug!(error = %err, "browser driver already exited");
        }
        if let Err(err) = child.wait().await {
            tracing::debug!(error = %err, "failed to reap browser driver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::browser::{ElementRef, Locator};

    #[derive(Default)]
    struct StubSession {
        broken: AtomicBool,
        quits: AtomicUsize,
        dead: bool,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(BrowserError::InvalidSession("gone".into()));
            }
            Ok(())
        }
        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("about:blank".into())
        }
        async fn title(&self) -> Result<String, BrowserError> {
            Ok(String::new())
        }
        async fn find_element(&self, _: Option<&ElementRef>, l: &Locator) -> Result<ElementRef, BrowserError> {
            Err(BrowserError::NoSuchElement(l.to_string()))
        }
        async fn element_text(&self, _: &ElementRef) -> Result<String, BrowserError> {
            Ok(String::new())
        }
        async fn click(&self, _: &ElementRef) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn send_keys(&self, _: &ElementRef, _: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn is_displayed(&self, _: &ElementRef) -> Result<bool, BrowserError> {
            Ok(true)
        }
        async fn is_enabled(&self, _: &ElementRef) -> Result<bool, BrowserError> {
            Ok(true)
        }
        async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
            Ok(Vec::new())
        }
        async fn execute_script(&self, _: &str) -> Result<Value, BrowserError> {
            Ok(Value::Null)
        }
        async fn delete_all_cookies(&self) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn close_window(&self) -> Result<(), BrowserError> {
            if self.dead {
                return Err(BrowserError::InvalidSession("gone".into()));
            }
            Ok(())
        }
        async fn quit(&self) -> Result<(), BrowserError> {
            self.quits.fetch_add(1, Ordering::SeqCst);
            if self.dead {
                return Err(BrowserError::Unreachable {
                    url: "http://127.0.0.1:4444".into(),
                    message: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubLauncher {
        launched: Mutex<Vec<(ClientType, Arc<StubSession>)>>,
        dead_sessions: bool,
    }

    impl StubLauncher {
        fn launches(&self) -> usize {
            self.launched.lock().unwrap().len()
        }

        fn session(&self, index: usize) -> Arc<StubSession> {
            Arc::clone(&self.launched.lock().unwrap()[index].1)
        }
    }

    #[async_trait]
    impl BrowserLauncher for StubLauncher {
        async fn launch(&self, kind: ClientType) -> Result<BrowserHandle, BrowserError> {
            let session = Arc::new(StubSession {
                dead: self.dead_sessions,
                ..Default::default()
            });
            self.launched.lock().unwrap().push((kind, Arc::clone(&session)));
            Ok(BrowserHandle::new(kind, true, session))
        }
    }

    fn settings(cache_browser: bool) -> BrowserSection {
        BrowserSection {
            cache_browser,
            ..BrowserSection::default()
        }
    }

    fn pool(launcher: &Arc<StubLauncher>, cache_browser: bool) -> BrowserPool {
        BrowserPool::new(Arc::clone(launcher) as Arc<dyn BrowserLauncher>, settings(cache_browser))
    }

    #[tokio::test]
    async fn test_reuses_cached_browser_after_success() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, true);

        let first = pool.acquire(ClientType::Firefox).await.unwrap();
        pool.release(StepStatus::Success).await;
        let second = pool.acquire(ClientType::Firefox).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_new_browser_after_failure() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, true);

        let first = pool.acquire(ClientType::Firefox).await.unwrap();
        pool.release(StepStatus::Failed).await;
        assert!(pool.cached().is_none());
        let second = pool.acquire(ClientType::Firefox).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.session(0).quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_browser_when_teardown_disabled() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = BrowserPool::new(
            Arc::clone(&launcher) as Arc<dyn BrowserLauncher>,
            BrowserSection {
                cache_browser: true,
                teardown_on_failure: false,
                ..BrowserSection::default()
            },
        );
        pool.acquire(ClientType::Chrome).await.unwrap();
        pool.release(StepStatus::Failed).await;
        assert_eq!(pool.cached_kind(), Some(ClientType::Chrome));
    }

    #[tokio::test]
    async fn test_caching_disabled_always_tears_down() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, false);

        let first = pool.acquire(ClientType::Chrome).await.unwrap();
        pool.release(StepStatus::Success).await;
        let second = pool.acquire(ClientType::Chrome).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_mismatched_kind_replaced() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, true);

        pool.acquire(ClientType::Firefox).await.unwrap();
        pool.acquire(ClientType::Chrome).await.unwrap();

        assert_eq!(pool.cached_kind(), Some(ClientType::Chrome));
        assert_eq!(launcher.session(0).quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broken_cached_browser_replaced() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, true);

        pool.acquire(ClientType::Firefox).await.unwrap();
        launcher.session(0).broken.store(true, Ordering::SeqCst);
        pool.acquire(ClientType::Firefox).await.unwrap();

        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn test_teardown_tolerates_dead_session() {
        let launcher = Arc::new(StubLauncher {
            dead_sessions: true,
            ..Default::default()
        });
        let mut pool = pool(&launcher, true);
        pool.acquire(ClientType::Firefox).await.unwrap();
        pool.teardown().await;
        assert!(pool.cached().is_none());
        pool.teardown().await;
    }

    #[tokio::test]
    async fn test_select_transport() {
        let launcher = Arc::new(StubLauncher::default());
        let mut pool = pool(&launcher, true);

        assert_eq!(pool.select_transport(TransportSet::ALL), Some(ClientType::Requests));
        assert_eq!(pool.select_transport(TransportSet::BROWSERS), Some(ClientType::Firefox));
        assert_eq!(pool.select_transport(TransportSet::EMPTY), None);

        pool.acquire(ClientType::Chrome).await.unwrap();
        assert_eq!(pool.select_transport(TransportSet::BROWSERS), Some(ClientType::Chrome));
        assert_eq!(pool.select_transport(TransportSet::FIREFOX), Some(ClientType::Firefox));
    }
}
