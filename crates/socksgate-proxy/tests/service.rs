//! End-to-end behavior of the proxy service over the in-memory host.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use socksgate_core::{
    bypass, Alert, AlertSink, BypassRule, Indicator, IndicatorStatus, ProxyMode, ProxyTarget, SharedIndicator,
    StateUpdate, Whitelist,
};
use socksgate_proxy::{
    ErrorKind, HostEvent, HostProxyConfig, HostProxyService, MemoryProxyService, PortInput,
    ProxyError, ProxyHandle, ProxyService, RawConfig, ServiceConfig,
};
use socksgate_storage::ConfigStore;
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    fn last(&self) -> Option<Alert> {
        self.alerts.lock().unwrap().last().cloned()
    }
}

impl AlertSink for RecordingSink {
    fn show(&self, alert: &Alert) -> Result<(), String> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct Harness {
    handle: ProxyHandle,
    host: MemoryProxyService,
    store: ConfigStore,
    sink: Arc<RecordingSink>,
    indicator: SharedIndicator,
}

fn start_with(host: MemoryProxyService, store: ConfigStore) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let indicator = SharedIndicator::new();
    let (handle, _task) = ProxyService::spawn(
        Arc::new(host.clone()),
        store.clone(),
        Arc::new(indicator.clone()),
        sink.clone(),
        ServiceConfig::default(),
    );
    Harness {
        handle,
        host,
        store,
        sink,
        indicator,
    }
}

fn start() -> Harness {
    start_with(MemoryProxyService::new(), ConfigStore::in_memory().unwrap())
}

fn raw(host: &str, port: u16, whitelist: &[&str]) -> RawConfig {
    RawConfig {
        host: host.to_string(),
        port: PortInput::from(port),
        username: None,
        password: None,
        whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
    }
}

// ==================== Toggle Tests ====================

#[tokio::test]
async fn enable_with_wildcard_whitelist() {
    let h = start();

    assert_ok!(
        h.handle
            .update_config(raw("10.0.0.1", 1080, &["*.example.com"]))
            .await
    );
    let status = assert_ok!(h.handle.toggle(true).await);

    assert_eq!(status.mode, ProxyMode::Proxied);
    assert!(status.enabled);
    assert_eq!(status.indicator, IndicatorStatus::On);

    let active = h.host.current();
    assert_eq!(active.target().unwrap().endpoint(), "10.0.0.1:1080");
    let rules: Vec<&BypassRule> = active.bypass().unwrap().iter().collect();
    assert_eq!(rules.len(), 3);
    assert!(rules.contains(&&BypassRule::Host("localhost".into())));
    assert!(rules.contains(&&BypassRule::Host("127.0.0.1".into())));
    assert!(rules.contains(&&BypassRule::Domain("example.com".into())));
}

#[tokio::test]
async fn disable_returns_to_direct() {
    let h = start();
    h.handle.toggle(true).await.unwrap();

    let status = h.handle.toggle(false).await.unwrap();

    assert_eq!(status.mode, ProxyMode::Direct);
    assert_eq!(h.host.current(), HostProxyConfig::Direct);
    assert!(!h.store.get().await.unwrap().enabled);
    assert_eq!(h.indicator.current(), IndicatorStatus::Off);
}

#[tokio::test]
async fn failed_toggle_keeps_persisted_flag() {
    let h = start();
    h.handle.sync().await.unwrap();
    h.host.fail_proxied_applies(Some("connection refused".into()));

    let err = h.handle.toggle(true).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HostServiceError);
    assert!(!h.store.get().await.unwrap().enabled);

    let status = h.handle.status();
    assert_eq!(status.mode, ProxyMode::Direct);
    assert!(!status.enabled);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::HostServiceError);
    assert_eq!(h.sink.last(), Some(Alert::apply_failed()));
}

#[tokio::test]
async fn success_clears_last_error() {
    let h = start();
    h.handle.sync().await.unwrap();
    h.host.fail_next_apply("busy");

    assert_err!(h.handle.toggle(true).await);
    assert!(h.handle.status().last_error.is_some());

    let status = h.handle.toggle(true).await.unwrap();
    assert!(status.last_error.is_none());
    assert_eq!(status.mode, ProxyMode::Proxied);
}

// ==================== Update Config Tests ====================

#[tokio::test]
async fn update_while_direct_does_not_touch_host() {
    let h = start();
    h.handle.sync().await.unwrap();
    let applies = h.host.apply_count();

    let status = h
        .handle
        .update_config(raw("10.0.0.2", 9050, &["intranet.local"]))
        .await
        .unwrap();

    assert_eq!(h.host.apply_count(), applies);
    assert_eq!(status.mode, ProxyMode::Direct);
    assert_eq!(status.target.host, "10.0.0.2");
    assert_eq!(status.target.port, 9050);
    assert_eq!(status.whitelist, vec!["intranet.local"]);

    let stored = h.store.get().await.unwrap();
    assert_eq!(stored.target, ProxyTarget::new("10.0.0.2", 9050).unwrap());
}

#[tokio::test]
async fn update_while_proxied_reapplies() {
    let h = start();
    h.handle.toggle(true).await.unwrap();

    h.handle
        .update_config(raw("10.0.0.3", 1081, &["*.corp.net"]))
        .await
        .unwrap();

    let active = h.host.current();
    assert_eq!(active.target().unwrap().endpoint(), "10.0.0.3:1081");
    assert!(active
        .bypass()
        .unwrap()
        .contains(&BypassRule::Domain("corp.net".into())));
}

#[tokio::test]
async fn failed_reapply_still_saves_settings() {
    let h = start();
    h.handle.toggle(true).await.unwrap();
    h.host.fail_proxied_applies(Some("refused".into()));

    let err = h
        .handle
        .update_config(raw("10.0.0.4", 1080, &[]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HostServiceError);
    let stored = h.store.get().await.unwrap();
    assert_eq!(stored.target.host(), "10.0.0.4");
    assert!(stored.enabled);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_the_service() {
    let h = start();
    h.handle.sync().await.unwrap();
    let before = h.handle.status();

    let err = h.handle.update_config(raw("", 1080, &[])).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidConfig(_)));

    let err = h
        .handle
        .update_config(raw("10.0.0.1", 1080, &["not a host"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);

    assert_eq!(h.handle.sync().await.unwrap().target, before.target);
    assert_eq!(h.sink.count(), 0);
}

// ==================== Cold Start Tests ====================

#[tokio::test]
async fn cold_start_goes_direct_then_proxied() {
    let store = ConfigStore::in_memory().unwrap();
    store
        .update(StateUpdate {
            enabled: Some(true),
            target: Some(ProxyTarget::new("10.0.0.1", 1080).unwrap()),
            whitelist: Some(Whitelist::parse(["*.example.com"]).unwrap()),
        })
        .await
        .unwrap();

    let h = start_with(MemoryProxyService::new(), store);
    let status = h.handle.sync().await.unwrap();

    let applied = h.host.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], HostProxyConfig::Direct);
    assert_eq!(applied[1].mode(), ProxyMode::Proxied);
    assert_eq!(
        applied[1].bypass().unwrap(),
        &bypass::build(&Whitelist::parse(["*.example.com"]).unwrap())
    );
    assert_eq!(status.mode, ProxyMode::Proxied);
}

#[tokio::test]
async fn cold_start_failure_ends_direct() {
    let store = ConfigStore::in_memory().unwrap();
    store.update(StateUpdate::enabled(true)).await.unwrap();

    let host = MemoryProxyService::with_active(HostProxyConfig::fixed(
        ProxyTarget::new("10.9.9.9", 1080).unwrap(),
        bypass::BypassList::builtin(),
    ));
    host.fail_proxied_applies(Some("upstream unreachable".into()));

    let h = start_with(host, store);
    let status = h.handle.sync().await.unwrap();

    assert!(h
        .host
        .applied()
        .iter()
        .all(|config| *config == HostProxyConfig::Direct));
    assert_eq!(h.host.current(), HostProxyConfig::Direct);
    assert_eq!(status.mode, ProxyMode::Direct);
    // The request survives for the next start.
    assert!(status.enabled);
    assert_eq!(h.sink.count(), 1);
}

#[tokio::test]
async fn cold_start_direct_failure_is_alerted() {
    let store = ConfigStore::in_memory().unwrap();
    let host = MemoryProxyService::with_active(HostProxyConfig::fixed(
        ProxyTarget::new("10.9.9.9", 1080).unwrap(),
        bypass::BypassList::builtin(),
    ));
    host.fail_next_apply("proxy settings locked");

    let h = start_with(host, store);
    let status = h.handle.sync().await.unwrap();

    // The retry during rollback succeeded.
    assert_eq!(h.host.current(), HostProxyConfig::Direct);
    assert_eq!(status.mode, ProxyMode::Direct);
    assert!(!status.enabled);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::HostServiceError);
    assert_eq!(h.sink.last(), Some(Alert::apply_failed()));
}

#[tokio::test]
async fn cold_start_reports_a_proxy_it_could_not_clear() {
    let store = ConfigStore::in_memory().unwrap();
    let stale = HostProxyConfig::fixed(
        ProxyTarget::new("10.9.9.9", 1080).unwrap(),
        bypass::BypassList::builtin(),
    );
    let host = MemoryProxyService::with_active(stale.clone());
    host.fail_applies(Some("proxy settings locked".into()));

    let h = start_with(host, store);
    let status = h.handle.sync().await.unwrap();

    assert_eq!(h.host.current(), stale);
    assert_eq!(status.mode, ProxyMode::Proxied);
    assert_eq!(status.indicator, IndicatorStatus::On);
    assert!(!status.enabled);
    assert!(status.last_error.is_some());
    assert_eq!(h.sink.count(), 1);
}

#[tokio::test]
async fn partial_apply_leaves_nothing_behind() {
    let h = start();
    h.handle.sync().await.unwrap();
    h.host.fail_next_apply_after_install("ignore-hosts failed");

    assert_err!(h.handle.toggle(true).await);

    let status = h.handle.status();
    assert_eq!(h.host.current(), HostProxyConfig::Direct);
    assert_eq!(status.mode, ProxyMode::Direct);
    assert!(!h.store.get().await.unwrap().enabled);
    assert_eq!(h.sink.count(), 1);
}

// ==================== Notification Tests ====================

#[tokio::test(start_paused = true)]
async fn failures_inside_cooldown_notify_once() {
    let h = start();
    h.handle.sync().await.unwrap();
    h.host.fail_proxied_applies(Some("refused".into()));

    assert_err!(h.handle.toggle(true).await);
    tokio::time::advance(Duration::from_millis(2000)).await;
    assert_err!(h.handle.toggle(true).await);
    assert_eq!(h.sink.count(), 1);

    tokio::time::advance(Duration::from_millis(4000)).await;
    assert_err!(h.handle.toggle(true).await);
    assert_eq!(h.sink.count(), 2);
}

#[tokio::test]
async fn host_events_become_notifications() {
    let h = start();
    h.handle.sync().await.unwrap();

    h.host.report(HostEvent::ProxyError {
        error: "net::ERR_SOCKS_CONNECTION_FAILED".into(),
        fatal: true,
    });
    let mut status = h.handle.subscribe();
    status
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap();

    assert_eq!(
        h.sink.last(),
        Some(Alert::proxy_error("net::ERR_SOCKS_CONNECTION_FAILED"))
    );
    assert_eq!(
        h.handle.status().last_error.unwrap().kind,
        ErrorKind::ConnectionFailure
    );
    // Advisory only.
    assert_eq!(h.handle.status().mode, ProxyMode::Direct);
}

// ==================== Concurrency Tests ====================

#[tokio::test]
async fn concurrent_toggles_are_serialized() {
    let h = start();

    let a = h.handle.clone();
    let b = h.handle.clone();
    let (ra, rb) = tokio::join!(a.toggle(true), b.toggle(false));
    assert_ok!(ra);
    assert_ok!(rb);

    let status = h.handle.sync().await.unwrap();
    let stored = h.store.get().await.unwrap();
    assert_eq!(h.host.current().mode(), status.mode);
    assert_eq!(stored.enabled, status.mode.is_proxied());
    assert_eq!(
        h.indicator.current(),
        IndicatorStatus::from_mode(status.mode)
    );
}

#[tokio::test]
async fn stopped_service_is_unavailable() {
    let host = MemoryProxyService::new();
    let store = ConfigStore::in_memory().unwrap();
    let (handle, task) = ProxyService::spawn(
        Arc::new(host),
        store,
        Arc::new(SharedIndicator::new()),
        Arc::new(RecordingSink::default()),
        ServiceConfig::default(),
    );
    task.abort();
    let _ = task.await;

    let err = handle.toggle(true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}
