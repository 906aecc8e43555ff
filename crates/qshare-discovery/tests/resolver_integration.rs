//! Integration tests for the endpoint resolver state machine

use async_trait::async_trait;
use qshare_discovery::{
    Advertisement, BrowseEvent, BrowseReceiver, DiscoveryBackend, DiscoveryEvent, DiscoveryEvents,
    EndpointResolver, FailureCode, ResolvedService, ResolverConfig, ResolverState,
};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const QSHARE_TYPE: &str = "_qshare._tcp.local.";

/// Backend whose browse events and resolve results are driven by the test
#[derive(Default)]
struct ScriptedBackend {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BrowseEvent>>>,
    outcomes: Mutex<HashMap<String, (Duration, Result<ResolvedService, FailureCode>)>>,
    resolve_calls: Mutex<Vec<String>>,
    browse_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    fail_browse: Option<FailureCode>,
    fail_stop: bool,
}

impl ScriptedBackend {
    /// Deliver a found event to every live subscription, returning how many got it
    fn announce(&self, advertisement: &Advertisement) -> usize {
        self.deliver(BrowseEvent::Found(advertisement.clone()))
    }

    fn withdraw(&self, advertisement: &Advertisement) -> usize {
        self.deliver(BrowseEvent::Lost(advertisement.clone()))
    }

    fn deliver(&self, event: BrowseEvent) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    fn script(&self, instance: &str, delay: Duration, result: Result<ResolvedService, FailureCode>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(instance.to_string(), (delay, result));
    }

    fn resolve_calls(&self) -> Vec<String> {
        self.resolve_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoveryBackend for ScriptedBackend {
    async fn browse(&self, _service_type: &str) -> Result<BrowseReceiver, FailureCode> {
        self.browse_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.fail_browse {
            return Err(code);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn stop_browse(&self, _service_type: &str) -> Result<(), FailureCode> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().clear();
        if self.fail_stop {
            Err(FailureCode::INTERNAL_ERROR)
        } else {
            Ok(())
        }
    }

    async fn resolve(&self, advertisement: &Advertisement) -> Result<ResolvedService, FailureCode> {
        self.resolve_calls
            .lock()
            .unwrap()
            .push(advertisement.instance_name.clone());

        let scripted = self
            .outcomes
            .lock()
            .unwrap()
            .get(&advertisement.instance_name)
            .cloned();

        let (delay, result) = scripted.unwrap_or_else(|| {
            (
                Duration::ZERO,
                Ok(service(&advertisement.instance_name, [127, 0, 0, 1], 5000)),
            )
        });
        tokio::time::sleep(delay).await;
        result
    }
}

fn service(instance: &str, ip: [u8; 4], port: u16) -> ResolvedService {
    ResolvedService {
        instance_name: instance.to_string(),
        hostname: "QShare.local.".to_string(),
        addresses: vec![IpAddr::V4(Ipv4Addr::from(ip))],
        port,
        properties: BTreeMap::from([("api".to_string(), "/api/list".to_string())]),
    }
}

fn advertisement(instance: &str) -> Advertisement {
    Advertisement::new(instance, QSHARE_TYPE)
}

fn resolver(backend: &Arc<ScriptedBackend>) -> (EndpointResolver<ScriptedBackend>, DiscoveryEvents) {
    EndpointResolver::new(Arc::clone(backend), ResolverConfig::default())
}

async fn next_event(events: &mut DiscoveryEvents) -> DiscoveryEvent {
    tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for discovery event")
        .expect("event stream closed")
}

async fn next_resolved(events: &mut DiscoveryEvents) -> ResolvedService {
    loop {
        if let DiscoveryEvent::Resolved { service, .. } = next_event(events).await {
            return service;
        }
    }
}

async fn wait_for_state(resolver: &EndpointResolver<ScriptedBackend>, state: ResolverState) {
    for _ in 0..100 {
        if resolver.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("resolver never reached {state:?}");
}

fn drain(events: &mut DiscoveryEvents) -> Vec<DiscoveryEvent> {
    std::iter::from_fn(|| events.try_next()).collect()
}

#[tokio::test]
async fn test_start_twice_keeps_single_subscription() {
    let backend = Arc::new(ScriptedBackend::default());
    let (resolver, mut events) = resolver(&backend);

    resolver.start_discovery().await;
    resolver.start_discovery().await;

    assert_eq!(backend.browse_calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 1);

    let ad = advertisement("QShare._qshare._tcp.local.");
    assert_eq!(backend.announce(&ad), 1);

    assert_eq!(next_event(&mut events).await, DiscoveryEvent::ServiceFound(ad));
    next_resolved(&mut events).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let rest = drain(&mut events);
    assert!(
        rest.iter()
            .all(|e| !matches!(e, DiscoveryEvent::ServiceFound(_))),
        "duplicate delivery: {rest:?}"
    );
    assert_eq!(backend.resolve_calls().len(), 1);
}

#[tokio::test]
async fn test_other_service_types_never_resolve() {
    let backend = Arc::new(ScriptedBackend::default());
    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;

    backend.announce(&Advertisement::new("Printer._ipp._tcp.local.", "_ipp._tcp.local."));
    backend.announce(&Advertisement::new("Web._http._tcp.local.", "_http._tcp.local."));
    backend.announce(&advertisement("QShare._qshare._tcp.local."));

    let first = next_event(&mut events).await;
    assert_eq!(
        first,
        DiscoveryEvent::ServiceFound(advertisement("QShare._qshare._tcp.local."))
    );
    next_resolved(&mut events).await;

    assert_eq!(backend.resolve_calls(), vec!["QShare._qshare._tcp.local."]);
}

#[tokio::test]
async fn test_first_successful_resolution_wins() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.script(
        "Slow._qshare._tcp.local.",
        Duration::from_millis(80),
        Ok(service("Slow._qshare._tcp.local.", [10, 0, 0, 1], 7001)),
    );
    backend.script(
        "Fast._qshare._tcp.local.",
        Duration::from_millis(5),
        Ok(service("Fast._qshare._tcp.local.", [10, 0, 0, 2], 7002)),
    );

    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;

    backend.announce(&advertisement("Slow._qshare._tcp.local."));
    backend.announce(&advertisement("Fast._qshare._tcp.local."));

    loop {
        if let DiscoveryEvent::Resolved { endpoint, .. } = next_event(&mut events).await {
            assert_eq!(endpoint.base_url(), "http://10.0.0.2:7002");
            break;
        }
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let rest = drain(&mut events);
    assert!(
        !rest
            .iter()
            .any(|e| matches!(e, DiscoveryEvent::Resolved { .. })),
        "late resolution was adopted: {rest:?}"
    );
    wait_for_state(&resolver, ResolverState::Idle).await;
}

#[tokio::test]
async fn test_resolve_failure_reported_without_retry() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.script(
        "QShare._qshare._tcp.local.",
        Duration::ZERO,
        Err(FailureCode::TIMEOUT),
    );

    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;

    let ad = advertisement("QShare._qshare._tcp.local.");
    backend.announce(&ad);

    assert_eq!(
        next_event(&mut events).await,
        DiscoveryEvent::ServiceFound(ad.clone())
    );
    assert_eq!(
        next_event(&mut events).await,
        DiscoveryEvent::ResolveFailed {
            advertisement: ad,
            code: FailureCode::TIMEOUT,
        }
    );

    wait_for_state(&resolver, ResolverState::Failed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.resolve_calls().len(), 1);
}

#[tokio::test]
async fn test_resolution_without_address_fails() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut unusable = service("QShare._qshare._tcp.local.", [0, 0, 0, 0], 5000);
    unusable.addresses.clear();
    unusable.hostname.clear();
    backend.script("QShare._qshare._tcp.local.", Duration::ZERO, Ok(unusable));

    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;
    backend.announce(&advertisement("QShare._qshare._tcp.local."));

    loop {
        match next_event(&mut events).await {
            DiscoveryEvent::ResolveFailed { code, .. } => {
                assert_eq!(code, FailureCode::NO_ADDRESS);
                break;
            }
            DiscoveryEvent::Resolved { .. } => panic!("unusable service adopted"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_start_failure_is_reported() {
    let backend = Arc::new(ScriptedBackend {
        fail_browse: Some(FailureCode::MAX_LIMIT),
        ..ScriptedBackend::default()
    });
    let (resolver, mut events) = resolver(&backend);

    resolver.start_discovery().await;

    assert_eq!(
        next_event(&mut events).await,
        DiscoveryEvent::DiscoveryStartFailed(FailureCode::MAX_LIMIT)
    );
    assert_eq!(resolver.state().await, ResolverState::Failed);
    assert!(!resolver.is_discovering().await);
}

#[tokio::test]
async fn test_stop_is_noop_when_idle_and_swallows_errors() {
    let backend = Arc::new(ScriptedBackend {
        fail_stop: true,
        ..ScriptedBackend::default()
    });
    let (resolver, _events) = resolver(&backend);

    resolver.stop_discovery().await;
    assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 0);
    assert_eq!(resolver.state().await, ResolverState::Idle);

    resolver.start_discovery().await;
    assert_eq!(resolver.state().await, ResolverState::Discovering);

    resolver.stop_discovery().await;
    resolver.stop_discovery().await;
    assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.state().await, ResolverState::Idle);
    assert!(!resolver.is_discovering().await);
}

#[tokio::test]
async fn test_stop_cancels_inflight_resolve() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.script(
        "QShare._qshare._tcp.local.",
        Duration::from_millis(200),
        Ok(service("QShare._qshare._tcp.local.", [10, 0, 0, 9], 5000)),
    );

    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;
    backend.announce(&advertisement("QShare._qshare._tcp.local."));

    assert!(matches!(
        next_event(&mut events).await,
        DiscoveryEvent::ServiceFound(_)
    ));
    resolver.stop_discovery().await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(resolver.state().await, ResolverState::Idle);
}

#[tokio::test]
async fn test_lost_winner_can_resolve_again() {
    let backend = Arc::new(ScriptedBackend::default());
    let (resolver, mut events) = resolver(&backend);
    resolver.start_discovery().await;

    let ad = advertisement("QShare._qshare._tcp.local.");
    backend.announce(&ad);
    next_resolved(&mut events).await;

    // A second peer is seen but not resolved while the first is adopted
    backend.announce(&advertisement("Other._qshare._tcp.local."));
    assert!(matches!(
        next_event(&mut events).await,
        DiscoveryEvent::ServiceFound(_)
    ));

    backend.withdraw(&ad);
    assert_eq!(
        next_event(&mut events).await,
        DiscoveryEvent::ServiceLost(ad.clone())
    );

    backend.announce(&ad);
    let service = next_resolved(&mut events).await;
    assert_eq!(service.instance_name, ad.instance_name);
    assert_eq!(
        backend.resolve_calls(),
        vec![ad.instance_name.clone(), ad.instance_name]
    );
}
