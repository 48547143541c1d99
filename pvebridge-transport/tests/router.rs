//! Router selection and lifecycle fan-out with in-memory backends.

use std::sync::Arc;

use pvebridge_transport::*;

const CLASSES: [OperationClass; 4] = [
    OperationClass::Read,
    OperationClass::Write,
    OperationClass::Snapshot,
    OperationClass::Config,
];

fn both() -> (Arc<MockTransport>, Arc<MockTransport>, Router) {
    let ssh = Arc::new(MockTransport::new(BackendKind::Ssh));
    let api = Arc::new(MockTransport::new(BackendKind::Api));
    let router = Router::from_backends(
        Some(ssh.clone() as Arc<dyn Transport>),
        Some(api.clone() as Arc<dyn Transport>),
    )
    .unwrap();
    (ssh, api, router)
}

#[test]
fn test_explicit_preference_always_wins() {
    let (_, _, router) = both();
    for class in CLASSES {
        for kind in [BackendKind::Ssh, BackendKind::Api] {
            let t = router.get_transport(Some(kind), class).ok().unwrap();
            assert_eq!(t.kind(), kind, "{class} with preference {kind}");
        }
    }
}

#[test]
fn test_unconfigured_preference_always_fails() {
    let router = Router::from_backends(
        None,
        Some(Arc::new(MockTransport::new(BackendKind::Api)) as Arc<dyn Transport>),
    )
    .unwrap();

    for class in CLASSES {
        let err = router.get_transport(Some(BackendKind::Ssh), class).err().unwrap();
        assert!(matches!(err, TransportError::Configuration(_)));
    }
}

#[test]
fn test_defaults_follow_class_table() {
    let (_, _, router) = both();
    for class in CLASSES {
        let t = router.get_transport(None, class).ok().unwrap();
        assert_eq!(t.kind(), class.preferred_backend());
    }
}

#[test]
fn test_single_backend_serves_every_class() {
    for kind in [BackendKind::Ssh, BackendKind::Api] {
        let backend = Some(Arc::new(MockTransport::new(kind)) as Arc<dyn Transport>);
        let router = match kind {
            BackendKind::Ssh => Router::from_backends(backend, None),
            BackendKind::Api => Router::from_backends(None, backend),
        }
        .unwrap();

        assert_eq!(router.configured(), vec![kind]);
        for class in CLASSES {
            assert_eq!(router.get_transport(None, class).ok().unwrap().kind(), kind);
        }
    }
}

#[tokio::test]
async fn test_connect_fans_out_to_all_backends() {
    let (ssh, api, router) = both();

    router.connect().await.unwrap();
    assert!(ssh.is_connected());
    assert!(api.is_connected());

    router.disconnect().await.unwrap();
    assert!(!ssh.is_connected());
    assert!(!api.is_connected());
}

#[tokio::test]
async fn test_one_failed_backend_fails_connect_but_not_the_other() {
    let ssh = Arc::new(MockTransport::new(BackendKind::Ssh).failing_connect());
    let api = Arc::new(MockTransport::new(BackendKind::Api));
    let router = Router::from_backends(
        Some(ssh.clone() as Arc<dyn Transport>),
        Some(api.clone() as Arc<dyn Transport>),
    )
    .unwrap();

    let err = router.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
    assert!(!ssh.is_connected());
    assert!(api.is_connected());
}

#[tokio::test]
async fn test_routed_call_reaches_chosen_backend_only() {
    let (ssh, api, router) = both();
    router.connect().await.unwrap();

    let t = router.get_transport(None, OperationClass::Snapshot).ok().unwrap();
    let _ = t.list_snapshots(GuestKind::Vm, None, 100).await;

    assert!(ssh.was_called("list_snapshots"));
    assert!(api.calls().is_empty());
}
