//! Stories about a single binding from creation to physical deletion

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;

use credbind::controller::ObjectKind;
use credbind::{Error, BINDING_FINALIZER, CREDENTIAL_FINALIZER};

use super::helpers::{binding, finalizers_of, labels_of, World};

const AWS: &str = "provider.shoot.gardener.cloud/aws";
const CB_REF: &str = "reference.gardener.cloud/credentialsbinding";

/// Story: a platform team creates binding `b1` in `ns1` for Secret `secret-a`
/// (provider aws) and Quota `q1`. The first reconcile takes ownership of
/// everything; deleting `b1` later hands everything back and the store
/// removes the binding.
#[tokio::test]
async fn story_create_then_delete_single_binding() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world.store.add_quota("ns1", "q1");
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns1", "q1")]));

    // Chapter 1: first reconcile
    let action = world.reconcile("ns1", "b1").await.unwrap();
    assert_eq!(action, Action::requeue(world.ctx.config.resync()));

    let b1 = world.store.binding("ns1", "b1").unwrap();
    assert_eq!(finalizers_of(&b1.metadata), vec![BINDING_FINALIZER]);

    let secret = world.store.secret("ns1", "secret-a");
    let labels = labels_of(&secret.metadata);
    assert_eq!(labels.get(AWS).map(String::as_str), Some("true"));
    assert_eq!(labels.get(CB_REF).map(String::as_str), Some("true"));
    assert_eq!(finalizers_of(&secret.metadata), vec![CREDENTIAL_FINALIZER]);

    let quota = world.store.quota("ns1", "q1");
    assert_eq!(
        labels_of(&quota.metadata).get(CB_REF).map(String::as_str),
        Some("true")
    );

    // Chapter 2: deletion with nobody else around
    world.store.delete_binding("ns1", "b1");
    assert!(world.store.binding("ns1", "b1").is_some(), "finalizer holds it");

    let action = world.reconcile("ns1", "b1").await.unwrap();
    assert_eq!(action, Action::await_change());

    let secret = world.store.secret("ns1", "secret-a");
    assert!(labels_of(&secret.metadata).is_empty());
    assert!(finalizers_of(&secret.metadata).is_empty());
    assert!(labels_of(&world.store.quota("ns1", "q1").metadata).is_empty());
    assert!(world.store.binding("ns1", "b1").is_none(), "binding is gone");

    // Chapter 3: a late event for the vanished binding is a no-op
    let before = world.store.patch_count();
    let action = world.reconcile("ns1", "b1").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(world.store.patch_count(), before);
}

/// Story: reconciling a converged binding again writes nothing at all.
#[tokio::test]
async fn story_second_reconcile_is_a_no_op() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[("team", "payments")]);
    world.store.add_quota("ns2", "q1");
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns2", "q1")]));

    world.reconcile("ns1", "b1").await.unwrap();
    let after_first = world.store.patch_count();
    assert_eq!(after_first, 3, "binding, secret and quota each patched once");

    world.reconcile("ns1", "b1").await.unwrap();
    world.reconcile("ns1", "b1").await.unwrap();
    assert_eq!(world.store.patch_count(), after_first);

    let labels = labels_of(&world.store.secret("ns1", "secret-a").metadata);
    assert_eq!(labels.get("team").map(String::as_str), Some("payments"));
}

/// Story: Shoots still use the binding, so deletion is refused loudly and
/// nothing changes until the Shoots are gone.
#[tokio::test]
async fn story_consumers_gate_deletion() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world.store.add_quota("ns1", "q1");
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns1", "q1")]));
    world.reconcile("ns1", "b1").await.unwrap();

    world.shoots.add("ns1", "shoot-b", "b1");
    world.shoots.add("ns1", "shoot-a", "b1");
    world.shoots.add("ns2", "shoot-c", "b1");
    world.store.delete_binding("ns1", "b1");

    // Chapter 1: blocked
    let before = world.store.patch_count();
    let err = world.reconcile("ns1", "b1").await.unwrap_err();
    match &err {
        Error::DeletionBlocked { consumers, .. } => {
            assert_eq!(consumers, &vec!["ns1/shoot-a", "ns1/shoot-b"]);
        }
        other => panic!("expected DeletionBlocked, got {other:?}"),
    }
    assert_eq!(world.store.patch_count(), before);

    let b1 = world.store.binding("ns1", "b1").unwrap();
    assert_eq!(finalizers_of(&b1.metadata), vec![BINDING_FINALIZER]);
    let labels = labels_of(&world.store.secret("ns1", "secret-a").metadata);
    assert!(labels.contains_key(CB_REF));

    let events = world.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object, "ns1/b1");
    assert_eq!(events[0].type_, EventType::Warning);
    assert_eq!(events[0].reason, "ResourceReferenced");
    assert!(events[0].note.contains("ns1/shoot-a, ns1/shoot-b"));

    // Chapter 2: Shoots removed, the next poll goes through
    world.shoots.clear();
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(world.store.binding("ns1", "b1").is_none());
    assert!(labels_of(&world.store.secret("ns1", "secret-a").metadata).is_empty());
}

/// Story: a binding pointing at a Secret that does not exist yet keeps
/// failing, but still holds its finalizer; once the Secret appears the next
/// pass converges.
#[tokio::test]
async fn story_missing_secret_fails_until_it_appears() {
    let world = World::new();
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));

    let err = world.reconcile("ns1", "b1").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.is_retryable());
    let b1 = world.store.binding("ns1", "b1").unwrap();
    assert_eq!(finalizers_of(&b1.metadata), vec![BINDING_FINALIZER]);

    world.store.add_secret("ns1", "secret-a", &[]);
    world.reconcile("ns1", "b1").await.unwrap();
    let labels = labels_of(&world.store.secret("ns1", "secret-a").metadata);
    assert!(labels.contains_key(AWS));
}

#[tokio::test]
async fn missing_quota_fails_the_add_path() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns2", "absent")]));

    let err = world.reconcile("ns1", "b1").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("Quota ns2/absent"));
}

#[tokio::test]
async fn deleting_binding_with_vanished_secret_and_quota_completes() {
    let world = World::new();
    world.store.add_binding({
        let mut b = binding("ns1", "b1", "aws", "secret-gone", &[("ns1", "q-gone")]);
        b.metadata.finalizers = Some(vec![BINDING_FINALIZER.to_string()]);
        b
    });
    world.store.delete_binding("ns1", "b1");

    world.reconcile("ns1", "b1").await.unwrap();
    assert!(world.store.binding("ns1", "b1").is_none());
    assert_eq!(
        world
            .store
            .patches_to(ObjectKind::CredentialsBinding, "ns1", "b1"),
        1
    );
}

#[tokio::test]
async fn binding_with_foreign_finalizer_outlives_release() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world.store.add_binding({
        let mut b = binding("ns1", "b1", "aws", "secret-a", &[]);
        b.metadata.finalizers = Some(vec!["example.com/other".to_string()]);
        b
    });
    world.reconcile("ns1", "b1").await.unwrap();

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();

    let b1 = world.store.binding("ns1", "b1").expect("still finalized by someone else");
    assert_eq!(finalizers_of(&b1.metadata), vec!["example.com/other"]);
    assert!(labels_of(&world.store.secret("ns1", "secret-a").metadata).is_empty());
}
