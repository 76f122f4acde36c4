//! Stories about Secrets and Quotas shared between bindings

use kube::runtime::controller::Action;
use rstest::rstest;

use credbind::controller::ObjectKind;
use credbind::{BINDING_FINALIZER, CREDENTIAL_FINALIZER};

use super::helpers::{binding, finalizers_of, labels_of, World};

const AWS: &str = "provider.shoot.gardener.cloud/aws";
const CB_REF: &str = "reference.gardener.cloud/credentialsbinding";
const SB_REF: &str = "reference.gardener.cloud/secretbinding";

fn secret_labels(world: &World) -> std::collections::BTreeMap<String, String> {
    labels_of(&world.store.secret("ns1", "secret-a").metadata)
}

/// Story: two bindings share `secret-a`. Deleting one must leave the Secret
/// marked for the other; deleting the second releases it.
#[tokio::test]
async fn story_shared_secret_survives_first_deletion() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world
        .store
        .add_binding(binding("ns1", "b2", "aws", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();
    world.reconcile("ns1", "b2").await.unwrap();

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(world.store.binding("ns1", "b1").is_none());
    let labels = secret_labels(&world);
    assert!(labels.contains_key(CB_REF));
    assert!(labels.contains_key(AWS));
    assert_eq!(
        finalizers_of(&world.store.secret("ns1", "secret-a").metadata),
        vec![CREDENTIAL_FINALIZER]
    );

    world.store.delete_binding("ns1", "b2");
    world.reconcile("ns1", "b2").await.unwrap();
    assert!(secret_labels(&world).is_empty());
    assert!(finalizers_of(&world.store.secret("ns1", "secret-a").metadata).is_empty());
}

/// Story: `secret-a` is also used by a legacy SecretBinding. When the last
/// CredentialsBinding goes, only its own marker is removed.
#[tokio::test]
async fn story_legacy_secret_binding_keeps_provider_label() {
    let world = World::new();
    world
        .store
        .add_secret("ns1", "secret-a", &[(SB_REF, "true"), (AWS, "true")]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(secret_labels(&world).contains_key(CB_REF));

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();

    let labels = secret_labels(&world);
    assert!(!labels.contains_key(CB_REF));
    assert!(labels.contains_key(AWS));
    assert!(labels.contains_key(SB_REF));
    assert_eq!(
        finalizers_of(&world.store.secret("ns1", "secret-a").metadata),
        vec![CREDENTIAL_FINALIZER]
    );
}

#[tokio::test]
async fn release_strips_provider_labels_of_every_type() {
    let world = World::new();
    world.store.add_secret(
        "ns1",
        "secret-a",
        &[("provider.shoot.gardener.cloud/gcp", "true"), ("team", "a")],
    );
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();

    let labels = secret_labels(&world);
    assert_eq!(labels.len(), 1);
    assert!(labels.contains_key("team"));
}

/// Story: quota `q1` in `garden` is referenced by bindings in two tenant
/// namespaces. Deleting them in either order removes the marker exactly
/// once, with the last binding.
#[rstest]
#[case::first_then_second(("n1", "b1"), ("n2", "b2"))]
#[case::second_then_first(("n2", "b2"), ("n1", "b1"))]
#[tokio::test]
async fn story_quota_shared_across_namespaces(
    #[case] first: (&str, &str),
    #[case] second: (&str, &str),
) {
    let world = World::new();
    world.store.add_secret("n1", "s1", &[]);
    world.store.add_secret("n2", "s2", &[]);
    world.store.add_quota("garden", "q1");
    world
        .store
        .add_binding(binding("n1", "b1", "aws", "s1", &[("garden", "q1")]));
    world
        .store
        .add_binding(binding("n2", "b2", "aws", "s2", &[("garden", "q1")]));
    world.reconcile("n1", "b1").await.unwrap();
    world.reconcile("n2", "b2").await.unwrap();
    assert_eq!(world.store.patches_to(ObjectKind::Quota, "garden", "q1"), 1);

    world.store.delete_binding(first.0, first.1);
    world.reconcile(first.0, first.1).await.unwrap();
    assert!(world.store.binding(first.0, first.1).is_none());
    assert!(labels_of(&world.store.quota("garden", "q1").metadata).contains_key(CB_REF));

    world.store.delete_binding(second.0, second.1);
    world.reconcile(second.0, second.1).await.unwrap();
    assert!(world.store.binding(second.0, second.1).is_none());
    assert!(labels_of(&world.store.quota("garden", "q1").metadata).is_empty());
    assert_eq!(
        world.store.patches_to(ObjectKind::Quota, "garden", "q1"),
        2,
        "one marker add, one marker removal"
    );
}

/// Story: both bindings sharing a quota are deleted at once. Whichever pass
/// runs first releases the quota; the other finds nothing left to do.
#[tokio::test]
async fn story_simultaneous_deletion_releases_once() {
    let world = World::new();
    world.store.add_secret("n1", "s1", &[]);
    world.store.add_secret("n2", "s2", &[]);
    world.store.add_quota("garden", "q1");
    world
        .store
        .add_binding(binding("n1", "b1", "aws", "s1", &[("garden", "q1")]));
    world
        .store
        .add_binding(binding("n2", "b2", "aws", "s2", &[("garden", "q1")]));
    world.reconcile("n1", "b1").await.unwrap();
    world.reconcile("n2", "b2").await.unwrap();

    world.store.delete_binding("n1", "b1");
    world.store.delete_binding("n2", "b2");
    world.reconcile("n1", "b1").await.unwrap();
    world.reconcile("n2", "b2").await.unwrap();

    assert!(world.store.binding("n1", "b1").is_none());
    assert!(world.store.binding("n2", "b2").is_none());
    assert!(labels_of(&world.store.quota("garden", "q1").metadata).is_empty());
    assert_eq!(world.store.patches_to(ObjectKind::Quota, "garden", "q1"), 2);
}

/// Story: `b2` is being deleted but Shoots still use it. Deleting `b1`,
/// which shares the Secret, must not pull the markers out from under `b2`.
#[tokio::test]
async fn story_blocked_co_holder_keeps_secret_marked() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world
        .store
        .add_binding(binding("ns1", "b2", "aws", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();
    world.reconcile("ns1", "b2").await.unwrap();

    world.shoots.add("ns1", "shoot-a", "b2");
    world.store.delete_binding("ns1", "b2");
    assert!(world.reconcile("ns1", "b2").await.is_err());

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(world.store.binding("ns1", "b1").is_none());
    assert!(secret_labels(&world).contains_key(CB_REF));

    world.shoots.clear();
    world.reconcile("ns1", "b2").await.unwrap();
    assert!(world.store.binding("ns1", "b2").is_none());
    assert!(secret_labels(&world).is_empty());
}

/// Story: `b2` is created while `b1` is being deleted and is not yet visible
/// to the reference scan, so `b1` releases `secret-a` too early. The next
/// reconcile of `b2` puts everything back.
#[tokio::test]
async fn story_undercount_heals_on_next_add_path() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world.store.add_quota("ns1", "q1");
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns1", "q1")]));
    world.reconcile("ns1", "b1").await.unwrap();

    world
        .store
        .add_binding(binding("ns1", "b2", "aws", "secret-a", &[("ns1", "q1")]));
    world.reconcile("ns1", "b2").await.unwrap();
    world.store.hide_from_list("ns1", "b2");

    world.store.delete_binding("ns1", "b1");
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(secret_labels(&world).is_empty(), "released too early");
    assert!(labels_of(&world.store.quota("ns1", "q1").metadata).is_empty());

    world.store.unhide_all();
    let action = world.reconcile("ns1", "b2").await.unwrap();
    assert_eq!(action, Action::requeue(world.ctx.config.resync()));

    let labels = secret_labels(&world);
    assert!(labels.contains_key(AWS));
    assert!(labels.contains_key(CB_REF));
    assert_eq!(
        finalizers_of(&world.store.secret("ns1", "secret-a").metadata),
        vec![CREDENTIAL_FINALIZER]
    );
    assert!(labels_of(&world.store.quota("ns1", "q1").metadata).contains_key(CB_REF));
}

#[tokio::test]
async fn label_removed_out_of_band_is_restored() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();

    world.store.remove_secret_label("ns1", "secret-a", CB_REF);
    world.reconcile("ns1", "b1").await.unwrap();
    assert!(secret_labels(&world).contains_key(CB_REF));
}

/// Story: another writer touches the quota between our read and our
/// conditional write. The pass backs off without an error, keeps the binding
/// finalized, and the retry from a fresh read completes the release.
#[tokio::test]
async fn story_quota_write_race_retries_from_fresh_read() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world.store.add_quota("ns1", "q1");
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[("ns1", "q1")]));
    world.reconcile("ns1", "b1").await.unwrap();

    world.store.delete_binding("ns1", "b1");
    world
        .store
        .interfere_after_next_read(ObjectKind::Quota, "ns1", "q1");

    let action = world.reconcile("ns1", "b1").await.unwrap();
    assert_eq!(action, Action::requeue(world.ctx.config.conflict_requeue()));
    let b1 = world.store.binding("ns1", "b1").expect("still finalized");
    assert_eq!(finalizers_of(&b1.metadata), vec![BINDING_FINALIZER]);
    assert!(labels_of(&world.store.quota("ns1", "q1").metadata).contains_key(CB_REF));

    let action = world.reconcile_settled("ns1", "b1").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(world.store.binding("ns1", "b1").is_none());
    assert!(labels_of(&world.store.quota("ns1", "q1").metadata).is_empty());
}

#[tokio::test]
async fn second_provider_type_adds_second_label() {
    let world = World::new();
    world.store.add_secret("ns1", "secret-a", &[]);
    world
        .store
        .add_binding(binding("ns1", "b1", "aws", "secret-a", &[]));
    world
        .store
        .add_binding(binding("ns1", "b2", "gcp", "secret-a", &[]));
    world.reconcile("ns1", "b1").await.unwrap();
    world.reconcile("ns1", "b2").await.unwrap();

    let labels = secret_labels(&world);
    assert!(labels.contains_key(AWS));
    assert!(labels.contains_key("provider.shoot.gardener.cloud/gcp"));
}
