//! Usage tracker semantics against mock collaborators.

use std::collections::BTreeMap;

use nad_admission_controller::controller::ANY_NETWORK;

use crate::common::fixtures::{NadBuilder, standard_networks};
use crate::mock_state::{Emission, MockUsage};

fn totals(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(l, v)| (l.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_add_counts_types_combination_and_any() {
    let usage = MockUsage::new(standard_networks());
    usage
        .tracker
        .on_add("default/pod-a", "macvlan-conf,bridge-tuning", "default")
        .await;

    assert_eq!(
        usage.sink.totals(),
        totals(&[
            ("any", 1.0),
            ("bridge", 1.0),
            ("bridge,macvlan,tuning", 1.0),
            ("macvlan", 1.0),
            ("tuning", 1.0),
        ])
    );
    assert_eq!(
        usage.store().remembered("default/pod-a").as_deref(),
        Some("bridge,macvlan,tuning")
    );
}

#[tokio::test]
async fn test_single_type_has_no_combination() {
    let usage = MockUsage::new(standard_networks());
    usage
        .tracker
        .on_add("kube-system/pod-a", "sriov-net", "kube-system")
        .await;

    assert_eq!(usage.sink.totals(), totals(&[("any", 1.0), ("sriov", 1.0)]));
    assert_eq!(usage.sink.enabled("sriov"), Some(true));
    assert_eq!(usage.sink.enabled(ANY_NETWORK), Some(true));
}

#[tokio::test]
async fn test_duplicate_types_counted_once() {
    let usage = MockUsage::new(vec![
        NadBuilder::new("net-a").plugin("macvlan").build(),
        NadBuilder::new("net-b").plugin("macvlan").build(),
    ]);
    usage.tracker.on_add("default/pod-a", "net-a,net-b", "default").await;

    assert_eq!(usage.sink.totals(), totals(&[("any", 1.0), ("macvlan", 1.0)]));
}

#[tokio::test]
async fn test_plugin_type_with_comma_nets_to_zero() {
    let usage = MockUsage::new(vec![
        NadBuilder::new("odd-net").plugin("a,b").build(),
        NadBuilder::new("macvlan-conf").plugin("macvlan").build(),
    ]);
    usage.tracker.on_add("default/pod-a", "odd-net", "default").await;
    usage
        .tracker
        .on_add("default/pod-b", "odd-net,macvlan-conf", "default")
        .await;

    assert_eq!(
        usage.sink.totals(),
        totals(&[
            ("a,b", 2.0),
            ("a,b,macvlan", 1.0),
            ("any", 2.0),
            ("macvlan", 1.0),
        ])
    );

    usage.tracker.on_delete("default/pod-a");
    usage.tracker.on_delete("default/pod-b");
    assert!(usage.sink.totals().is_empty());
    assert!(usage.store().sums().is_empty());
}

#[tokio::test]
async fn test_add_then_delete_restores_sums() {
    let usage = MockUsage::new(standard_networks());
    usage
        .tracker
        .on_add("default/pod-a", "macvlan-conf,kube-system/sriov-net", "default")
        .await;
    usage.tracker.on_delete("default/pod-a");

    assert!(usage.sink.totals().is_empty());
    assert!(usage.store().sums().is_empty());
    assert_eq!(usage.store().remembered("default/pod-a"), None);
    assert_eq!(usage.sink.enabled("sriov"), Some(false));
    assert_eq!(usage.sink.enabled(ANY_NETWORK), Some(false));
}

#[tokio::test]
async fn test_delete_twice_equals_once() {
    let usage = MockUsage::new(standard_networks());
    usage.tracker.on_add("default/pod-a", "bridge-tuning", "default").await;
    usage.tracker.on_add("default/pod-b", "bridge-tuning", "default").await;

    usage.tracker.on_delete("default/pod-a");
    let once = usage.sink.emissions();
    usage.tracker.on_delete("default/pod-a");

    assert_eq!(usage.sink.emissions(), once);
    assert_eq!(usage.store().running_sum("bridge,tuning"), 1);
}

#[tokio::test]
async fn test_delete_of_untracked_pod_emits_nothing() {
    let usage = MockUsage::new(standard_networks());
    usage.tracker.on_delete("default/never-seen");
    assert!(usage.sink.emissions().is_empty());
}

#[tokio::test]
async fn test_readd_equals_delete_then_add() {
    let first = MockUsage::new(standard_networks());
    first.tracker.on_add("default/pod-a", "macvlan-conf", "default").await;
    first.tracker.on_add("default/pod-a", "bridge-tuning", "default").await;

    let second = MockUsage::new(standard_networks());
    second.tracker.on_add("default/pod-a", "macvlan-conf", "default").await;
    second.tracker.on_delete("default/pod-a");
    second.tracker.on_add("default/pod-a", "bridge-tuning", "default").await;

    assert_eq!(first.sink.emissions(), second.sink.emissions());
    assert_eq!(first.store().sums(), second.store().sums());
    assert_eq!(
        first.store().remembered("default/pod-a"),
        second.store().remembered("default/pod-a")
    );
}

#[tokio::test]
async fn test_delete_emits_types_then_combination_then_any() {
    let usage = MockUsage::new(standard_networks());
    usage.tracker.on_add("default/pod-a", "bridge-tuning", "default").await;
    usage.sink.clear();
    usage.tracker.on_delete("default/pod-a");

    let deltas: Vec<(String, f64)> = usage
        .sink
        .emissions()
        .into_iter()
        .filter_map(|e| match e {
            Emission::Instances { label, delta } => Some((label, delta)),
            Emission::Enabled { .. } => None,
        })
        .collect();
    assert_eq!(
        deltas,
        vec![
            ("bridge".to_string(), -1.0),
            ("tuning".to_string(), -1.0),
            ("bridge,tuning".to_string(), -1.0),
            ("any".to_string(), -1.0),
        ]
    );
}

#[tokio::test]
async fn test_missing_and_failing_lookups_are_skipped() {
    let usage = MockUsage::new(standard_networks());
    usage.lookup.fail("macvlan-conf");

    usage
        .tracker
        .on_add("default/pod-a", "macvlan-conf,does-not-exist,ib-net", "default")
        .await;

    assert_eq!(usage.lookup.calls(), 3);
    assert_eq!(usage.sink.totals(), totals(&[("any", 1.0), ("ib-sriov", 1.0)]));
    assert_eq!(usage.sink.enabled("ib-sriov"), Some(true));
}

#[tokio::test]
async fn test_unusable_pod_counts_any_and_reverses_it() {
    let usage = MockUsage::new(standard_networks());
    usage.tracker.on_add("default/pod-a", "no-config", "default").await;
    usage.tracker.on_add("default/pod-b", "other/ns/too-deep", "default").await;

    assert_eq!(usage.sink.totals(), totals(&[("any", 2.0)]));

    usage.tracker.on_delete("default/pod-a");
    usage.tracker.on_delete("default/pod-b");
    assert!(usage.sink.totals().is_empty());
}

#[tokio::test]
async fn test_definition_removed_between_add_and_delete() {
    let usage = MockUsage::new(standard_networks());
    usage.tracker.on_add("default/pod-a", "macvlan-conf", "default").await;

    // Delete reverses the remembered value, not a fresh lookup
    usage.lookup.remove("default", "macvlan-conf");
    usage.tracker.on_delete("default/pod-a");

    assert!(usage.sink.totals().is_empty());
}

#[tokio::test]
async fn test_json_annotation() {
    let usage = MockUsage::new(standard_networks());
    usage
        .tracker
        .on_add(
            "default/pod-a",
            r#"[{"name":"sriov-net","namespace":"kube-system","interface":"net1"}]"#,
            "default",
        )
        .await;

    assert_eq!(usage.sink.totals(), totals(&[("any", 1.0), ("sriov", 1.0)]));
}
