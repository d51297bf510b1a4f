//! Black-box exercises of the public `Builder`/`RuleExpr` surface against
//! the end-to-end scenarios in spec.md §8, run through a `CaptureRequestor`
//! so no real kernel is touched.

use std::sync::Arc;

use nft_client::builder::{
    Builder, BuilderError, BuilderOptions, ChainSpec, CommandOptions, MapSpec, RuleSpec, SetSpec,
};
use nft_client::decoder::DecodedResponse;
use nft_client::dsl::RuleExpr;
use nft_client::requestor::{CaptureRequestor, Requestor, SubmitOptions};
use nft_client::schema::{NfCmd, NfListObject, NfObject};
use nft_client::types::{NfChainPolicy, NfChainType, NfFamily, NfHook};

fn capture_builder() -> (Builder, Arc<CaptureRequestor>) {
    let requestor = Arc::new(CaptureRequestor::new());
    let builder = Builder::new(BuilderOptions {
        family: Some(NfFamily::INet),
        requestor: Some(requestor.clone() as Arc<dyn Requestor>),
    });
    (builder, requestor)
}

/// S1: a single bare table, added then submitted.
#[test]
fn s1_minimal_table_round_trips_through_submit() {
    let (builder, requestor) = capture_builder();
    let builder = builder
        .add(CommandOptions {
            table: Some("filter".to_string()),
            ..Default::default()
        })
        .unwrap();

    let result = builder.submit(SubmitOptions::new()).unwrap();
    assert_eq!(result, DecodedResponse::Ok);

    let captured = requestor.captured();
    assert_eq!(captured.len(), 1);
    match &captured[0].objects[0] {
        NfObject::CmdObject(NfCmd::Add(NfListObject::Table(t))) => {
            assert_eq!(t.family, NfFamily::INet);
            assert_eq!(t.name, "filter");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

/// S2: table + base chain + an SSH-allow rule built via the DSL, with
/// context propagating the table/chain names into the rule automatically.
#[test]
fn s2_ssh_allow_rule_via_dsl_and_context_propagation() {
    let (builder, requestor) = capture_builder();
    let expr = RuleExpr::new(NfFamily::INet)
        .tcp()
        .dport(22)
        .accept()
        .build()
        .unwrap();

    let builder = builder
        .add(CommandOptions {
            table: Some("filter".to_string()),
            ..Default::default()
        })
        .unwrap()
        .add(CommandOptions {
            chain: Some(ChainSpec {
                name: "INPUT".to_string(),
                chain_type: Some(NfChainType::Filter),
                hook: Some(NfHook::Input),
                priority: Some(0),
                policy: Some(NfChainPolicy::Drop),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap()
        .add(CommandOptions {
            rule: Some(RuleSpec {
                expr: Some(expr),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();

    let commands = builder.commands();
    let json = serde_json::to_value(&commands).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"nftables":[
            {"add":{"table":{"family":"inet","name":"filter"}}},
            {"add":{"chain":{"family":"inet","table":"filter","name":"INPUT",
                             "type":"filter","hook":"input","prio":0,"policy":"drop"}}},
            {"add":{"rule":{"family":"inet","table":"filter","chain":"INPUT",
                            "expr":[
                              {"match":{"left":{"payload":{"protocol":"ip","field":"protocol"}},
                                        "right":"tcp","op":"=="}},
                              {"match":{"left":{"payload":{"protocol":"tcp","field":"dport"}},
                                        "right":22,"op":"=="}},
                              {"accept":null}]}}}
        ])
    );

    let result = builder.submit(SubmitOptions::new()).unwrap();
    assert_eq!(result, DecodedResponse::Ok);
    assert_eq!(requestor.captured().len(), 1);
}

/// S3: an options bag naming two same-rank objects is rejected before any
/// command ever reaches a requestor.
#[test]
fn s3_ambiguous_object_is_rejected_without_submitting() {
    let (builder, requestor) = capture_builder();
    let err = builder
        .add(CommandOptions {
            set: Some(SetSpec::named("blocklist")),
            map: Some(MapSpec::named("portmap")),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, BuilderError::AmbiguousObject(_)));
    assert!(requestor.captured().is_empty());
}

/// S4: flushing one family's ruleset is a standalone command with no main
/// object for the priority dispatcher to detect.
#[test]
fn s4_flush_ruleset_submits_a_single_flush_command() {
    let (builder, requestor) = capture_builder();
    let builder = builder.flush_ruleset(Some(NfFamily::INet));

    let result = builder.submit(SubmitOptions::new()).unwrap();
    assert_eq!(result, DecodedResponse::Ok);

    let captured = requestor.captured();
    let json = serde_json::to_value(&captured[0]).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"nftables": [{"flush": {"ruleset": {"family": "inet"}}}]})
    );
}

/// A Builder with no bound requestor, and none supplied at submit time,
/// fails fast rather than silently doing nothing.
#[test]
fn submit_without_any_requestor_is_rejected() {
    let builder = Builder::new(BuilderOptions {
        family: Some(NfFamily::INet),
        requestor: None,
    })
    .add(CommandOptions {
        table: Some("filter".to_string()),
        ..Default::default()
    })
    .unwrap();

    let err = builder.submit(SubmitOptions::new()).unwrap_err();
    assert!(matches!(
        err,
        nft_client::builder::SubmitError::Request(nft_client::requestor::RequestError::NoRequestor)
    ));
}
