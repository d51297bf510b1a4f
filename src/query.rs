//! Pure query command constructors (spec §4.4): free functions building the
//! `list`/`flush` envelopes the kernel understands. Each function returns a
//! fully formed `{"nftables": [...]}` map, ready for any
//! [`Requestor::submit`](crate::requestor::Requestor::submit).
//!
//! These never touch I/O or the Builder's context — they are as pure as the
//! rest of the wire schema layer they sit on top of.

use crate::schema::{Chain, FamilyFilter, FlushObject, NfCmd, NfListObject, NfObject, Nftables, Ruleset, Set};
use crate::types::NfFamily;

fn envelope(cmd: NfCmd) -> Nftables {
    Nftables {
        objects: vec![NfObject::CmdObject(cmd)],
    }
}

/// `list_tables({family?})` -> `{"list": {"tables": {"family"?}}}`.
pub fn list_tables(family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::List(NfListObject::Tables(FamilyFilter { family })))
}

/// `list_chains({family?})` -> `{"list": {"chains": {"family"?}}}`. The
/// kernel returns the whole ruleset's chains; the Decoder demultiplexes.
pub fn list_chains(family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::List(NfListObject::Chains(FamilyFilter { family })))
}

/// `list_sets({family?})` -> `{"list": {"sets": {"family"?}}}`.
pub fn list_sets(family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::List(NfListObject::Sets(FamilyFilter { family })))
}

/// `list_rules(table, chain, {family?})`.
///
/// With both `table` and `chain` given: `{"list": {"chain": {family, table,
/// name}}}`, listing just that chain's rules. With either omitted: `{"list":
/// {"ruleset": {family?}}}`, listing everything (spec §4.4).
pub fn list_rules(table: Option<&str>, chain: Option<&str>, family: Option<NfFamily>) -> Nftables {
    match (table, chain) {
        (Some(table), Some(chain)) => envelope(NfCmd::List(NfListObject::Chain(Chain {
            family: family.unwrap_or(crate::DEFAULT_FAMILY),
            table: table.to_string(),
            name: chain.to_string(),
            ..Default::default()
        }))),
        _ => envelope(NfCmd::List(NfListObject::Ruleset(Some(Ruleset { family })))),
    }
}

/// `list_set_elements(table, set, {family?})` -> `{"list": {"set": {family,
/// table, name}}}`.
pub fn list_set_elements(table: &str, set: &str, family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::List(NfListObject::Set(Set {
        family: family.unwrap_or(crate::DEFAULT_FAMILY),
        table: table.to_string(),
        name: set.to_string(),
        handle: None,
        set_type: None,
        policy: None,
        flags: None,
        elem: None,
        timeout: None,
        gc_interval: None,
        size: None,
        comment: None,
    })))
}

/// `list_ruleset({family?})` -> `{"list": {"ruleset": {family?}}}`.
pub fn list_ruleset(family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::List(NfListObject::Ruleset(Some(Ruleset { family }))))
}

/// `flush_ruleset({family?})` -> `{"flush": {"ruleset": {family?}}}`. The
/// pure free-function counterpart of
/// [`Builder::flush_ruleset`](crate::builder::Builder::flush_ruleset); both
/// produce identical envelopes, since `flush`ing the whole ruleset has no
/// main object for the priority dispatcher to detect.
pub fn flush_ruleset(family: Option<NfFamily>) -> Nftables {
    envelope(NfCmd::Flush(FlushObject::Ruleset(Some(Ruleset { family }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NfObject;

    #[test]
    fn list_tables_filters_by_family() {
        let nft = list_tables(Some(NfFamily::INet));
        match &nft.objects[0] {
            NfObject::CmdObject(NfCmd::List(NfListObject::Tables(filter))) => {
                assert_eq!(filter.family, Some(NfFamily::INet));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn list_rules_with_table_and_chain_targets_one_chain() {
        let nft = list_rules(Some("filter"), Some("INPUT"), Some(NfFamily::INet));
        match &nft.objects[0] {
            NfObject::CmdObject(NfCmd::List(NfListObject::Chain(chain))) => {
                assert_eq!(chain.table, "filter");
                assert_eq!(chain.name, "INPUT");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn list_rules_without_chain_falls_back_to_ruleset() {
        let nft = list_rules(None, None, Some(NfFamily::INet));
        match &nft.objects[0] {
            NfObject::CmdObject(NfCmd::List(NfListObject::Ruleset(Some(r)))) => {
                assert_eq!(r.family, Some(NfFamily::INet));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn flush_ruleset_for_one_family_s4() {
        // S4: flush_ruleset(family: inet) ->
        // {"nftables":[{"flush":{"ruleset":{"family":"inet"}}}]}
        let nft = flush_ruleset(Some(NfFamily::INet));
        let json = serde_json::to_value(&nft).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"nftables": [{"flush": {"ruleset": {"family": "inet"}}}]})
        );
    }

    #[test]
    fn list_set_elements_targets_named_set() {
        let nft = list_set_elements("filter", "blocklist", None);
        match &nft.objects[0] {
            NfObject::CmdObject(NfCmd::List(NfListObject::Set(set))) => {
                assert_eq!(set.name, "blocklist");
                assert!(set.set_type.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
