use nft_client::{schema::*, types::*};
use serde_json::json;

#[test]
fn test_chain_table_rule_inet() {
    // nft add table inet some_inet_table
    // nft add chain inet some_inet_table some_inet_chain '{ type filter hook forward priority 0; policy accept; }'
    let expected: Nftables = Nftables {
        objects: vec![
            NfObject::CmdObject(NfCmd::Add(NfListObject::Table(Table {
                family: NfFamily::INet,
                name: "some_inet_table".to_string(),
                handle: None,
            }))),
            NfObject::CmdObject(NfCmd::Add(NfListObject::Chain(Chain {
                family: NfFamily::INet,
                table: "some_inet_table".to_string(),
                name: "some_inet_chain".to_string(),
                newname: None,
                handle: None,
                _type: Some(NfChainType::Filter),
                hook: Some(NfHook::Forward),
                prio: None,
                dev: None,
                policy: Some(NfChainPolicy::Accept),
            }))),
        ],
    };
    let json = json!({"nftables":[{"add":{"table":{"family":"inet","name":"some_inet_table"}}},{"add":{"chain":{"family":"inet","table":"some_inet_table","name":"some_inet_chain","type":"filter","hook":"forward","policy":"accept"}}}]});
    println!("{}", &json);
    let parsed: Nftables = serde_json::from_value(json).unwrap();
    assert_eq!(expected, parsed);
}

#[test]
fn test_ssh_allow_rule_s2() {
    // S1/S2 of spec.md §8: table + base chain + tcp/dport/accept rule,
    // matching the kernel's JSON byte-for-byte.
    let json = json!({"nftables":[
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
    ]});
    let parsed: Nftables = serde_json::from_value(json.clone()).unwrap();
    let reencoded = serde_json::to_value(&parsed).unwrap();
    assert_eq!(json, reencoded);
}
