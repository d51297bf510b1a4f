use nft_client::{batch::Batch, helper, schema, types};

#[test]
#[ignore]
/// Reads current ruleset from nftables and parses it into `Nftables`.
fn test_list_ruleset() {
    helper::get_current_ruleset(None, None).unwrap();
}

#[test]
#[ignore]
/// Applies a ruleset to nftables.
fn test_apply_ruleset() {
    let ruleset = example_ruleset();
    helper::apply_ruleset(&ruleset, None, None).unwrap();
}

fn example_ruleset() -> schema::Nftables {
    let mut batch = Batch::new();
    batch.add(schema::NfListObject::Table(schema::Table {
        family: types::NfFamily::IP,
        name: "test-table-01".to_string(),
        ..Default::default()
    }));
    batch.delete(schema::NfListObject::Table(schema::Table {
        family: types::NfFamily::IP,
        name: "test-table-01".to_string(),
        ..Default::default()
    }));
    batch.to_nftables()
}
