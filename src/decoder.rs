//! The Decoder: classifies a [`Requestor`](crate::requestor::Requestor)
//! outcome into one of four reply shapes and reshapes kernel data into
//! normalized records.
//!
//! Reply items are worked on as generic `serde_json::Value`s rather than
//! the strict `schema::NfObject` request types: a write acknowledgement
//! item is the literal empty object `{}`, which has no key to tag it as any
//! particular `NfListObject` variant, so it cannot round-trip through that
//! untagged enum. Once an item is identified as carrying one of the data
//! keys, it is deserialized into the matching typed `schema` struct, so
//! everything downstream of classification is still fully typed.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::expr::Expression;
use crate::requestor::{RequestError, SubmitOutcome};
use crate::schema::{Chain, Element, Rule, Set, Table};
use crate::stmt::Statement;
use crate::validation::validate_range_order;

/// One of the four reply shapes produced by [`decode`] (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    /// A write-only batch: every reply item was an acknowledgement, or the
    /// reply was empty outright.
    Ok,
    /// A read-only batch: every (non-metainfo) reply item carried data.
    Data(DataBuckets),
    /// A mixed batch: some items were acknowledgements, some carried data.
    Mixed {
        /// One [`OperationResult::Success`] per acknowledgement item, in
        /// reply order.
        operations: Vec<OperationResult>,
        data: DataBuckets,
    },
}

/// The outcome recorded for each non-data (write-acknowledgement) reply
/// item in a mixed response. The reply format carries no richer status than
/// "this item was not data", so the only variant is `Success` — a
/// kernel-rejected submission never reaches the Decoder as `Ok` at all (see
/// [`RequestError::KernelRejected`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
}

/// The non-empty subset of {tables, chains, rules, sets, set_elements} a
/// read-only or mixed reply carries (spec §4.5 point 5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBuckets {
    pub tables: Vec<Table>,
    pub chains: Vec<Chain>,
    pub rules: Vec<Rule>,
    pub sets: Vec<Set>,
    pub set_elements: Vec<ElementRecord>,
}

/// One flattened set/map element. `value` preserves whatever shape the
/// kernel gave it (a scalar, a `concat` tuple, a `{key, value}` mapping, …);
/// the Decoder does not unwrap it further (spec §4.5 point 5: "tuple
/// elements become `{value: v}` (preserving shape)").
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    pub value: Expression,
}

/// The context-hint tag the Decoder attaches to a submission failure (spec
/// §4.5 point 6), plus a catch-all for a reply that doesn't match the
/// documented schema at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The underlying `RequestError`'s message named a write verb
    /// (add/delete/flush/create/insert/replace/rename).
    WriteFailed,
    /// The underlying `RequestError`'s message named a read verb
    /// (list/get/query).
    ReadFailed,
    /// Neither a write nor a read verb could be recognized in the message.
    OperationFailed,
    /// The reply itself (not the submission) was structurally invalid: an
    /// item wasn't a JSON object, a data item didn't match its expected
    /// shape, or an embedded range was inverted.
    Malformed,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
}

impl DecodeError {
    fn malformed(message: impl Into<String>) -> Self {
        DecodeError {
            kind: DecodeErrorKind::Malformed,
            message: message.into(),
        }
    }

    fn from_request_error(err: &RequestError) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        const WRITE_VERBS: [&str; 7] = [
            "add", "delete", "flush", "create", "insert", "replace", "rename",
        ];
        const READ_VERBS: [&str; 3] = ["list", "get", "query"];

        let kind = if WRITE_VERBS.iter().any(|v| lower.contains(v)) {
            DecodeErrorKind::WriteFailed
        } else if READ_VERBS.iter().any(|v| lower.contains(v)) {
            DecodeErrorKind::ReadFailed
        } else {
            DecodeErrorKind::OperationFailed
        };

        DecodeError { kind, message }
    }
}

/// Maps a `Result<SubmitOutcome, RequestError>` to one of the four reply
/// shapes (spec §4.5).
pub fn decode(outcome: Result<SubmitOutcome, RequestError>) -> Result<DecodedResponse, DecodeError> {
    let items = match outcome {
        Err(e) => return Err(DecodeError::from_request_error(&e)),
        Ok(SubmitOutcome::Empty) => return Ok(DecodedResponse::Ok),
        Ok(SubmitOutcome::Reply(items)) => items,
    };

    if items.is_empty() {
        return Ok(DecodedResponse::Ok);
    }

    let mut buckets = DataBuckets::default();
    let mut operations = Vec::new();
    let mut saw_data = false;
    let mut saw_empty = false;

    for item in &items {
        let obj = item
            .as_object()
            .ok_or_else(|| DecodeError::malformed("reply item is not a JSON object"))?;

        if obj.contains_key("metainfo") {
            continue;
        }

        if collect_data_item(obj, &mut buckets)? {
            saw_data = true;
        } else {
            saw_empty = true;
            operations.push(OperationResult::Success);
        }
    }

    match (saw_data, saw_empty) {
        (true, true) => Ok(DecodedResponse::Mixed { operations, data: buckets }),
        (true, false) => Ok(DecodedResponse::Data(buckets)),
        (false, _) => Ok(DecodedResponse::Ok),
    }
}

/// Tries each of the five data-item keys (spec §4.5 point 3: "have one of
/// keys {table, chain, rule, set, element}") against `obj`; on a match,
/// deserializes and appends the right bucket and returns `true`. Returns
/// `false` for an empty (write-acknowledgement) item — anything that isn't
/// one of those five keys, `map` included (spec §4.5 names no `maps`
/// bucket; see DESIGN.md).
fn collect_data_item(
    obj: &serde_json::Map<String, Value>,
    buckets: &mut DataBuckets,
) -> Result<bool, DecodeError> {
    if let Some(v) = obj.get("table") {
        buckets.tables.push(parse_item::<Table>(v, "table")?);
        return Ok(true);
    }
    if let Some(v) = obj.get("chain") {
        buckets.chains.push(parse_item::<Chain>(v, "chain")?);
        return Ok(true);
    }
    if let Some(v) = obj.get("rule") {
        let rule: Rule = parse_item(v, "rule")?;
        validate_rule_ranges(&rule.expr)?;
        buckets.rules.push(rule);
        return Ok(true);
    }
    if let Some(v) = obj.get("set") {
        let set: Set = parse_item(v, "set")?;
        if let Some(elems) = &set.elem {
            buckets
                .set_elements
                .extend(elems.iter().cloned().map(|value| ElementRecord { value }));
        }
        buckets.sets.push(set);
        return Ok(true);
    }
    if let Some(v) = obj.get("element") {
        let element: Element = parse_item(v, "element")?;
        buckets
            .set_elements
            .extend(element.elem.into_iter().map(|value| ElementRecord { value }));
        return Ok(true);
    }
    Ok(false)
}

fn parse_item<T: DeserializeOwned>(value: &Value, kind: &str) -> Result<T, DecodeError> {
    serde_json::from_value(value.clone())
        .map_err(|e| DecodeError::malformed(format!("invalid {kind} item: {e}")))
}

/// Range normalization detail (spec §4.5): every embedded
/// `expr::Expression::Range` is already the native two-field equivalence
/// (see DESIGN.md's Open Question resolution #2); what remains is
/// validating `first <= last`, the same invariant the DSL enforces when
/// ranges are first constructed (spec §4.1).
fn validate_rule_ranges(expr: &[Statement]) -> Result<(), DecodeError> {
    for stmt in expr {
        let value = serde_json::to_value(stmt)
            .map_err(|e| DecodeError::malformed(format!("unrepresentable statement: {e}")))?;
        walk_for_ranges(&value)?;
    }
    Ok(())
}

fn walk_for_ranges(value: &Value) -> Result<(), DecodeError> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(bounds)) = map.get("range") {
                if let [first, last] = bounds.as_slice() {
                    if let (Some(a), Some(b)) = (as_bound(first), as_bound(last)) {
                        validate_range_order(a, b).map_err(DecodeError::malformed)?;
                    }
                }
            }
            for v in map.values() {
                walk_for_ranges(v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                walk_for_ranges(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Only numeric range bounds are order-checked; address/string ranges have
/// no crate-wide total order to validate against.
fn as_bound(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(items: Vec<Value>) -> Result<SubmitOutcome, RequestError> {
        Ok(SubmitOutcome::Reply(items))
    }

    #[test]
    fn empty_outcome_is_write_only_ok() {
        assert_eq!(decode(Ok(SubmitOutcome::Empty)).unwrap(), DecodedResponse::Ok);
    }

    #[test]
    fn empty_reply_items_list_is_ok() {
        assert_eq!(decode(reply(vec![])).unwrap(), DecodedResponse::Ok);
    }

    #[test]
    fn write_only_reply_of_acks_is_ok() {
        let outcome = reply(vec![json!({}), json!({})]);
        assert_eq!(decode(outcome).unwrap(), DecodedResponse::Ok);
    }

    #[test]
    fn metainfo_items_are_filtered_before_classification() {
        let outcome = reply(vec![
            json!({"metainfo": {"version": "1.0.9"}}),
            json!({}),
        ]);
        assert_eq!(decode(outcome).unwrap(), DecodedResponse::Ok);
    }

    #[test]
    fn read_only_reply_decodes_table_bucket() {
        let outcome = reply(vec![json!({"table": {"family": "inet", "name": "filter"}})]);
        match decode(outcome).unwrap() {
            DecodedResponse::Data(buckets) => {
                assert_eq!(buckets.tables.len(), 1);
                assert_eq!(buckets.tables[0].name, "filter");
                assert!(buckets.chains.is_empty());
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn mixed_reply_classification_s6() {
        // S6: {"nftables":[{},{"table":{"name":"filter","family":"inet"}}]}
        let outcome = reply(vec![
            json!({}),
            json!({"table": {"name": "filter", "family": "inet"}}),
        ]);
        match decode(outcome).unwrap() {
            DecodedResponse::Mixed { operations, data } => {
                assert_eq!(operations, vec![OperationResult::Success]);
                assert_eq!(data.tables.len(), 1);
                assert_eq!(data.tables[0].name, "filter");
            }
            other => panic!("expected Mixed, got {other:?}"),
        }
    }

    #[test]
    fn rule_range_round_trips_as_inclusive_bounds_s5() {
        let outcome = reply(vec![json!({
            "rule": {
                "family": "inet",
                "table": "filter",
                "chain": "input",
                "expr": [
                    {"match": {"left": {"payload": {"protocol": "tcp", "field": "dport"}},
                               "right": {"range": [1024, 65535]}, "op": "=="}}
                ]
            }
        })]);
        match decode(outcome).unwrap() {
            DecodedResponse::Data(buckets) => {
                assert_eq!(buckets.rules.len(), 1);
                assert_eq!(buckets.rules[0].chain, "input");
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        let outcome = reply(vec![json!({
            "rule": {
                "family": "inet",
                "table": "filter",
                "chain": "input",
                "expr": [
                    {"match": {"left": {"payload": {"protocol": "tcp", "field": "dport"}},
                               "right": {"range": [65535, 1024]}, "op": "=="}}
                ]
            }
        })]);
        let err = decode(outcome).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::Malformed);
    }

    #[test]
    fn set_elements_are_flattened_from_set_items() {
        let outcome = reply(vec![json!({
            "set": {
                "family": "inet",
                "table": "filter",
                "name": "blocklist",
                "elem": ["10.0.0.1", "10.0.0.2"]
            }
        })]);
        match decode(outcome).unwrap() {
            DecodedResponse::Data(buckets) => {
                assert_eq!(buckets.sets.len(), 1);
                assert_eq!(buckets.set_elements.len(), 2);
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn submission_failure_is_tagged_write_failed() {
        let err = DecodeError::from_request_error(&RequestError::KernelRejected {
            program: "nft".to_string(),
            hint: "submitting batch".to_string(),
            detail: "Error: Could not process rule: File exists\nadd rule inet filter input tcp dport 22 accept".to_string(),
        });
        assert_eq!(err.kind, DecodeErrorKind::WriteFailed);
    }
}
