//! The command [`Builder`]: turns an options bag plus a rolling context into
//! a well-formed sequence of nftables command envelopes.
//!
//! The algorithm is always the same six steps, run by the single private
//! [`Builder::dispatch`] function every public verb method forwards to:
//! object-type detection (highest-ranked unique tag in the options bag wins),
//! verb/object compatibility, context extraction, spec construction,
//! envelope wrapping, and context update.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::batch::Batch;
use crate::requestor::{Requestor, SubmitOptions};
use crate::schema::{
    Chain, Counter, Element, FlowTable, FlushObject, Limit, Map, NfCmd, NfListObject, Nftables,
    Quota, Ruleset, Set, SetPolicy, SetTypeValue,
};
use crate::stmt::Statement;
use crate::types::{NfChainPolicy, NfChainType, NfFamily, NfHook, NfTimeUnit};
use crate::validation::validate_flowtable;
use crate::{decoder, decoder::DecodedResponse, requestor};

/// The six verbs the Builder's unified dispatch pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Delete,
    Flush,
    Insert,
    Replace,
    Rename,
}

/// A tag identifying which field of a [`CommandOptions`] bag is under
/// consideration by the priority-rank dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectTag {
    Table,
    Chain,
    Rule,
    Rules,
    Flowtable,
    Set,
    Map,
    Counter,
    Quota,
    Limit,
    Element,
}

impl ObjectTag {
    fn as_str(self) -> &'static str {
        match self {
            ObjectTag::Table => "table",
            ObjectTag::Chain => "chain",
            ObjectTag::Rule => "rule",
            ObjectTag::Rules => "rules",
            ObjectTag::Flowtable => "flowtable",
            ObjectTag::Set => "set",
            ObjectTag::Map => "map",
            ObjectTag::Counter => "counter",
            ObjectTag::Quota => "quota",
            ObjectTag::Limit => "limit",
            ObjectTag::Element => "element",
        }
    }
}

/// The fixed object-type priority map. Lower ranks are context specifiers
/// relative to any higher-ranked tag present in the same call.
const fn priority_rank(tag: ObjectTag) -> u8 {
    match tag {
        ObjectTag::Table => 0,
        ObjectTag::Chain => 1,
        ObjectTag::Rule | ObjectTag::Rules => 2,
        ObjectTag::Flowtable | ObjectTag::Set | ObjectTag::Map | ObjectTag::Counter
        | ObjectTag::Quota | ObjectTag::Limit => 3,
        ObjectTag::Element => 4,
    }
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("no object specified: include one of table, chain, rule, rules, flowtable, set, map, counter, quota, limit, element")]
    NoObject,
    #[error("ambiguous object: only use one of {0:?}")]
    AmbiguousObject(Vec<&'static str>),
    #[error("{verb:?} is not a valid verb for object type `{object}`")]
    UnsupportedVerb { verb: Verb, object: &'static str },
    #[error("flush does not support flowtable targets")]
    UnsupportedFlushTarget,
    #[error("missing required field `{field}` for {context}")]
    MissingRequiredField {
        field: &'static str,
        context: &'static str,
    },
    #[error("family must be specified as an option or set via set_family")]
    MissingFamily,
    #[error("newname must be specified for rename operation")]
    MissingNewName,
    #[error("element command requires a collection name via `set`, `map`, or prior context")]
    MissingCollection,
    #[error("invalid flowtable configuration: {0}")]
    InvalidFlowtable(String),
}

/// Per-key statement attached to a dynamic set/map element (used as meters).
pub type ElementStatements = Vec<Statement>;

/// The value(s) carried by an [`ElementSpec`]: plain keys for a set, or
/// key/value pairs for a map.
#[derive(Debug, Clone)]
pub enum ElementValues {
    /// Set membership keys.
    Keys(Vec<crate::expr::Expression>),
    /// Map key/value pairs.
    Pairs(Vec<(crate::expr::Expression, crate::expr::Expression)>),
}

#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub values: ElementValues,
}

#[derive(Debug, Clone, Default)]
pub struct ChainSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub chain_type: Option<NfChainType>,
    pub hook: Option<NfHook>,
    pub priority: Option<i32>,
    pub policy: Option<NfChainPolicy>,
    /// Bound interface name, only meaningful for netdev-family base chains.
    pub dev: Option<String>,
}

impl ChainSpec {
    pub fn named(name: impl Into<String>) -> Self {
        ChainSpec {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub expr: Option<Vec<Statement>>,
    /// For `insert`: insert before the rule with this handle instead of at
    /// the head of the chain.
    pub handle: Option<u32>,
    pub index: Option<u32>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SetSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub key_type: Option<SetTypeValue>,
    pub flags: Option<HashSet<crate::schema::SetFlag>>,
    pub timeout: Option<u32>,
    pub gc_interval: Option<u32>,
    pub size: Option<u32>,
    pub policy: Option<SetPolicy>,
    pub comment: Option<String>,
}

impl SetSpec {
    pub fn named(name: impl Into<String>) -> Self {
        SetSpec {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub key_type: Option<SetTypeValue>,
    pub value_type: Option<SetTypeValue>,
    pub flags: Option<HashSet<crate::schema::SetFlag>>,
    pub timeout: Option<u32>,
    pub gc_interval: Option<u32>,
    pub size: Option<u32>,
    pub policy: Option<SetPolicy>,
    pub comment: Option<String>,
}

impl MapSpec {
    pub fn named(name: impl Into<String>) -> Self {
        MapSpec {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CounterSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub packets: Option<u32>,
    pub bytes: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub bytes: Option<u32>,
    pub used: Option<u32>,
    pub over: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LimitSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub rate: Option<u32>,
    pub unit: Option<NfTimeUnit>,
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct FlowtableSpec {
    pub name: String,
    pub handle: Option<u32>,
    pub hook: Option<NfHook>,
    pub priority: Option<u32>,
    pub devices: Option<Vec<String>>,
    pub flags: Option<Vec<String>>,
}

/// The heterogeneous "options bag" passed to every verb method: one
/// `Option<FooSpec>` field per object type, plus top-level overrides that
/// apply regardless of which tag ends up being the main object.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub family: Option<NfFamily>,
    /// A bare table name. Acts as the main object when no higher-rank tag is
    /// present in the same call, otherwise as a context specifier.
    pub table: Option<String>,
    pub chain: Option<ChainSpec>,
    pub rule: Option<RuleSpec>,
    pub rules: Option<Vec<RuleSpec>>,
    pub set: Option<SetSpec>,
    pub map: Option<MapSpec>,
    pub counter: Option<CounterSpec>,
    pub quota: Option<QuotaSpec>,
    pub limit: Option<LimitSpec>,
    pub flowtable: Option<FlowtableSpec>,
    pub element: Option<ElementSpec>,
    /// Main-object handle, used by `delete`/`replace` to identify the target
    /// and by `insert` to position the new rule.
    pub handle: Option<u32>,
    /// New chain name for `rename`.
    pub newname: Option<String>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn present_tags(&self) -> Vec<ObjectTag> {
        let mut tags = Vec::new();
        if self.table.is_some() {
            tags.push(ObjectTag::Table);
        }
        if self.chain.is_some() {
            tags.push(ObjectTag::Chain);
        }
        if self.rule.is_some() {
            tags.push(ObjectTag::Rule);
        }
        if self.rules.is_some() {
            tags.push(ObjectTag::Rules);
        }
        if self.flowtable.is_some() {
            tags.push(ObjectTag::Flowtable);
        }
        if self.set.is_some() {
            tags.push(ObjectTag::Set);
        }
        if self.map.is_some() {
            tags.push(ObjectTag::Map);
        }
        if self.counter.is_some() {
            tags.push(ObjectTag::Counter);
        }
        if self.quota.is_some() {
            tags.push(ObjectTag::Quota);
        }
        if self.limit.is_some() {
            tags.push(ObjectTag::Limit);
        }
        if self.element.is_some() {
            tags.push(ObjectTag::Element);
        }
        tags
    }

    fn main_tag(&self) -> Result<ObjectTag, BuilderError> {
        let tags = self.present_tags();
        if tags.is_empty() {
            return Err(BuilderError::NoObject);
        }
        let max_rank = tags.iter().copied().map(priority_rank).max().unwrap();
        let at_max: Vec<ObjectTag> = tags
            .into_iter()
            .filter(|t| priority_rank(*t) == max_rank)
            .collect();
        if at_max.len() > 1 {
            return Err(BuilderError::AmbiguousObject(
                at_max.iter().map(|t| t.as_str()).collect(),
            ));
        }
        Ok(at_max[0])
    }
}

/// Which kind of collection (set or map) the Builder's context currently
/// remembers, so a later `element` command can infer whether to normalize
/// its values as scalars or as two-element key/value pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Set,
    Map,
}

/// Immutable configuration passed to [`Builder::new`].
#[derive(Debug, Clone, Default)]
pub struct BuilderOptions {
    pub family: Option<NfFamily>,
    pub requestor: Option<Arc<dyn Requestor>>,
}

/// The command Builder: an immutable-value accumulator of ordered command
/// envelopes plus a rolling context (family, table, chain, collection).
/// Every verb method consumes `self` and returns a new `Builder`, so the
/// command history up to any point is always inspectable from the returned
/// value.
#[derive(Clone)]
pub struct Builder {
    family: Option<NfFamily>,
    requestor: Option<Arc<dyn Requestor>>,
    table: Option<String>,
    chain: Option<String>,
    collection: Option<String>,
    collection_kind: Option<CollectionKind>,
    commands: Batch,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("family", &self.family)
            .field("table", &self.table)
            .field("chain", &self.chain)
            .field("collection", &self.collection)
            .field("collection_kind", &self.collection_kind)
            .field("commands", &self.commands)
            .finish()
    }
}

impl Builder {
    /// Starts a new, empty Builder.
    pub fn new(options: BuilderOptions) -> Self {
        Builder {
            family: options.family,
            requestor: options.requestor,
            table: None,
            chain: None,
            collection: None,
            collection_kind: None,
            commands: Batch::new(),
        }
    }

    #[must_use]
    pub fn set_family(mut self, family: NfFamily) -> Self {
        self.family = Some(family);
        self
    }

    #[must_use]
    pub fn set_requestor(mut self, requestor: Arc<dyn Requestor>) -> Self {
        self.requestor = Some(requestor);
        self
    }

    /// Explicitly overwrites one or more context fields. Context fields
    /// never auto-clear; this is the only way to drop one (pass `None`).
    #[must_use]
    pub fn set(
        mut self,
        table: Option<Option<String>>,
        chain: Option<Option<String>>,
        collection: Option<Option<String>>,
    ) -> Self {
        if let Some(t) = table {
            self.table = t;
        }
        if let Some(c) = chain {
            self.chain = c;
        }
        if let Some(col) = collection {
            self.collection = col;
            if self.collection.is_none() {
                self.collection_kind = None;
            }
        }
        self
    }

    fn resolve_family(&self, opts: &CommandOptions) -> Result<NfFamily, BuilderError> {
        opts.family.or(self.family).ok_or(BuilderError::MissingFamily)
    }

    fn resolve_table(&self, opts: &CommandOptions, main: ObjectTag) -> Option<String> {
        if main == ObjectTag::Table {
            None
        } else {
            opts.table.clone().or_else(|| self.table.clone())
        }
    }

    fn resolve_chain(&self, opts: &CommandOptions, main: ObjectTag) -> Option<String> {
        if main == ObjectTag::Chain {
            None
        } else {
            opts.chain
                .as_ref()
                .map(|c| c.name.clone())
                .or_else(|| self.chain.clone())
        }
    }

    fn resolve_collection(&self, opts: &CommandOptions) -> Option<(String, CollectionKind)> {
        if let Some(set) = &opts.set {
            return Some((set.name.clone(), CollectionKind::Set));
        }
        if let Some(map) = &opts.map {
            return Some((map.name.clone(), CollectionKind::Map));
        }
        self.collection
            .clone()
            .zip(self.collection_kind)
    }

    /// Runs the unified command pipeline for `verb` against `opts`, pushing
    /// the resulting envelope(s) onto a fresh copy of the command list and
    /// updating context, or returns a `BuilderError` and appends nothing.
    fn dispatch(mut self, verb: Verb, opts: CommandOptions) -> Result<Self, BuilderError> {
        let main = opts.main_tag()?;
        check_verb_compatibility(verb, main)?;

        match main {
            ObjectTag::Table => self.dispatch_table(verb, &opts)?,
            ObjectTag::Chain => self.dispatch_chain(verb, &opts)?,
            ObjectTag::Rule => self.dispatch_rule(verb, &opts, main)?,
            ObjectTag::Rules => self.dispatch_rules(verb, &opts)?,
            ObjectTag::Flowtable => self.dispatch_flowtable(verb, &opts)?,
            ObjectTag::Set => self.dispatch_set(verb, &opts)?,
            ObjectTag::Map => self.dispatch_map(verb, &opts)?,
            ObjectTag::Counter => self.dispatch_counter(verb, &opts)?,
            ObjectTag::Quota => self.dispatch_quota(verb, &opts)?,
            ObjectTag::Limit => self.dispatch_limit(verb, &opts)?,
            ObjectTag::Element => self.dispatch_element(verb, &opts, main)?,
        }
        Ok(self)
    }

    fn dispatch_table(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let name = opts.table.clone().ok_or(BuilderError::MissingRequiredField {
            field: "name",
            context: "table",
        })?;
        let table = crate::schema::Table {
            family,
            name: name.clone(),
            handle: opts.handle,
        };
        match verb {
            Verb::Add => self.commands.add(NfListObject::Table(table)),
            Verb::Delete => self.commands.delete(NfListObject::Table(table)),
            Verb::Flush => self.commands.flush(FlushObject::Table(table)),
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        self.table = Some(name);
        Ok(())
    }

    fn dispatch_chain(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Chain)
            .or_else(|| self.table.clone())
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "chain",
            })?;
        let spec = opts.chain.as_ref().expect("main tag guarantees presence");
        if spec.name.is_empty() {
            return Err(BuilderError::MissingRequiredField {
                field: "name",
                context: "chain",
            });
        }

        let is_base_chain = spec.chain_type.is_some() || spec.hook.is_some() || spec.priority.is_some();
        let chain = Chain {
            family,
            table: table.clone(),
            name: spec.name.clone(),
            newname: None,
            handle: opts.handle.or(spec.handle),
            _type: if is_base_chain {
                Some(spec.chain_type.unwrap_or(NfChainType::Filter))
            } else {
                None
            },
            hook: spec.hook,
            prio: if is_base_chain {
                Some(spec.priority.unwrap_or(0))
            } else {
                None
            },
            dev: spec.dev.clone(),
            policy: spec.policy,
        };

        match verb {
            Verb::Add => self.commands.add(NfListObject::Chain(chain)),
            Verb::Delete => self.commands.delete(NfListObject::Chain(chain)),
            Verb::Flush => self.commands.flush(FlushObject::Chain(chain)),
            Verb::Rename => {
                let newname = opts.newname.clone().ok_or(BuilderError::MissingNewName)?;
                let mut renamed = chain;
                renamed.newname = Some(newname);
                self.commands.rename(renamed);
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        self.table = Some(table);
        self.chain = Some(spec.name.clone());
        Ok(())
    }

    fn rule_from_spec(
        &self,
        opts: &CommandOptions,
        family: NfFamily,
        table: String,
        chain: String,
        spec: &RuleSpec,
        require_expr: bool,
    ) -> Result<crate::schema::Rule, BuilderError> {
        let expr = if require_expr {
            spec.expr.clone().ok_or(BuilderError::MissingRequiredField {
                field: "expr",
                context: "rule",
            })?
        } else {
            Vec::new()
        };
        Ok(crate::schema::Rule {
            family,
            table,
            chain,
            expr,
            handle: opts.handle.or(spec.handle),
            index: spec.index,
            comment: spec.comment.clone(),
        })
    }

    fn dispatch_rule(
        &mut self,
        verb: Verb,
        opts: &CommandOptions,
        main: ObjectTag,
    ) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self.resolve_table(opts, main).ok_or(BuilderError::MissingRequiredField {
            field: "table",
            context: "rule",
        })?;
        let chain = self.resolve_chain(opts, main).ok_or(BuilderError::MissingRequiredField {
            field: "chain",
            context: "rule",
        })?;
        let spec = opts.rule.as_ref().expect("main tag guarantees presence");

        match verb {
            Verb::Add | Verb::Insert => {
                let rule = self.rule_from_spec(opts, family, table, chain, spec, true)?;
                if verb == Verb::Add {
                    self.commands.add(NfListObject::Rule(rule));
                } else {
                    self.commands.insert(NfListObject::Rule(rule));
                }
            }
            Verb::Delete => {
                let handle = opts.handle.ok_or(BuilderError::MissingRequiredField {
                    field: "handle",
                    context: "rule delete",
                })?;
                let mut rule = self.rule_from_spec(opts, family, table, chain, spec, false)?;
                rule.handle = Some(handle);
                self.commands.delete(NfListObject::Rule(rule));
            }
            Verb::Replace => {
                let handle = opts.handle.ok_or(BuilderError::MissingRequiredField {
                    field: "handle",
                    context: "rule replace",
                })?;
                let mut rule = self.rule_from_spec(opts, family, table, chain, spec, true)?;
                rule.handle = Some(handle);
                self.commands.replace(rule);
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    fn dispatch_rules(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        // `insert` additionally accepts a `rules` list: each entry becomes
        // its own `insert` envelope, in order.
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Rules)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "rule",
            })?;
        let chain = self
            .resolve_chain(opts, ObjectTag::Rules)
            .ok_or(BuilderError::MissingRequiredField {
                field: "chain",
                context: "rule",
            })?;
        let specs = opts.rules.as_ref().expect("main tag guarantees presence");
        for spec in specs {
            let rule = self.rule_from_spec(opts, family, table.clone(), chain.clone(), spec, true)?;
            match verb {
                Verb::Insert => self.commands.insert(NfListObject::Rule(rule)),
                _ => unreachable!("checked by check_verb_compatibility"),
            }
        }
        Ok(())
    }

    fn dispatch_flowtable(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Flowtable)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "flowtable",
            })?;
        let spec = opts
            .flowtable
            .as_ref()
            .expect("main tag guarantees presence");

        match verb {
            Verb::Add => {
                validate_flowtable(spec.hook, &spec.devices)
                    .map_err(BuilderError::InvalidFlowtable)?;
                let priority = spec.priority.ok_or(BuilderError::MissingRequiredField {
                    field: "priority",
                    context: "flowtable",
                })?;
                let flowtable = FlowTable {
                    family,
                    table,
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    hook: spec.hook.or(Some(NfHook::Ingress)),
                    prio: Some(priority),
                    dev: spec.devices.clone(),
                    flags: spec.flags.clone(),
                };
                self.commands.add(NfListObject::FlowTable(flowtable));
            }
            Verb::Delete => {
                let flowtable = FlowTable {
                    family,
                    table,
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    hook: None,
                    prio: None,
                    dev: None,
                    flags: None,
                };
                self.commands.delete(NfListObject::FlowTable(flowtable));
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    fn dispatch_set(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Set)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "set",
            })?;
        let spec = opts.set.as_ref().expect("main tag guarantees presence");

        match verb {
            Verb::Add => {
                let key_type = spec.key_type.clone().ok_or(BuilderError::MissingRequiredField {
                    field: "type",
                    context: "set",
                })?;
                let set = Set {
                    family,
                    table: table.clone(),
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    set_type: Some(key_type),
                    policy: spec.policy,
                    flags: spec.flags.clone(),
                    elem: None,
                    timeout: spec.timeout,
                    gc_interval: spec.gc_interval,
                    size: spec.size,
                    comment: spec.comment.clone(),
                };
                self.commands.add(NfListObject::Set(set));
                self.collection = Some(spec.name.clone());
                self.collection_kind = Some(CollectionKind::Set);
            }
            Verb::Delete => {
                let set = bare_set(family, table.clone(), spec, opts.handle);
                self.commands.delete(NfListObject::Set(set));
            }
            Verb::Flush => {
                let set = bare_set(family, table.clone(), spec, opts.handle);
                self.commands.flush(FlushObject::Set(set));
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        self.table = Some(table);
        Ok(())
    }

    fn dispatch_map(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Map)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "map",
            })?;
        let spec = opts.map.as_ref().expect("main tag guarantees presence");

        match verb {
            Verb::Add => {
                let key_type = spec.key_type.clone().ok_or(BuilderError::MissingRequiredField {
                    field: "type",
                    context: "map",
                })?;
                let value_type = spec.value_type.clone().ok_or(BuilderError::MissingRequiredField {
                    field: "map",
                    context: "map",
                })?;
                let map = Map {
                    family,
                    table: table.clone(),
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    set_type: Some(key_type),
                    map: Some(value_type),
                    policy: spec.policy,
                    flags: spec.flags.clone(),
                    elem: None,
                    timeout: spec.timeout,
                    gc_interval: spec.gc_interval,
                    size: spec.size,
                    comment: spec.comment.clone(),
                };
                self.commands.add(NfListObject::Map(map));
                self.collection = Some(spec.name.clone());
                self.collection_kind = Some(CollectionKind::Map);
            }
            Verb::Delete => {
                let map = bare_map(family, table.clone(), spec, opts.handle);
                self.commands.delete(NfListObject::Map(map));
            }
            Verb::Flush => {
                let map = bare_map(family, table.clone(), spec, opts.handle);
                self.commands.flush(FlushObject::Map(map));
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        self.table = Some(table);
        Ok(())
    }

    fn dispatch_counter(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Counter)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "counter",
            })?;
        let spec = opts.counter.as_ref().expect("main tag guarantees presence");
        let counter = Counter {
            family,
            table,
            name: spec.name.clone(),
            handle: opts.handle.or(spec.handle),
            packets: spec.packets,
            bytes: spec.bytes,
        };
        match verb {
            Verb::Add => self.commands.add(NfListObject::Counter(counter)),
            Verb::Delete => self.commands.delete(NfListObject::Counter(counter)),
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    fn dispatch_quota(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Quota)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "quota",
            })?;
        let spec = opts.quota.as_ref().expect("main tag guarantees presence");
        let quota = Quota {
            family,
            table,
            name: spec.name.clone(),
            handle: opts.handle.or(spec.handle),
            bytes: spec.bytes,
            used: spec.used,
            inv: spec.over,
        };
        match verb {
            Verb::Add => self.commands.add(NfListObject::Quota(quota)),
            Verb::Delete => self.commands.delete(NfListObject::Quota(quota)),
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    fn dispatch_limit(&mut self, verb: Verb, opts: &CommandOptions) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self
            .resolve_table(opts, ObjectTag::Limit)
            .ok_or(BuilderError::MissingRequiredField {
                field: "table",
                context: "limit",
            })?;
        let spec = opts.limit.as_ref().expect("main tag guarantees presence");

        match verb {
            Verb::Add => {
                let rate = spec.rate.ok_or(BuilderError::MissingRequiredField {
                    field: "rate",
                    context: "limit",
                })?;
                let per = spec.unit.ok_or(BuilderError::MissingRequiredField {
                    field: "unit",
                    context: "limit",
                })?;
                let limit = Limit {
                    family,
                    table,
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    rate: Some(rate),
                    per: Some(per),
                    burst: spec.burst,
                    unit: None,
                    inv: None,
                };
                self.commands.add(NfListObject::Limit(limit));
            }
            Verb::Delete => {
                let limit = Limit {
                    family,
                    table,
                    name: spec.name.clone(),
                    handle: opts.handle.or(spec.handle),
                    rate: None,
                    per: None,
                    burst: None,
                    unit: None,
                    inv: None,
                };
                self.commands.delete(NfListObject::Limit(limit));
            }
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    fn dispatch_element(
        &mut self,
        verb: Verb,
        opts: &CommandOptions,
        main: ObjectTag,
    ) -> Result<(), BuilderError> {
        let family = self.resolve_family(opts)?;
        let table = self.resolve_table(opts, main).ok_or(BuilderError::MissingRequiredField {
            field: "table",
            context: "element",
        })?;
        let (name, kind) = self
            .resolve_collection(opts)
            .ok_or(BuilderError::MissingCollection)?;
        let spec = opts.element.as_ref().expect("main tag guarantees presence");

        let elems: Vec<crate::expr::Expression> = match (&spec.values, kind) {
            (ElementValues::Keys(keys), CollectionKind::Set) => keys.clone(),
            (ElementValues::Keys(keys), CollectionKind::Map) => keys.clone(),
            (ElementValues::Pairs(pairs), _) => pairs
                .iter()
                .cloned()
                .map(|(k, v)| crate::expr::Expression::List(vec![k, v]))
                .collect(),
        };

        let element = Element {
            family,
            table,
            name,
            elem: elems,
        };
        match verb {
            Verb::Add => self.commands.add(NfListObject::Element(element)),
            Verb::Delete => self.commands.delete(NfListObject::Element(element)),
            _ => unreachable!("checked by check_verb_compatibility"),
        }
        Ok(())
    }

    /// `add(options)`.
    pub fn add(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Add, options)
    }

    /// `delete(options)`.
    pub fn delete(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Delete, options)
    }

    /// `flush(options)`.
    pub fn flush(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Flush, options)
    }

    /// `insert(options)`.
    pub fn insert(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Insert, options)
    }

    /// `replace(options)`.
    pub fn replace(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Replace, options)
    }

    /// `rename(options)`.
    pub fn rename(self, options: CommandOptions) -> Result<Self, BuilderError> {
        self.dispatch(Verb::Rename, options)
    }

    /// A dedicated whole-ruleset flush, bypassing the options-bag dispatch
    /// entirely since it has no main object to detect.
    #[must_use]
    pub fn flush_ruleset(mut self, family: Option<NfFamily>) -> Self {
        self.commands
            .flush(FlushObject::Ruleset(Some(Ruleset { family })));
        self
    }

    /// The raw, fully formed command map this Builder has accumulated.
    pub fn commands(&self) -> Nftables {
        self.commands.clone().to_nftables()
    }

    /// The serialized JSON string of [`Builder::commands`].
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.commands())
    }

    /// Submits the accumulated commands using the bound requestor (or the
    /// one supplied in `options`), then decodes the raw outcome.
    pub fn submit(&self, options: SubmitOptions) -> Result<DecodedResponse, SubmitError> {
        let requestor = options
            .requestor
            .clone()
            .or_else(|| self.requestor.clone())
            .ok_or(SubmitError::Request(requestor::RequestError::NoRequestor))?;
        let outcome = requestor.submit(&self.commands(), &options);
        decoder::decode(outcome).map_err(SubmitError::Decode)
    }
}

/// Error returned by [`Builder::submit`], wrapping either a submission
/// failure or a decode failure.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Request(#[from] requestor::RequestError),
    #[error(transparent)]
    Decode(#[from] decoder::DecodeError),
}

fn bare_set(family: NfFamily, table: String, spec: &SetSpec, handle: Option<u32>) -> Set {
    Set {
        family,
        table,
        name: spec.name.clone(),
        handle: handle.or(spec.handle),
        set_type: None,
        policy: None,
        flags: None,
        elem: None,
        timeout: None,
        gc_interval: None,
        size: None,
        comment: None,
    }
}

fn bare_map(family: NfFamily, table: String, spec: &MapSpec, handle: Option<u32>) -> Map {
    Map {
        family,
        table,
        name: spec.name.clone(),
        handle: handle.or(spec.handle),
        set_type: None,
        map: None,
        policy: None,
        flags: None,
        elem: None,
        timeout: None,
        gc_interval: None,
        size: None,
        comment: None,
    }
}

/// Verb/object compatibility check.
fn check_verb_compatibility(verb: Verb, main: ObjectTag) -> Result<(), BuilderError> {
    use ObjectTag::*;
    use Verb::*;

    let ok = match (verb, main) {
        // add/delete: every object type.
        (Add, _) | (Delete, _) => true,
        // flush: table, chain, set, map only.
        (Flush, Table) | (Flush, Chain) | (Flush, Set) | (Flush, Map) => true,
        (Flush, Flowtable) => return Err(BuilderError::UnsupportedFlushTarget),
        (Flush, _) => false,
        // rename: chain only.
        (Rename, Chain) => true,
        (Rename, _) => false,
        // insert/replace: rule (insert also accepts rules).
        (Insert, Rule) | (Insert, Rules) => true,
        (Insert, _) => false,
        (Replace, Rule) => true,
        (Replace, _) => false,
    };

    if ok {
        Ok(())
    } else {
        Err(BuilderError::UnsupportedVerb {
            verb,
            object: main.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requestor::CaptureRequestor;
    use crate::schema::{NfCmd, NfObject};

    fn capture_builder() -> (Builder, Arc<CaptureRequestor>) {
        let requestor = Arc::new(CaptureRequestor::new());
        let builder = Builder::new(BuilderOptions {
            family: Some(NfFamily::INet),
            requestor: Some(requestor.clone() as Arc<dyn Requestor>),
        });
        (builder, requestor)
    }

    #[test]
    fn add_minimal_table() {
        let (builder, _) = capture_builder();
        let builder = builder
            .add(CommandOptions {
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap();
        let cmds = builder.commands();
        assert_eq!(cmds.objects.len(), 1);
        match &cmds.objects[0] {
            NfObject::CmdObject(NfCmd::Add(NfListObject::Table(t))) => {
                assert_eq!(t.family, NfFamily::INet);
                assert_eq!(t.name, "filter");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn context_propagation_builds_ssh_allow_rule() {
        let (builder, _) = capture_builder();
        let expr = crate::dsl::RuleExpr::new(NfFamily::INet)
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

        let cmds = builder.commands();
        assert_eq!(cmds.objects.len(), 3);
        match &cmds.objects[2] {
            NfObject::CmdObject(NfCmd::Add(NfListObject::Rule(r))) => {
                assert_eq!(r.table, "filter");
                assert_eq!(r.chain, "INPUT");
                assert_eq!(r.expr.len(), 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ambiguous_object_rejected() {
        let (builder, _) = capture_builder();
        let err = builder
            .add(CommandOptions {
                set: Some(SetSpec::named("s")),
                map: Some(MapSpec::named("m")),
                ..Default::default()
            })
            .unwrap_err();
        match err {
            BuilderError::AmbiguousObject(tags) => {
                assert!(tags.contains(&"set"));
                assert!(tags.contains(&"map"));
            }
            other => panic!("expected ambiguity error, got {other:?}"),
        }
    }

    #[test]
    fn flush_ruleset_for_one_family() {
        let (builder, _) = capture_builder();
        let builder = builder.flush_ruleset(Some(NfFamily::INet));
        let cmds = builder.commands();
        match &cmds.objects[0] {
            NfObject::CmdObject(NfCmd::Flush(FlushObject::Ruleset(Some(r)))) => {
                assert_eq!(r.family, Some(NfFamily::INet));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_family_is_rejected() {
        let builder = Builder::new(BuilderOptions::default());
        let err = builder
            .add(CommandOptions {
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::MissingFamily));
    }

    #[test]
    fn rename_requires_newname() {
        let (builder, _) = capture_builder();
        let err = builder
            .rename(CommandOptions {
                chain: Some(ChainSpec::named("INPUT")),
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::MissingNewName));
    }

    #[test]
    fn delete_rule_requires_explicit_handle() {
        let (builder, _) = capture_builder();
        let builder = builder
            .add(CommandOptions {
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap()
            .add(CommandOptions {
                chain: Some(ChainSpec::named("INPUT")),
                ..Default::default()
            })
            .unwrap();
        let err = builder
            .clone()
            .delete(CommandOptions {
                rule: Some(RuleSpec::default()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::MissingRequiredField { field: "handle", .. }));

        let builder = builder
            .delete(CommandOptions {
                rule: Some(RuleSpec::default()),
                handle: Some(7),
                ..Default::default()
            })
            .unwrap();
        let cmds = builder.commands();
        match cmds.objects.last().unwrap() {
            NfObject::CmdObject(NfCmd::Delete(NfListObject::Rule(r))) => {
                assert_eq!(r.handle, Some(7));
                assert!(r.expr.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn element_infers_collection_from_context() {
        let (builder, _) = capture_builder();
        let builder = builder
            .add(CommandOptions {
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap()
            .add(CommandOptions {
                set: Some(SetSpec {
                    name: "blocklist".to_string(),
                    key_type: Some(SetTypeValue::Single(crate::schema::SetType::Ipv4Addr)),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap()
            .add(CommandOptions {
                element: Some(ElementSpec {
                    values: ElementValues::Keys(vec![crate::expr::Expression::String(
                        "10.0.0.1".to_string(),
                    )]),
                }),
                ..Default::default()
            })
            .unwrap();

        let cmds = builder.commands();
        match cmds.objects.last().unwrap() {
            NfObject::CmdObject(NfCmd::Add(NfListObject::Element(e))) => {
                assert_eq!(e.name, "blocklist");
                assert_eq!(e.elem.len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flowtable_rejects_non_ingress_hook() {
        let (builder, _) = capture_builder();
        let err = builder
            .add(CommandOptions {
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap()
            .add(CommandOptions {
                flowtable: Some(FlowtableSpec {
                    name: "ft".to_string(),
                    hook: Some(NfHook::Forward),
                    priority: Some(0),
                    devices: Some(vec!["eth0".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidFlowtable(_)));
    }

    #[test]
    fn flowtable_flush_is_rejected() {
        let (builder, _) = capture_builder();
        let err = builder
            .flush(CommandOptions {
                flowtable: Some(FlowtableSpec::default()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::UnsupportedFlushTarget));
    }

    #[test]
    fn option_ordering_does_not_affect_output() {
        let (builder_a, _) = capture_builder();
        let a = builder_a
            .add(CommandOptions {
                chain: Some(ChainSpec {
                    name: "INPUT".to_string(),
                    hook: Some(NfHook::Input),
                    chain_type: Some(NfChainType::Filter),
                    priority: Some(0),
                    policy: Some(NfChainPolicy::Drop),
                    ..Default::default()
                }),
                table: Some("filter".to_string()),
                ..Default::default()
            })
            .unwrap();

        let (builder_b, _) = capture_builder();
        let b = builder_b
            .add(CommandOptions {
                table: Some("filter".to_string()),
                chain: Some(ChainSpec {
                    policy: Some(NfChainPolicy::Drop),
                    priority: Some(0),
                    chain_type: Some(NfChainType::Filter),
                    hook: Some(NfHook::Input),
                    name: "INPUT".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(a.commands(), b.commands());
    }
}
