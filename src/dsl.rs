//! A fluent expression DSL for building rule [`Statement`](crate::stmt::Statement)
//! trees without hand-assembling [`Expression`](crate::expr::Expression) literals.
//!
//! [`RuleExpr`] is a per-rule accumulator: it carries the rule's family, a
//! transient protocol context (so `dport`/`sport` know which payload
//! protocol to reference), and the ordered list of statements built so far.
//! Every builder method consumes and returns `Self`, so calls chain the way
//! [`crate::builder::Builder`] and `maromcik-nftblockd`'s `NftRulesetBuilder`
//! chain. A failure (e.g. `dport` called with no protocol context active, or
//! an inverted range) poisons the accumulator instead of aborting the chain;
//! [`RuleExpr::build`] surfaces the first such failure.

use std::collections::HashSet;

use thiserror::Error;

use crate::expr::{
    BinaryOperation, CTDir, CTFamily, Exthdr, Expression, Meta, MetaKey, NamedExpression, Osf,
    OsfTtl, Payload, PayloadBase, PayloadField, PayloadRaw, Prefix, Range, Socket, CT,
};
use crate::stmt::{
    AnonymousCounter, Counter, Dup, Flow, JumpTarget, Limit, Log, LogFlag, LogLevel, Match,
    NATFamily, Operator, Queue, QueueFlag, Reject, RejectType, Set, SetOp, Statement, SynProxy,
    TProxy, NAT,
};
use crate::types::{NfFamily, RejectCode, SynProxyFlag};
use crate::validation::{address_protocol, validate_range_order};

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum DslError {
    #[error("no active protocol context for `{0}`; call tcp()/udp()/sctp()/dccp() first")]
    NoProtocolContext(&'static str),
    #[error("{0}")]
    InvertedRange(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// The transport protocol currently in scope for payload field references.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Dccp,
    Icmp,
    Icmpv6,
}

impl Protocol {
    fn as_payload_name(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
            Protocol::Dccp => "dccp",
            Protocol::Icmp => "icmp",
            Protocol::Icmpv6 => "icmpv6",
        }
    }
}

/// A per-rule expression/statement accumulator.
#[derive(Debug, Clone)]
pub struct RuleExpr {
    family: NfFamily,
    protocol: Option<Protocol>,
    statements: Vec<Statement>,
    error: Option<DslError>,
}

impl RuleExpr {
    /// Starts a new, empty accumulator for a rule belonging to `family`.
    pub fn new(family: NfFamily) -> Self {
        RuleExpr {
            family,
            protocol: None,
            statements: Vec::new(),
            error: None,
        }
    }

    fn poisoned(&self) -> bool {
        self.error.is_some()
    }

    fn fail(mut self, err: DslError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    fn push(mut self, stmt: Statement) -> Self {
        if !self.poisoned() {
            self.statements.push(stmt);
        }
        self
    }

    fn active_protocol(&self, wanted_field: &'static str) -> Result<Protocol, DslError> {
        self.protocol
            .ok_or(DslError::NoProtocolContext(wanted_field))
    }

    /// Like [`Self::active_protocol`], but restricted to the four transport
    /// protocols port matches are legal against (spec.md: "`sport`/`dport` is
    /// legal only when the transient protocol context is one of {tcp, udp,
    /// sctp, dccp}"). An active but non-L4 context (e.g. `icmp()`) fails the
    /// same way as no context at all.
    fn active_l4_protocol(&self, wanted_field: &'static str) -> Result<Protocol, DslError> {
        match self.active_protocol(wanted_field)? {
            proto @ (Protocol::Tcp | Protocol::Udp | Protocol::Sctp | Protocol::Dccp) => Ok(proto),
            _ => Err(DslError::NoProtocolContext(wanted_field)),
        }
    }

    fn with_protocol(mut self, proto: Protocol) -> Self {
        if self.poisoned() {
            return self;
        }
        self.protocol = Some(proto);
        let ip_proto = address_protocol(self.family);
        self.push(payload_match(
            ip_proto,
            "protocol",
            Expression::String(proto.as_payload_name().to_string()),
        ))
    }

    /// Matches on the TCP transport protocol and activates it as the current
    /// protocol context.
    #[must_use]
    pub fn tcp(self) -> Self {
        self.with_protocol(Protocol::Tcp)
    }

    /// Matches on the UDP transport protocol and activates it as the current
    /// protocol context.
    #[must_use]
    pub fn udp(self) -> Self {
        self.with_protocol(Protocol::Udp)
    }

    /// Matches on the SCTP transport protocol and activates it as the
    /// current protocol context.
    #[must_use]
    pub fn sctp(self) -> Self {
        self.with_protocol(Protocol::Sctp)
    }

    /// Matches on the DCCP transport protocol and activates it as the
    /// current protocol context.
    #[must_use]
    pub fn dccp(self) -> Self {
        self.with_protocol(Protocol::Dccp)
    }

    /// Matches on ICMP and activates it as the current protocol context.
    #[must_use]
    pub fn icmp(self) -> Self {
        self.with_protocol(Protocol::Icmp)
    }

    /// Matches on ICMPv6 and activates it as the current protocol context.
    #[must_use]
    pub fn icmpv6(self) -> Self {
        self.with_protocol(Protocol::Icmpv6)
    }

    /// Matches the destination port of the active protocol context.
    #[must_use]
    pub fn dport(mut self, port: u32) -> Self {
        if self.poisoned() {
            return self;
        }
        match self.active_l4_protocol("dport") {
            Ok(proto) => {
                self.push(payload_match(proto.as_payload_name(), "dport", Expression::Number(port)))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Matches the source port of the active protocol context.
    #[must_use]
    pub fn sport(mut self, port: u32) -> Self {
        if self.poisoned() {
            return self;
        }
        match self.active_l4_protocol("sport") {
            Ok(proto) => {
                self.push(payload_match(proto.as_payload_name(), "sport", Expression::Number(port)))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Matches the destination port against an inclusive range.
    #[must_use]
    pub fn dport_range(mut self, first: u32, last: u32) -> Self {
        if self.poisoned() {
            return self;
        }
        if let Err(e) = validate_range_order(first, last) {
            return self.fail(DslError::InvertedRange(e));
        }
        match self.active_l4_protocol("dport") {
            Ok(proto) => self.push(payload_match(
                proto.as_payload_name(),
                "dport",
                normalize_range(first, last),
            )),
            Err(e) => self.fail(e),
        }
    }

    /// Matches the source address (CIDR-less) against `addr`, picking `ip`
    /// or `ip6` from the rule's family.
    #[must_use]
    pub fn saddr(self, addr: impl Into<String>) -> Self {
        let proto = address_protocol(self.family);
        self.push(payload_match(proto, "saddr", Expression::String(addr.into())))
    }

    /// Matches the destination address (CIDR-less) against `addr`.
    #[must_use]
    pub fn daddr(self, addr: impl Into<String>) -> Self {
        let proto = address_protocol(self.family);
        self.push(payload_match(proto, "daddr", Expression::String(addr.into())))
    }

    /// Matches the source address against a CIDR prefix.
    #[must_use]
    pub fn saddr_prefix(self, addr: impl Into<String>, len: u32) -> Self {
        let proto = address_protocol(self.family);
        let prefix = Expression::Named(NamedExpression::Prefix(Prefix {
            addr: Box::new(Expression::String(addr.into())),
            len,
        }));
        self.push(payload_match(proto, "saddr", prefix))
    }

    /// Matches the destination address against a CIDR prefix.
    #[must_use]
    pub fn daddr_prefix(self, addr: impl Into<String>, len: u32) -> Self {
        let proto = address_protocol(self.family);
        let prefix = Expression::Named(NamedExpression::Prefix(Prefix {
            addr: Box::new(Expression::String(addr.into())),
            len,
        }));
        self.push(payload_match(proto, "daddr", prefix))
    }

    /// Matches an arbitrary named-header field against `right`, e.g.
    /// `payload("arp", "ptype", ...)` or `payload("vlan", "id", ...)` for
    /// protocols with no dedicated helper method.
    #[must_use]
    pub fn payload(self, protocol: impl Into<String>, field: impl Into<String>, right: Expression) -> Self {
        self.push(payload_match(&protocol.into(), &field.into(), right))
    }

    /// Matches a fixed byte span at `offset` from `base`, for protocols with
    /// no named field (spec §4.1 "raw payload").
    #[must_use]
    pub fn raw_payload(self, base: PayloadBase, offset: u32, len: u32, right: Expression) -> Self {
        let left = Expression::Named(NamedExpression::Payload(Payload::PayloadRaw(PayloadRaw {
            base,
            offset,
            len,
        })));
        self.push(named_match(left, right))
    }

    /// Matches a fixed byte span the same way as [`RuleExpr::raw_payload`],
    /// but AND-masks it with `mask` before comparing against `right`, e.g.
    /// for matching a flags field while ignoring reserved bits.
    #[must_use]
    pub fn raw_payload_masked(
        self,
        base: PayloadBase,
        offset: u32,
        len: u32,
        mask: Expression,
        right: Expression,
    ) -> Self {
        let field = Expression::Named(NamedExpression::Payload(Payload::PayloadRaw(PayloadRaw {
            base,
            offset,
            len,
        })));
        let left = Expression::BinaryOperation(BinaryOperation::AND(
            Box::new(field),
            Box::new(mask),
        ));
        self.push(named_match(left, right))
    }

    /// Matches an IPv6 extension header field, e.g. `exthdr("hbh", Some("nexthdr"), ...)`.
    #[must_use]
    pub fn exthdr(self, name: impl Into<String>, field: Option<String>, right: Expression) -> Self {
        let left = Expression::Named(NamedExpression::Exthdr(Exthdr {
            name: name.into(),
            field,
            offset: None,
        }));
        self.push(named_match(left, right))
    }

    /// Matches against the packet's originating socket (e.g. `skuid`, `skgid`, `cgroupv2`).
    #[must_use]
    pub fn socket(self, key: impl Into<String>, right: Expression) -> Self {
        let left = Expression::Named(NamedExpression::Socket(Socket { key: key.into() }));
        self.push(named_match(left, right))
    }

    /// Matches the OS fingerprint derived from TCP option ordering, against
    /// either the signature `name` (the default) or its `version`.
    #[must_use]
    pub fn osf(self, key: impl Into<String>, right: impl Into<String>, ttl: OsfTtl) -> Self {
        let left = Expression::Named(NamedExpression::Osf(Osf {
            key: key.into(),
            ttl,
        }));
        self.push(named_match(left, Expression::String(right.into())))
    }

    /// Matches the ICMP or ICMPv6 type of the active protocol context.
    #[must_use]
    pub fn icmp_type(mut self, icmp_type: impl Into<String>) -> Self {
        if self.poisoned() {
            return self;
        }
        match self.active_protocol("type") {
            Ok(proto @ (Protocol::Icmp | Protocol::Icmpv6)) => self.push(payload_match(
                proto.as_payload_name(),
                "type",
                Expression::String(icmp_type.into()),
            )),
            Ok(_) => self.fail(DslError::NoProtocolContext("type")),
            Err(e) => self.fail(e),
        }
    }

    /// Matches an arbitrary conntrack key against `right`, e.g.
    /// `ct("status", None, None, ...)` or `ct("mark", None, None, ...)` for
    /// keys with no dedicated helper method.
    #[must_use]
    pub fn ct(
        self,
        key: impl Into<String>,
        family: Option<CTFamily>,
        dir: Option<CTDir>,
        right: Expression,
    ) -> Self {
        let left = Expression::Named(NamedExpression::CT(CT {
            key: key.into(),
            family,
            dir,
        }));
        self.push(named_match(left, right))
    }

    /// Matches the conntrack state against one or more of
    /// `new`/`established`/`related`/`invalid`.
    #[must_use]
    pub fn ct_state(self, states: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let values: Vec<Expression> = states
            .into_iter()
            .map(|s| Expression::String(s.into()))
            .collect();
        self.ct("state", None, None, normalize_value(values))
    }

    /// Matches the conntrack status flags, e.g. `expected`/`seen-reply`/`confirmed`/`dying`.
    #[must_use]
    pub fn ct_status(self, statuses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let values: Vec<Expression> = statuses
            .into_iter()
            .map(|s| Expression::String(s.into()))
            .collect();
        self.ct("status", None, None, normalize_value(values))
    }

    /// Matches the conntrack flow direction (`original`/`reply`).
    #[must_use]
    pub fn ct_direction(self, dir: CTDir) -> Self {
        let right = Expression::String(match dir {
            CTDir::Original => "original".to_string(),
            CTDir::Reply => "reply".to_string(),
        });
        self.ct("direction", None, None, right)
    }

    /// Matches the connection's conntrack mark.
    #[must_use]
    pub fn ct_mark(self, value: u32) -> Self {
        self.ct("mark", None, None, Expression::Number(value))
    }

    /// Matches a conntrack label, e.g. `ct_label("tagged")`.
    #[must_use]
    pub fn ct_label(self, label: impl Into<String>) -> Self {
        self.ct("label", None, None, Expression::String(label.into()))
    }

    /// Matches the connection tracking zone.
    #[must_use]
    pub fn ct_zone(self, zone: u32) -> Self {
        self.ct("zone", None, None, Expression::Number(zone))
    }

    /// Matches the conntrack helper in use for this connection.
    #[must_use]
    pub fn ct_helper(self, name: impl Into<String>) -> Self {
        self.ct("helper", None, None, Expression::String(name.into()))
    }

    /// Matches the connection's original- or reply-direction byte counter.
    #[must_use]
    pub fn ct_bytes(self, dir: CTDir, value: u64) -> Self {
        self.ct("bytes", None, Some(dir), Expression::Number(value as u32))
    }

    /// Matches the connection's original- or reply-direction packet counter.
    #[must_use]
    pub fn ct_packets(self, dir: CTDir, value: u64) -> Self {
        self.ct("packets", None, Some(dir), Expression::Number(value as u32))
    }

    /// Matches the original-direction source address recorded by conntrack
    /// (useful after DNAT has rewritten the packet's own source).
    #[must_use]
    pub fn ct_original_saddr(self, addr: impl Into<String>) -> Self {
        let family = ct_family(self.family);
        self.ct(
            "saddr",
            Some(family),
            Some(CTDir::Original),
            Expression::String(addr.into()),
        )
    }

    /// Matches the original-direction destination address recorded by conntrack.
    #[must_use]
    pub fn ct_original_daddr(self, addr: impl Into<String>) -> Self {
        let family = ct_family(self.family);
        self.ct(
            "daddr",
            Some(family),
            Some(CTDir::Original),
            Expression::String(addr.into()),
        )
    }

    /// Matches the number of tracked connections sharing the packet's source
    /// (`ct count` expression used as a match left-hand side).
    #[must_use]
    pub fn ct_count_per_source(self, count: u32) -> Self {
        self.ct("count", None, None, Expression::Number(count))
    }

    /// Matches an arbitrary packet meta data key against `right`, e.g.
    /// `meta(MetaKey::Nfproto, ...)` for keys with no dedicated helper
    /// method.
    #[must_use]
    pub fn meta(self, key: MetaKey, right: Expression) -> Self {
        let left = Expression::Named(NamedExpression::Meta(Meta { key }));
        self.push(named_match(left, right))
    }

    /// Matches packet meta mark against `value`.
    #[must_use]
    pub fn meta_mark(self, value: u32) -> Self {
        self.meta(MetaKey::Mark, Expression::Number(value))
    }

    /// Matches the input interface name.
    #[must_use]
    pub fn iifname(self, name: impl Into<String>) -> Self {
        self.meta(MetaKey::Iifname, Expression::String(name.into()))
    }

    /// Matches the output interface name.
    #[must_use]
    pub fn oifname(self, name: impl Into<String>) -> Self {
        self.meta(MetaKey::Oifname, Expression::String(name.into()))
    }

    /// Matches the packet's total length in bytes.
    #[must_use]
    pub fn meta_length(self, len: u32) -> Self {
        self.meta(MetaKey::Length, Expression::Number(len))
    }

    /// Matches the packet's layer 4 protocol, e.g. `meta_l4proto("tcp")`.
    #[must_use]
    pub fn meta_l4proto(self, proto: impl Into<String>) -> Self {
        self.meta(MetaKey::L4proto, Expression::String(proto.into()))
    }

    /// Matches the packet's TC priority.
    #[must_use]
    pub fn meta_priority(self, priority: impl Into<String>) -> Self {
        self.meta(MetaKey::Priority, Expression::String(priority.into()))
    }

    /// Matches the packet type (`unicast`/`broadcast`/`multicast`/`other`).
    #[must_use]
    pub fn meta_pkttype(self, pkttype: impl Into<String>) -> Self {
        self.meta(MetaKey::Pkttype, Expression::String(pkttype.into()))
    }

    /// Matches the UID of the socket that originated the packet.
    #[must_use]
    pub fn meta_skuid(self, uid: u32) -> Self {
        self.meta(MetaKey::Skuid, Expression::Number(uid))
    }

    /// Matches the GID of the socket that originated the packet.
    #[must_use]
    pub fn meta_skgid(self, gid: u32) -> Self {
        self.meta(MetaKey::Skgid, Expression::Number(gid))
    }

    /// Matches the socket's control group ID.
    #[must_use]
    pub fn meta_cgroup(self, cgroup: u32) -> Self {
        self.meta(MetaKey::Cgroup, Expression::Number(cgroup))
    }

    /// Matches the packet's DSCP/traffic class value, carried as an `ip`/`ip6`
    /// payload field since `meta` has no dedicated DSCP key.
    #[must_use]
    pub fn dscp(self, value: u32) -> Self {
        let proto = address_protocol(self.family);
        self.payload(proto, "dscp", Expression::Number(value))
    }

    /// Appends an anonymous packet/byte counter.
    #[must_use]
    pub fn counter(self) -> Self {
        self.push(Statement::Counter(Counter::Anonymous(Some(
            AnonymousCounter::default(),
        ))))
    }

    /// Appends a named counter reference.
    #[must_use]
    pub fn counter_named(self, name: impl Into<String>) -> Self {
        self.push(Statement::Counter(Counter::Named(name.into())))
    }

    /// Appends a `log` statement with an optional prefix, syslog level,
    /// netlink group and flag set.
    #[must_use]
    pub fn log(
        self,
        prefix: Option<String>,
        level: Option<LogLevel>,
        group: Option<u32>,
        flags: Option<HashSet<LogFlag>>,
    ) -> Self {
        let log = Log {
            prefix,
            group,
            snaplen: None,
            queue_threshold: None,
            level,
            flags,
        };
        self.push(Statement::Log(Some(log)))
    }

    /// Appends a rate limit, e.g. `limit(10, Some("second"), false)`. `inv`
    /// inverts the match, i.e. matches once the limit has been exceeded.
    #[must_use]
    pub fn limit(self, rate: u32, per: Option<&str>, inv: bool) -> Self {
        let limit = Limit {
            rate,
            rate_unit: None,
            per: per.map(str::to_string),
            burst: None,
            burst_unit: None,
            inv: if inv { Some(true) } else { None },
        };
        self.push(Statement::Limit(limit))
    }

    /// Appends the `accept` verdict, terminating the rule.
    #[must_use]
    pub fn accept(self) -> Self {
        self.push(Statement::Accept(None))
    }

    /// Appends the `drop` verdict, terminating the rule.
    #[must_use]
    pub fn drop(self) -> Self {
        self.push(Statement::Drop(None))
    }

    /// Appends the `continue` verdict.
    #[must_use]
    pub fn continue_(self) -> Self {
        self.push(Statement::Continue(None))
    }

    /// Appends the `return` verdict.
    #[must_use]
    pub fn return_(self) -> Self {
        self.push(Statement::Return(None))
    }

    /// Appends a `jump` verdict to `target`.
    #[must_use]
    pub fn jump(self, target: impl Into<String>) -> Self {
        self.push(Statement::Jump(JumpTarget {
            target: target.into(),
        }))
    }

    /// Appends a `goto` verdict to `target`.
    #[must_use]
    pub fn goto(self, target: impl Into<String>) -> Self {
        self.push(Statement::Goto(JumpTarget {
            target: target.into(),
        }))
    }

    /// Appends a `reject` verdict with an optional type/code.
    #[must_use]
    pub fn reject(self, reject_type: Option<RejectType>, code: Option<RejectCode>) -> Self {
        self.push(Statement::Reject(Some(Reject::new(reject_type, code))))
    }

    /// Appends a `queue` statement, handing the packet to userspace queue
    /// `num`, optionally enabling `bypass`/`fanout`.
    #[must_use]
    pub fn queue(self, num: u32, bypass: bool, fanout: bool) -> Self {
        let mut flags = HashSet::new();
        if bypass {
            flags.insert(QueueFlag::Bypass);
        }
        if fanout {
            flags.insert(QueueFlag::Fanout);
        }
        self.push(Statement::Queue(Queue {
            num: Expression::Number(num),
            flags: if flags.is_empty() { None } else { Some(flags) },
        }))
    }

    /// Appends an anonymous `synproxy` statement.
    #[must_use]
    pub fn synproxy(self, mss: Option<u32>, wscale: Option<u32>, flags: Option<HashSet<SynProxyFlag>>) -> Self {
        self.push(Statement::SynProxy(SynProxy { mss, wscale, flags }))
    }

    /// Appends a `flow add @flowtable` offload statement.
    #[must_use]
    pub fn flow_offload(self, flowtable: impl Into<String>) -> Self {
        self.push(Statement::Flow(Flow {
            op: SetOp::Add,
            flowtable: format!("@{}", flowtable.into()),
        }))
    }

    /// Appends a `notrack` statement, disabling connection tracking for the packet.
    #[must_use]
    pub fn notrack(self) -> Self {
        self.push(Statement::Notrack)
    }

    /// Appends a `dup to` statement, duplicating the packet to `addr` (and
    /// optionally out a specific interface).
    #[must_use]
    pub fn duplicate_to(self, addr: Expression, dev: Option<Expression>) -> Self {
        self.push(Statement::Dup(Dup { addr, dev }))
    }

    /// Appends a source NAT (`snat`) statement. `family` overrides the
    /// address family the wire object carries; pass `None` to let it be
    /// inferred from the rule's table family (required for `inet` tables).
    #[must_use]
    pub fn snat(self, addr: Option<impl Into<String>>, port: Option<u32>, family: Option<NATFamily>) -> Self {
        let nat = build_nat(self.family, addr, port, family);
        self.push(Statement::SNAT(Some(nat)))
    }

    /// Appends a destination NAT (`dnat`) statement. See [`RuleExpr::snat`]
    /// for the `family` parameter's semantics.
    #[must_use]
    pub fn dnat(self, addr: Option<impl Into<String>>, port: Option<u32>, family: Option<NATFamily>) -> Self {
        let nat = build_nat(self.family, addr, port, family);
        self.push(Statement::DNAT(Some(nat)))
    }

    /// Appends a `masquerade` statement, with an optional translated port
    /// range (`(low, high)`).
    #[must_use]
    pub fn masquerade(self, port_range: Option<(u32, u32)>) -> Self {
        let nat = port_range.map(|(low, high)| NAT {
            addr: None,
            family: None,
            port: Some(normalize_range(low, high)),
            flags: None,
        });
        self.push(Statement::Masquerade(nat))
    }

    /// Appends a `redirect` statement to an optional port.
    #[must_use]
    pub fn redirect(self, port: Option<u32>) -> Self {
        let nat = NAT {
            addr: None,
            family: None,
            port: port.map(Expression::Number),
            flags: None,
        };
        self.push(Statement::Redirect(Some(nat)))
    }

    /// Appends a `tproxy` statement, redirecting the packet to a local
    /// socket without rewriting its header.
    #[must_use]
    pub fn tproxy(self, family: Option<String>, port: u16, addr: Option<String>) -> Self {
        self.push(Statement::TProxy(TProxy { family, port, addr }))
    }

    /// Matches `left` against a reference to a named set or map, e.g.
    /// `saddr @blocklist` or `tcp dport @allowed-ports`. Distinct from
    /// [`RuleExpr::set_add`]/[`RuleExpr::set_update`], which dynamically
    /// populate a set from a meter rather than testing membership.
    #[must_use]
    pub fn in_named_set(self, left: Expression, set_name: impl Into<String>) -> Self {
        let right = Expression::String(format!("@{}", set_name.into()));
        self.push(Statement::Match(Match {
            left,
            right,
            op: Operator::EQ,
        }))
    }

    /// Matches the source address against a named set (`saddr @blocklist`).
    #[must_use]
    pub fn saddr_in_set(self, set_name: impl Into<String>) -> Self {
        let proto = address_protocol(self.family);
        let left = Expression::Named(NamedExpression::Payload(Payload::PayloadField(PayloadField {
            protocol: proto.to_string(),
            field: "saddr".to_string(),
        })));
        self.in_named_set(left, set_name)
    }

    /// Matches the destination address against a named set (`daddr @blocklist`).
    #[must_use]
    pub fn daddr_in_set(self, set_name: impl Into<String>) -> Self {
        let proto = address_protocol(self.family);
        let left = Expression::Named(NamedExpression::Payload(Payload::PayloadField(PayloadField {
            protocol: proto.to_string(),
            field: "daddr".to_string(),
        })));
        self.in_named_set(left, set_name)
    }

    /// Matches the destination port of the active protocol context against a
    /// named set (`tcp dport @allowed-ports`).
    #[must_use]
    pub fn dport_in_set(mut self, set_name: impl Into<String>) -> Self {
        if self.poisoned() {
            return self;
        }
        match self.active_l4_protocol("dport") {
            Ok(proto) => {
                let left = Expression::Named(NamedExpression::Payload(Payload::PayloadField(PayloadField {
                    protocol: proto.as_payload_name().to_string(),
                    field: "dport".to_string(),
                })));
                self.in_named_set(left, set_name)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Adds `elem` to the named set, e.g. for dynamic blocklisting rules.
    #[must_use]
    pub fn set_add(self, set_name: impl Into<String>, elem: Expression) -> Self {
        self.push(Statement::Set(Set {
            op: SetOp::Add,
            elem,
            set: format!("@{}", set_name.into()),
        }))
    }

    /// Updates `elem` in the named set.
    #[must_use]
    pub fn set_update(self, set_name: impl Into<String>, elem: Expression) -> Self {
        self.push(Statement::Set(Set {
            op: SetOp::Update,
            elem,
            set: format!("@{}", set_name.into()),
        }))
    }

    /// Finalizes the accumulator into the statement list a
    /// [`crate::builder::Builder`] rule command expects, or the first
    /// error encountered while building it.
    pub fn build(self) -> Result<Vec<Statement>, DslError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.statements),
        }
    }
}

/// Resolves the `ct` expression's address family the same way
/// [`address_protocol`] resolves bare payload address matches.
fn ct_family(family: NfFamily) -> CTFamily {
    match family {
        NfFamily::IP6 => CTFamily::IP6,
        _ => CTFamily::IP,
    }
}

/// Resolves the `NAT` expression's default address family from the rule's
/// table family: `inet` tables require it explicitly (stmt.rs's
/// `NAT::family` doc: "Required in inet table family."); `ip`/`ip6` tables
/// leave it implicit and this returns `None` for them.
fn default_nat_family(family: NfFamily) -> Option<NATFamily> {
    match family {
        NfFamily::INet => Some(match address_protocol(family) {
            "ip6" => NATFamily::IP6,
            _ => NATFamily::IP,
        }),
        _ => None,
    }
}

fn build_nat(
    family: NfFamily,
    addr: Option<impl Into<String>>,
    port: Option<u32>,
    explicit_family: Option<NATFamily>,
) -> NAT {
    NAT {
        addr: addr.map(|a| Expression::String(a.into())),
        family: explicit_family.or_else(|| default_nat_family(family)),
        port: port.map(Expression::Number),
        flags: None,
    }
}

fn payload_match(protocol: &str, field: &str, right: Expression) -> Statement {
    let left = Expression::Named(NamedExpression::Payload(Payload::PayloadField(
        PayloadField {
            protocol: protocol.to_string(),
            field: field.to_string(),
        },
    )));
    named_match(left, right)
}

/// Builds a `Match` statement, picking `in` for a list right-hand side (spec
/// §4.1: "A list value implies `in`") and `==` otherwise.
fn named_match(left: Expression, right: Expression) -> Statement {
    let op = match &right {
        Expression::List(_) => Operator::IN,
        _ => Operator::EQ,
    };
    Statement::Match(Match { left, right, op })
}

/// Normalizes a two-value range into the wire's `{"range": [min, max]}`
/// shape. Callers are expected to have already validated `first <= last`
/// (e.g. via [`validate_range_order`](crate::validation::validate_range_order)).
pub fn normalize_range(first: u32, last: u32) -> Expression {
    Expression::Range(Range {
        range: vec![Expression::Number(first), Expression::Number(last)],
    })
}

/// Normalizes raw bytes (e.g. an Ethernet EtherType or a fixed-width packet
/// field matched via [`RuleExpr::raw_payload`]) into the wire's hex-string
/// immediate expression shape, e.g. `[0x08, 0x00]` -> `"0x0800"`.
pub fn normalize_raw_binary(bytes: &[u8]) -> Expression {
    let mut hex = String::with_capacity(2 + bytes.len() * 2);
    hex.push_str("0x");
    for b in bytes {
        hex.push_str(&format!("{b:02x}"));
    }
    Expression::String(hex)
}

/// Normalizes a value that may be given as a single item or a list into the
/// wire's scalar-or-array shape.
pub fn normalize_value(values: Vec<Expression>) -> Expression {
    if values.len() == 1 {
        values.into_iter().next().unwrap()
    } else {
        Expression::List(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::Statement;
    use crate::types::NfFamily;

    #[test]
    fn tcp_dport_accept_builds_expected_statements() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .tcp()
            .dport(22)
            .accept()
            .build()
            .expect("should build");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[2], Statement::Accept(None)));
    }

    #[test]
    fn dport_without_protocol_context_is_poisoned() {
        let err = RuleExpr::new(NfFamily::INet)
            .dport(22)
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn dport_range_rejects_inverted_bounds() {
        let err = RuleExpr::new(NfFamily::INet)
            .tcp()
            .dport_range(100, 10)
            .build()
            .unwrap_err();
        assert!(matches!(err, DslError::InvertedRange(_)));
    }

    #[test]
    fn saddr_picks_ip6_for_ip6_family() {
        let stmts = RuleExpr::new(NfFamily::IP6)
            .saddr("::1")
            .drop()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => match &m.left {
                Expression::Named(NamedExpression::Payload(Payload::PayloadField(f))) => {
                    assert_eq!(f.protocol, "ip6");
                    assert_eq!(f.field, "saddr");
                }
                _ => panic!("expected payload field"),
            },
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn icmp_type_requires_icmp_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .icmp_type("echo-request")
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("type"));
    }

    #[test]
    fn icmp_type_matches_under_icmp_context() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .icmp()
            .icmp_type("echo-request")
            .drop()
            .build()
            .unwrap();
        match &stmts[1] {
            Statement::Match(m) => match &m.left {
                Expression::Named(NamedExpression::Payload(Payload::PayloadField(f))) => {
                    assert_eq!(f.protocol, "icmp");
                    assert_eq!(f.field, "type");
                }
                _ => panic!("expected payload field"),
            },
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn payload_matches_arbitrary_named_header_field() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .payload("arp", "ptype", Expression::Number(0x0800))
            .accept()
            .build()
            .unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn normalize_raw_binary_formats_as_hex_string() {
        assert_eq!(normalize_raw_binary(&[0x08, 0x00]), Expression::String("0x0800".to_string()));
    }

    #[test]
    fn first_error_wins_once_poisoned() {
        let result = RuleExpr::new(NfFamily::INet)
            .dport(1)
            .sport(2)
            .build();
        assert_eq!(result.unwrap_err(), DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn payload_match_uses_in_operator_for_list_right_operand() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .payload("tcp", "dport", Expression::List(vec![Expression::Number(80), Expression::Number(443)]))
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => assert_eq!(m.op, Operator::IN),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn payload_match_uses_eq_operator_for_scalar_right_operand() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .payload("tcp", "dport", Expression::Number(80))
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => assert_eq!(m.op, Operator::EQ),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn ct_state_uses_in_operator_for_multiple_states() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .ct_state(["established", "related"])
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => {
                assert_eq!(m.op, Operator::IN);
                assert!(matches!(m.right, Expression::List(_)));
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn ct_state_uses_eq_operator_for_single_state() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .ct_state(["established"])
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => assert_eq!(m.op, Operator::EQ),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn ct_original_saddr_carries_family_and_direction() {
        let stmts = RuleExpr::new(NfFamily::IP6)
            .ct_original_saddr("2001:db8::1")
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => match &m.left {
                Expression::Named(NamedExpression::CT(ct)) => {
                    assert_eq!(ct.key, "saddr");
                    assert_eq!(ct.family, Some(CTFamily::IP6));
                    assert_eq!(ct.dir, Some(CTDir::Original));
                }
                other => panic!("expected ct expression, got {other:?}"),
            },
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn generic_meta_escape_hatch_matches_named_helpers() {
        let via_generic = RuleExpr::new(NfFamily::INet)
            .meta(MetaKey::Cgroup, Expression::Number(7))
            .accept()
            .build()
            .unwrap();
        let via_helper = RuleExpr::new(NfFamily::INet)
            .meta_cgroup(7)
            .accept()
            .build()
            .unwrap();
        assert_eq!(via_generic, via_helper);
    }

    #[test]
    fn raw_payload_masked_ands_before_comparing() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .raw_payload_masked(
                PayloadBase::NH,
                6,
                1,
                Expression::Number(0x0f),
                Expression::Number(0x02),
            )
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => assert!(matches!(m.left, Expression::BinaryOperation(BinaryOperation::AND(_, _)))),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn osf_can_select_matched_attribute() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .osf("version", "Linux", OsfTtl::Skip)
            .accept()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => match &m.left {
                Expression::Named(NamedExpression::Osf(osf)) => assert_eq!(osf.key, "version"),
                other => panic!("expected osf expression, got {other:?}"),
            },
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn queue_sets_bypass_and_fanout_flags() {
        let stmts = RuleExpr::new(NfFamily::INet).queue(0, true, true).build().unwrap();
        match &stmts[0] {
            Statement::Queue(q) => {
                let flags = q.flags.as_ref().expect("flags set");
                assert!(flags.contains(&QueueFlag::Bypass));
                assert!(flags.contains(&QueueFlag::Fanout));
            }
            other => panic!("expected queue, got {other:?}"),
        }
    }

    #[test]
    fn notrack_appends_bare_variant() {
        let stmts = RuleExpr::new(NfFamily::INet).notrack().build().unwrap();
        assert!(matches!(stmts[0], Statement::Notrack));
    }

    #[test]
    fn flow_offload_references_flowtable_by_name() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .flow_offload("fastpath")
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Flow(f) => assert_eq!(f.flowtable, "@fastpath"),
            other => panic!("expected flow, got {other:?}"),
        }
    }

    #[test]
    fn snat_sets_family_for_inet_tables() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .snat(Some("203.0.113.1"), Some(1024), None)
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::SNAT(Some(nat)) => assert_eq!(nat.family, Some(NATFamily::IP)),
            other => panic!("expected snat, got {other:?}"),
        }
    }

    #[test]
    fn snat_leaves_family_unset_for_ip_tables() {
        let stmts = RuleExpr::new(NfFamily::IP)
            .snat(Some("203.0.113.1"), None, None)
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::SNAT(Some(nat)) => assert_eq!(nat.family, None),
            other => panic!("expected snat, got {other:?}"),
        }
    }

    #[test]
    fn masquerade_with_port_range_builds_range_expression() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .masquerade(Some((1024, 65535)))
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Masquerade(Some(nat)) => {
                assert!(matches!(nat.port, Some(Expression::Range(_))));
            }
            other => panic!("expected masquerade, got {other:?}"),
        }
    }

    #[test]
    fn masquerade_without_port_range_is_bare() {
        let stmts = RuleExpr::new(NfFamily::INet).masquerade(None).build().unwrap();
        assert!(matches!(stmts[0], Statement::Masquerade(None)));
    }

    #[test]
    fn named_set_lookup_matches_by_reference_not_meter() {
        let stmts = RuleExpr::new(NfFamily::INet)
            .saddr_in_set("blocklist")
            .drop()
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Match(m) => assert_eq!(m.right, Expression::String("@blocklist".to_string())),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn dport_in_set_requires_protocol_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .dport_in_set("allowed-ports")
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn dport_rejects_non_l4_protocol_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .icmp()
            .dport(53)
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn sport_rejects_non_l4_protocol_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .icmpv6()
            .sport(53)
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("sport"));
    }

    #[test]
    fn dport_range_rejects_non_l4_protocol_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .icmp()
            .dport_range(1024, 2048)
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn dport_in_set_rejects_non_l4_protocol_context() {
        let err = RuleExpr::new(NfFamily::INet)
            .icmp()
            .dport_in_set("allowed-ports")
            .build()
            .unwrap_err();
        assert_eq!(err, DslError::NoProtocolContext("dport"));
    }

    #[test]
    fn log_carries_level_group_and_flags() {
        let mut flags = HashSet::new();
        flags.insert(LogFlag::Skuid);
        let stmts = RuleExpr::new(NfFamily::INet)
            .log(Some("drop: ".to_string()), Some(LogLevel::Info), Some(5), Some(flags.clone()))
            .build()
            .unwrap();
        match &stmts[0] {
            Statement::Log(Some(log)) => {
                assert_eq!(log.level, Some(LogLevel::Info));
                assert_eq!(log.group, Some(5));
                assert_eq!(log.flags, Some(flags));
            }
            other => panic!("expected log, got {other:?}"),
        }
    }

    #[test]
    fn limit_inversion_flag_is_forwarded() {
        let stmts = RuleExpr::new(NfFamily::INet).limit(10, Some("second"), true).build().unwrap();
        match &stmts[0] {
            Statement::Limit(l) => assert_eq!(l.inv, Some(true)),
            other => panic!("expected limit, got {other:?}"),
        }
    }
}
