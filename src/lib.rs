//! nft-client is a Rust library providing a fluent builder, a pluggable
//! submission backend and a response decoder over the nftables JSON API,
//! known as libnftables-json.
//!
//! This library is engineered for developers who need to construct,
//! submit, and interpret nftables rulesets directly from Rust applications
//! without hand-assembling the underlying JSON schema or shelling out to
//! `nft` themselves for every change.
//!
//! The wire schema (`schema`, `types`, `expr`, `stmt`) is a faithful,
//! serde-driven representation of libnftables-json; the `dsl`, `builder`,
//! `requestor`, `query`, and `decoder` modules build a programmatic
//! configuration pipeline on top of it.

// TODO: add example usage to library doc

/// Contains Batch object to be used to prepare Nftables payloads.
pub mod batch;

/// Contains Expressions.
/// Expressions are the building blocks of (most) statements.
///
/// See <https://manpages.debian.org/testing/libnftables1/libnftables-json.5.en.html#EXPRESSIONS>.
pub mod expr;

/// Contains the global structure of an Nftables document.
///
/// See <https://manpages.debian.org/testing/libnftables1/libnftables-json.5.en.html#GLOBAL_STRUCTURE>.
pub mod schema;

/// Contains Statements.
/// Statements are the building blocks for rules.
///
/// See <https://manpages.debian.org/testing/libnftables1/libnftables-json.5.en.html#STATEMENTS>.
pub mod stmt;

/// Contains common type definitions referred to in the schema.
pub mod types;

/// Contains methods to communicate with nftables JSON API.
pub mod helper;

/// Contains node visitors for serde.
pub mod visitor;

/// Fluent expression DSL for building rule statements with per-rule context.
pub mod dsl;

/// The command Builder: turns an options bag plus rolling context into a
/// well-formed sequence of nftables command envelopes.
pub mod builder;

/// The Requestor abstraction: submits a Builder's commands to a backend
/// and returns its raw outcome.
pub mod requestor;

/// Pure query command constructors (list/flush).
pub mod query;

/// Decodes a Requestor outcome into one of the four reply shapes.
pub mod decoder;

/// Shared validation and humanization helpers.
pub mod validation;

// Default values for Default implementations.
const DEFAULT_FAMILY: types::NfFamily = types::NfFamily::INet;
const DEFAULT_TABLE: &str = "filter";
const DEFAULT_CHAIN: &str = "forward";
