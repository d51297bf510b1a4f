//! Shared validation and humanization helpers used by the [`builder`](crate::builder),
//! [`dsl`](crate::dsl) and [`requestor`](crate::requestor) modules.

use crate::types::{NfFamily, NfHook};

/// Resolves the address family ("ip" or "ip6") a bare address/prefix match
/// should use, given the rule's table family.
///
/// Per the IP protocol resolution rule: `ip6` resolves to `ip6`; every other
/// family (`ip`, `inet`, `arp`, `bridge`, `netdev`) resolves to `ip`. There is
/// no separate "inet6" family in this schema — `inet` dual-stack tables
/// always resolve bare address matches to `ip` unless the rule's DSL call
/// explicitly picked the v6 variant (e.g. `ip6_saddr` instead of `saddr`).
pub fn address_protocol(family: NfFamily) -> &'static str {
    match family {
        NfFamily::IP6 => "ip6",
        _ => "ip",
    }
}

/// Validates that a flowtable's hook/devices satisfy the kernel's
/// constraints before a command envelope is constructed for it.
///
/// Flowtables may only attach to the `ingress` hook, and require at least
/// one device.
pub fn validate_flowtable(hook: Option<NfHook>, devices: &Option<Vec<String>>) -> Result<(), String> {
    match hook {
        Some(NfHook::Ingress) | None => {}
        Some(other) => {
            return Err(format!(
                "flowtables may only attach to the ingress hook, got {other:?}"
            ))
        }
    }
    match devices {
        Some(devs) if !devs.is_empty() => Ok(()),
        _ => Err("flowtables require at least one device".to_string()),
    }
}

/// Validates that `first <= last` for a two-element range, matching both the
/// DSL's range-construction rule and the Decoder's range-normalization
/// invariant.
pub fn validate_range_order(first: u32, last: u32) -> Result<(), String> {
    if first > last {
        Err(format!("range is inverted: {first} > {last}"))
    } else {
        Ok(())
    }
}

/// Maps a handful of errno values nftables commonly surfaces via `nft`'s
/// stderr into a short human-readable description. Unknown codes are passed
/// through unchanged so callers always get *something* useful.
pub fn describe_errno(errno: i32) -> String {
    let text = match errno {
        2 => "no such file or directory (object does not exist)",
        1 => "operation not permitted",
        17 => "object already exists",
        22 => "invalid argument",
        105 => "no buffer space available",
        13 => "permission denied",
        _ => return format!("errno {errno}"),
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NfFamily;

    #[test]
    fn address_protocol_picks_ip6_only_for_ip6_family() {
        assert_eq!(address_protocol(NfFamily::IP6), "ip6");
        assert_eq!(address_protocol(NfFamily::IP), "ip");
        assert_eq!(address_protocol(NfFamily::INet), "ip");
        assert_eq!(address_protocol(NfFamily::Bridge), "ip");
    }

    #[test]
    fn flowtable_requires_ingress_hook_and_devices() {
        assert!(validate_flowtable(Some(NfHook::Ingress), &Some(vec!["eth0".into()])).is_ok());
        assert!(validate_flowtable(Some(NfHook::Forward), &Some(vec!["eth0".into()])).is_err());
        assert!(validate_flowtable(Some(NfHook::Ingress), &None).is_err());
        assert!(validate_flowtable(Some(NfHook::Ingress), &Some(vec![])).is_err());
    }

    #[test]
    fn range_order_rejects_inverted_bounds() {
        assert!(validate_range_order(10, 20).is_ok());
        assert!(validate_range_order(20, 10).is_err());
        assert!(validate_range_order(5, 5).is_ok());
    }

    #[test]
    fn errno_descriptions_cover_common_codes() {
        assert_eq!(describe_errno(2), "no such file or directory (object does not exist)");
        assert_eq!(describe_errno(9999), "errno 9999");
    }
}
