//! Integration tests for broker addresses

use skiff_core::address::{AddressError, BrokerAddress};
use std::collections::BTreeSet;

#[test]
fn test_parse_forms() {
    let plain: BrokerAddress = "nsqd-1.internal:4150".parse().unwrap();
    assert_eq!(plain.host(), "nsqd-1.internal");
    assert_eq!(plain.port(), 4150);
    assert!(!plain.has_partition());

    let v6 = BrokerAddress::parse(" [fe80::1]:4150 ").unwrap();
    assert_eq!(v6.host(), "fe80::1");
    assert_eq!(v6.authority(), "[fe80::1]:4150");
}

#[test]
fn test_parse_errors() {
    assert!(matches!(BrokerAddress::parse("nsqd"), Err(AddressError::MissingPort(_))));
    assert!(matches!(BrokerAddress::parse(":4150"), Err(AddressError::InvalidHost(_))));
    assert!(matches!(BrokerAddress::parse("nsqd:http"), Err(AddressError::InvalidPort(_))));
    assert!(matches!(BrokerAddress::parse("nsqd:70000"), Err(AddressError::InvalidPort(_))));
}

#[test]
fn test_sorted_set_dedups_by_value() {
    let set: BTreeSet<BrokerAddress> = [
        BrokerAddress::new("b", 4150),
        BrokerAddress::with_partition("a", 4150, 1),
        BrokerAddress::new("a", 4150),
        BrokerAddress::new("b", 4150),
        BrokerAddress::with_partition("a", 4150, 0),
    ]
    .into_iter()
    .collect();

    let rendered: Vec<String> = set.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, ["a:4150", "a:4150/0", "a:4150/1", "b:4150"]);
}
