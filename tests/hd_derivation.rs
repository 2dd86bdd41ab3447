//! BIP-32 derivation against published vectors and structural properties

use proptest::prelude::*;
use quaiwallet::hdnode::{HDNode, HARDENED_OFFSET};
use quaiwallet::zone::{self, Ledger, Zone};
use quaiwallet::WalletError;

const SEED: &str = "000102030405060708090a0b0c0d0e0f";

fn master() -> HDNode {
    HDNode::from_seed(&hex::decode(SEED).unwrap()).unwrap()
}

#[test]
fn test_vector_one_master() {
    let root = master();
    assert_eq!(
        root.extended_key(),
        "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
    );
    assert_eq!(
        root.neuter().extended_key(),
        "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"
    );
}

#[test]
fn test_vector_one_hardened_child() {
    let child = master().derive_path("m/0'").unwrap();
    assert_eq!(
        child.extended_key(),
        "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7"
    );
    assert_eq!(
        child.neuter().extended_key(),
        "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw"
    );
}

#[test]
fn test_vector_one_normal_grandchild() {
    let node = master().derive_path("m/0'/1").unwrap();
    assert_eq!(
        node.extended_key(),
        "xprv9wTYmMFdV23N2TdNG573QoEsfRrWKQgWeibmLntzniatZvR9BmLnvSxqu53Kw1UmYPxLgboyZQaXwTCg8MSY3H2EU4pWcQDnRnrVA1xe8fs"
    );
    assert_eq!(
        node.neuter().extended_key(),
        "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMiGj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ"
    );
}

#[test]
fn test_path_derivation_is_associative() {
    let root = master();
    let direct = root.derive_path("m/0'/1/2'").unwrap();
    let stepwise = root
        .derive_path("m/0'")
        .unwrap()
        .derive_path("1/2'")
        .unwrap();
    assert_eq!(direct.extended_key(), stepwise.extended_key());
    assert_eq!(direct.path(), Some("m/0'/1/2'"));
}

#[test]
fn test_neutered_parent_matches_private_child() {
    let parent = master().derive_path("m/0'").unwrap();
    for index in [0, 1, 7, 1000] {
        let from_private = parent.derive_child(index).unwrap().neuter();
        let from_public = parent.neuter().derive_child(index).unwrap();
        assert_eq!(from_private.extended_key(), from_public.extended_key());
    }
}

#[test]
fn test_extended_key_round_trip_keeps_derivation() {
    let node = master().derive_path("m/0'/1").unwrap();
    let decoded = HDNode::from_extended_key(&node.extended_key()).unwrap();
    assert_eq!(decoded.depth(), 2);
    assert_eq!(decoded.index(), 1);
    assert_eq!(
        decoded.derive_child(5).unwrap().address(),
        node.derive_child(5).unwrap().address()
    );

    let public = HDNode::from_extended_key(&node.neuter().extended_key()).unwrap();
    assert!(public.is_neutered());
    assert!(matches!(
        public.derive_child(HARDENED_OFFSET),
        Err(WalletError::InvalidArgument(_))
    ));
}

#[test]
fn test_derived_addresses_classify_into_at_most_one_zone() {
    let phrase =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    let chain = HDNode::from_phrase(phrase, "", Some("m/44'/994'/0'/0")).unwrap();
    let mut classified = 0;
    for index in 0..300 {
        let address = chain.derive_child(index).unwrap().address();
        let matches: Vec<Zone> = Zone::ALL
            .into_iter()
            .filter(|z| {
                zone::is_valid_address_for_zone(&address, *z, Ledger::Quai)
                    || zone::is_valid_address_for_zone(&address, *z, Ledger::Qi)
            })
            .collect();
        assert!(matches.len() <= 1);
        match zone::zone_from_address(&address) {
            Ok(found) => {
                assert_eq!(matches, vec![found]);
                classified += 1;
            }
            Err(e) => {
                assert!(matches!(e, WalletError::InvalidZone(_)));
                assert!(matches.is_empty());
            }
        }
    }
    assert!(classified > 0);
}

proptest! {
    #[test]
    fn prop_public_derivation_agrees(index in 0u32..HARDENED_OFFSET) {
        let parent = master().derive_path("m/0'").unwrap();
        let private_child = parent.derive_child(index).unwrap();
        let public_child = parent.neuter().derive_child(index).unwrap();
        prop_assert_eq!(private_child.public_key_bytes(), public_child.public_key_bytes());
        prop_assert_eq!(private_child.chain_code(), public_child.chain_code());
    }

    #[test]
    fn prop_hardened_children_differ_from_normal(index in 0u32..1_000) {
        let root = master();
        let normal = root.derive_child(index).unwrap();
        let hardened = root.derive_child(index | HARDENED_OFFSET).unwrap();
        prop_assert_ne!(normal.address(), hardened.address());
    }
}
