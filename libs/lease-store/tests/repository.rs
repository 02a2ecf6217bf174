// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Repository behavior, run against every store engine.

use std::{net::Ipv6Addr, sync::Arc};

use assert_matches::assert_matches;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use lease_store::{
    LeaseRepository, LeaseStoreError,
    clock::{Clock, FixedClock},
    model::{IaBinding, IaKey, IaType, IdentityAssoc, LeaseState},
    option::DhcpOption,
    reconcile::AddressRange,
    store::{LeaseRow, LeaseStore, StoreError, memory::MemoryLeaseStore, sqlite::SqliteLeaseStore},
};
use test_log::test;

type Repository = LeaseRepository<Arc<dyn LeaseStore>>;

/// A start time with sub-second precision.
fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 123_456_789).unwrap()
}

fn addr(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

/// One repository per store engine, all sharing a clock standing at `t0`.
fn repositories() -> Vec<(&'static str, Repository, FixedClock)> {
    let stores: Vec<(&'static str, Arc<dyn LeaseStore>)> = vec![
        ("memory", Arc::new(MemoryLeaseStore::new())),
        ("sqlite", Arc::new(SqliteLeaseStore::open_in_memory().unwrap())),
    ];
    stores
        .into_iter()
        .map(|(name, store)| {
            let clock = FixedClock::new(t0());
            let repository = LeaseRepository::new(store).with_clock(Arc::new(clock.clone()));
            (name, repository, clock)
        })
        .collect()
}

fn key(client: &'static [u8], ia_type: IaType, ia_id: u32) -> IaKey {
    IaKey::new(Bytes::from_static(client), ia_type, ia_id)
}

/// A binding starting at `start` with 300s preferred and 600s valid lifetime.
fn binding_at(address: &str, state: LeaseState, start: DateTime<Utc>) -> IaBinding {
    IaBinding::address(
        addr(address),
        state,
        start,
        start + Duration::seconds(300),
        start + Duration::seconds(600),
    )
}

fn binding(address: &str, state: LeaseState) -> IaBinding {
    binding_at(address, state, t0())
}

fn prefix(address: &str, prefix_len: u8, state: LeaseState) -> IaBinding {
    IaBinding::prefix(
        addr(address),
        prefix_len,
        state,
        t0(),
        t0() + Duration::seconds(300),
        t0() + Duration::seconds(600),
    )
}

fn ia(key: IaKey, bindings: Vec<IaBinding>) -> IdentityAssoc {
    let mut ia = IdentityAssoc::new(key, LeaseState::Committed);
    ia.bindings = bindings;
    ia
}

fn option(code: u16, value: &'static [u8]) -> DhcpOption {
    DhcpOption::new(code, Bytes::from_static(value)).unwrap()
}

#[test]
fn created_ia_is_found_unchanged() {
    for (name, repository, _) in repositories() {
        let c1 = key(b"C1", IaType::NonTemporary, 1);
        let a1 = binding("2001:db8::a1", LeaseState::Committed)
            .with_options(vec![option(23, b"dns"), option(24, b"")]);
        let created = ia(c1.clone(), vec![a1.clone()]).with_options(vec![option(7, &[255])]);

        repository.create_ia(&created).unwrap();

        let found = repository.find_ia(&c1).unwrap().unwrap();
        assert_eq!(found, created, "{name}");
        assert_eq!(found.bindings, vec![a1], "{name}");
    }
}

#[test]
fn unknown_key_is_not_found() {
    for (name, repository, _) in repositories() {
        repository
            .create_ia(&ia(key(b"C1", IaType::NonTemporary, 1), vec![binding(
                "2001:db8::1",
                LeaseState::Committed,
            )]))
            .unwrap();

        for other in [
            key(b"C2", IaType::NonTemporary, 1),
            key(b"C1", IaType::Temporary, 1),
            key(b"C1", IaType::NonTemporary, 2),
        ] {
            assert_eq!(repository.find_ia(&other).unwrap(), None, "{name}: {other}");
        }
    }
}

#[test]
fn bindings_keep_insertion_order() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::PrefixDelegation, 4);
        let created = ia(k.clone(), vec![
            prefix("2001:db8:ff00::", 56, LeaseState::Committed),
            prefix("2001:db8:1000::", 52, LeaseState::Committed),
            prefix("2001:db8:8000::", 56, LeaseState::Committed),
        ]);
        repository.create_ia(&created).unwrap();
        assert_eq!(repository.find_ia(&k).unwrap(), Some(created), "{name}");
    }
}

#[test]
fn update_adds_changes_and_removes_bindings() {
    for (name, repository, clock) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        let mut current = ia(k.clone(), vec![binding(
            "2001:db8::1",
            LeaseState::Advertised,
        )]);
        repository.create_ia(&current).unwrap();

        clock.advance(Duration::seconds(5));
        let x = binding_at("2001:db8::2", LeaseState::Committed, clock.now());
        let renewed = binding_at("2001:db8::1", LeaseState::Committed, clock.now())
            .with_options(vec![option(82, b"relay")]);
        current.options = vec![option(7, &[1])];
        repository
            .update_ia(&current, &[x.clone()], &[renewed.clone()], &[])
            .unwrap();

        let found = repository.find_ia(&k).unwrap().unwrap();
        assert_eq!(found.bindings, vec![renewed.clone(), x.clone()], "{name}");
        assert_eq!(found.options, current.options, "{name}");

        repository.update_ia(&current, &[], &[], &[x.clone()]).unwrap();
        let found = repository.find_ia(&k).unwrap().unwrap();
        assert_eq!(found.binding(x.address), None, "{name}");
        assert_eq!(found.bindings, vec![renewed], "{name}");
    }
}

#[test]
fn updating_a_vanished_binding_is_a_lost_race() {
    for (name, repository, _) in repositories() {
        let current = ia(key(b"C1", IaType::NonTemporary, 1), vec![]);
        let err = repository
            .update_ia(&current, &[], &[binding("2001:db8::9", LeaseState::Committed)], &[])
            .unwrap_err();
        assert_matches!(err, LeaseStoreError::NoSuchLease(_), "{name}");
        assert!(err.is_lost_race(), "{name}");
    }
}

#[test]
fn claiming_a_leased_address_is_a_lost_race() {
    for (name, repository, _) in repositories() {
        repository
            .create_ia(&ia(key(b"C1", IaType::NonTemporary, 1), vec![binding(
                "2001:db8::1",
                LeaseState::Committed,
            )]))
            .unwrap();

        let second = key(b"C2", IaType::NonTemporary, 1);
        let err = repository
            .create_ia(&ia(second.clone(), vec![
                binding("2001:db8::2", LeaseState::Advertised),
                binding("2001:db8::1", LeaseState::Advertised),
            ]))
            .unwrap_err();
        assert_matches!(
            err,
            LeaseStoreError::StoreOperationFailed(StoreError::Conflict(_)),
            "{name}"
        );
        assert!(err.is_lost_race(), "{name}");

        // Bindings written before the conflict stay.
        let partial = repository.find_ia(&second).unwrap().unwrap();
        assert_eq!(partial.bindings.len(), 1, "{name}");
        assert_eq!(partial.bindings[0].address, addr("2001:db8::2"), "{name}");
    }
}

#[test]
fn concurrent_claims_have_one_winner() {
    for (name, repository, _) in repositories() {
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u32)
                .map(|i| {
                    let repository = &repository;
                    s.spawn(move || {
                        repository.create_ia(&ia(key(b"C", IaType::NonTemporary, i), vec![
                            binding("2001:db8::77", LeaseState::Advertised),
                        ]))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{name}");
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(LeaseStoreError::is_lost_race),
            "{name}"
        );
    }
}

#[test]
fn delete_removes_all_bindings_and_tolerates_repeats() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        let created = ia(k.clone(), vec![
            binding("2001:db8::1", LeaseState::Committed),
            binding("2001:db8::2", LeaseState::Committed),
        ]);
        repository.create_ia(&created).unwrap();

        repository.delete_ia(&created).unwrap();
        assert_eq!(repository.find_ia(&k).unwrap(), None, "{name}");
        repository.delete_ia(&created).unwrap();
        repository.delete_binding(&created.bindings[0]).unwrap();
    }
}

#[test]
fn update_binding_keeps_options() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::PrefixDelegation, 1);
        let delegated =
            prefix("2001:db8:100::", 56, LeaseState::Committed).with_options(vec![option(
                26,
                b"pd",
            )]);
        repository
            .create_ia(&ia(k.clone(), vec![delegated.clone()]))
            .unwrap();

        let expired = IaBinding {
            state: LeaseState::Expired,
            options: vec![],
            ..delegated.clone()
        };
        repository.update_binding(&expired).unwrap();

        let found = repository.find_ia(&k).unwrap().unwrap();
        assert_eq!(found.bindings[0].state, LeaseState::Expired, "{name}");
        assert_eq!(found.bindings[0].options, delegated.options, "{name}");
        assert_eq!(found.bindings[0].kind, delegated.kind, "{name}");
    }
}

#[test]
fn find_by_address_loads_anchor_first() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        let bindings = vec![
            binding("2001:db8::1", LeaseState::Committed),
            binding("2001:db8::2", LeaseState::Committed),
            binding("2001:db8::3", LeaseState::Committed),
        ];
        repository.create_ia(&ia(k.clone(), bindings.clone())).unwrap();
        repository
            .create_ia(&ia(key(b"C2", IaType::NonTemporary, 1), vec![binding(
                "2001:db8::4",
                LeaseState::Committed,
            )]))
            .unwrap();

        let only = repository
            .find_ia_by_address(addr("2001:db8::2"), false)
            .unwrap()
            .unwrap();
        assert_eq!(only.key, k, "{name}");
        assert_eq!(only.bindings, vec![bindings[1].clone()], "{name}");

        let all = repository
            .find_ia_by_address(addr("2001:db8::2"), true)
            .unwrap()
            .unwrap();
        assert_eq!(
            all.bindings,
            vec![
                bindings[1].clone(),
                bindings[0].clone(),
                bindings[2].clone()
            ],
            "{name}"
        );

        assert_eq!(
            repository
                .find_ia_by_address(addr("2001:db8::99"), true)
                .unwrap(),
            None,
            "{name}"
        );
    }
}

#[test]
fn existing_ips_ascend_and_include_bounds() {
    for (name, repository, _) in repositories() {
        let addresses = [
            "2001:db8::ffff",
            "2001:db8::10",
            "2001:db8::1:0",
            "2001:db8::1",
            "2001:db8::0",
            "2001:db9::",
        ];
        for (i, a) in addresses.iter().enumerate() {
            repository
                .create_ia(&ia(key(b"C", IaType::NonTemporary, i as u32), vec![
                    binding(a, LeaseState::Committed),
                ]))
                .unwrap();
        }

        let found = repository
            .find_existing_ips(addr("2001:db8::1"), addr("2001:db8::1:0"))
            .unwrap();
        assert_eq!(
            found,
            vec![
                addr("2001:db8::1"),
                addr("2001:db8::10"),
                addr("2001:db8::ffff"),
                addr("2001:db8::1:0"),
            ],
            "{name}"
        );
        assert!(found.windows(2).all(|w| w[0] < w[1]), "{name}");
    }
}

#[test]
fn offers_are_held_for_two_minutes() {
    for (name, repository, clock) in repositories() {
        repository
            .create_ia(&ia(key(b"C1", IaType::NonTemporary, 1), vec![binding(
                "2001:db8::1",
                LeaseState::Advertised,
            )]))
            .unwrap();
        let unused = || {
            repository
                .find_unused_ia_addresses(addr("2001:db8::"), addr("2001:db8::ff"))
                .unwrap()
        };

        assert!(unused().is_empty(), "{name}");
        clock.advance(Duration::milliseconds(120_000));
        assert!(unused().is_empty(), "{name}: hold window is exclusive");
        clock.advance(Duration::milliseconds(1));
        let found = unused();
        assert_eq!(found.len(), 1, "{name}");
        assert_eq!(found[0].address, addr("2001:db8::1"), "{name}");
    }
}

#[test]
fn unused_candidates_are_ordered_and_bare() {
    for (name, repository, _) in repositories() {
        let old = t0() - Duration::seconds(3600);
        let released = IaBinding {
            valid_end_time: t0() - Duration::seconds(10),
            ..binding_at("2001:db8::1", LeaseState::Released, old)
        };
        let expired_late = IaBinding {
            valid_end_time: t0() - Duration::seconds(20),
            ..binding_at("2001:db8::2", LeaseState::Expired, old)
        };
        let expired_early = IaBinding {
            valid_end_time: t0() - Duration::seconds(30),
            ..binding_at("2001:db8::3", LeaseState::Expired, old)
        }
        .with_options(vec![option(23, b"dns")]);
        let stale_offer = binding_at("2001:db8::4", LeaseState::Advertised, old);
        let fresh_offer = binding_at("2001:db8::5", LeaseState::Advertised, t0());
        let committed = binding_at("2001:db8::6", LeaseState::Committed, old);
        let declined = binding_at("2001:db8::7", LeaseState::Declined, old);
        let outside = binding_at("2001:db8::1:0", LeaseState::Released, old);

        repository
            .create_ia(&ia(key(b"C1", IaType::NonTemporary, 1), vec![
                released.clone(),
                expired_late.clone(),
                expired_early.clone(),
                stale_offer.clone(),
                fresh_offer,
                committed,
                declined,
                outside,
            ]))
            .unwrap();
        repository
            .create_ia(&ia(key(b"C1", IaType::PrefixDelegation, 1), vec![
                prefix("2001:db8::8", 126, LeaseState::Released),
            ]))
            .unwrap();

        let found = repository
            .find_unused_ia_addresses(addr("2001:db8::"), addr("2001:db8::ffff"))
            .unwrap();
        let expected = vec![
            stale_offer,
            expired_early.with_options(vec![]),
            expired_late,
            released,
        ];
        assert_eq!(found, expected, "{name}");

        let prefixes = repository
            .find_unused_ia_prefixes(addr("2001:db8::"), addr("2001:db8::ffff"))
            .unwrap();
        assert_eq!(prefixes.len(), 1, "{name}");
        assert_eq!(prefixes[0].kind.prefix_len(), Some(126), "{name}");
    }
}

#[test]
fn expired_bindings_earliest_first() {
    for (name, repository, clock) in repositories() {
        let with_valid_end = |address: &str, offset: i64| IaBinding {
            preferred_end_time: t0(),
            valid_end_time: t0() + Duration::seconds(offset),
            ..binding(address, LeaseState::Committed)
        };
        repository
            .create_ia(&ia(key(b"C1", IaType::NonTemporary, 1), vec![
                with_valid_end("2001:db8::1", 10),
                with_valid_end("2001:db8::2", 5),
                with_valid_end("2001:db8::3", 20),
                with_valid_end("2001:db8::4", 30),
            ]))
            .unwrap();
        repository
            .create_ia(&ia(key(b"C1", IaType::Temporary, 1), vec![with_valid_end(
                "2001:db8::5",
                1,
            )]))
            .unwrap();
        repository
            .create_ia(&ia(key(b"C1", IaType::PrefixDelegation, 1), vec![IaBinding {
                preferred_end_time: t0(),
                valid_end_time: t0() + Duration::seconds(2),
                ..prefix("2001:db8:100::", 56, LeaseState::Committed)
            }]))
            .unwrap();

        clock.advance(Duration::seconds(30));
        let expired: Vec<_> = repository
            .find_expired_ia_addresses(IaType::NonTemporary)
            .unwrap()
            .into_iter()
            .map(|b| b.address)
            .collect();
        assert_eq!(
            expired,
            vec![addr("2001:db8::2"), addr("2001:db8::1"), addr("2001:db8::3")],
            "{name}: valid end equal to now has not expired yet"
        );

        let temporary = repository
            .find_expired_ia_addresses(IaType::Temporary)
            .unwrap();
        assert_eq!(temporary.len(), 1, "{name}");

        let prefixes = repository.find_expired_ia_prefixes().unwrap();
        assert_eq!(prefixes.len(), 1, "{name}");
        assert!(prefixes[0].is_prefix(), "{name}");
    }
}

#[test]
fn reconcile_without_ranges_deletes_nothing() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        repository
            .create_ia(&ia(k.clone(), vec![
                binding("2001:db8::1", LeaseState::Committed),
                binding("2001:db9::1", LeaseState::Committed),
            ]))
            .unwrap();

        assert_eq!(repository.reconcile_ia_addresses(&[]).unwrap(), 0, "{name}");
        assert_eq!(repository.find_ia(&k).unwrap().unwrap().bindings.len(), 2, "{name}");
    }
}

#[test]
fn reconcile_keeps_only_leases_in_range() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        let inside = ["2001:db8::10", "2001:db8::1f", "2001:db8::20"];
        let outside = ["2001:db8::f", "2001:db8::21", "2001:db9::15", "::1"];
        let bindings = inside
            .iter()
            .chain(&outside)
            .map(|a| binding(a, LeaseState::Committed))
            .collect();
        repository.create_ia(&ia(k.clone(), bindings)).unwrap();

        let range = AddressRange::new(addr("2001:db8::10"), addr("2001:db8::20")).unwrap();
        assert_eq!(
            repository.reconcile_ia_addresses(&[range]).unwrap(),
            outside.len(),
            "{name}"
        );

        let kept: Vec<_> = repository
            .find_ia(&k)
            .unwrap()
            .unwrap()
            .bindings
            .iter()
            .map(|b| b.address)
            .collect();
        assert_eq!(kept, inside.map(addr).to_vec(), "{name}");
    }
}

#[test]
fn reconcile_with_several_ranges() {
    for (name, repository, _) in repositories() {
        let k = key(b"C1", IaType::NonTemporary, 1);
        repository
            .create_ia(&ia(k.clone(), vec![
                binding("2001:db8:1::1", LeaseState::Committed),
                binding("2001:db8:2::1", LeaseState::Committed),
                binding("2001:db8:3::1", LeaseState::Committed),
            ]))
            .unwrap();

        let ranges = [
            AddressRange::from("2001:db8:1::/64".parse::<ipnet::Ipv6Net>().unwrap()),
            AddressRange::from("2001:db8:3::/64".parse::<ipnet::Ipv6Net>().unwrap()),
        ];
        assert_eq!(repository.reconcile_ia_addresses(&ranges).unwrap(), 1, "{name}");
        assert_eq!(
            repository.find_existing_ips(Ipv6Addr::UNSPECIFIED, Ipv6Addr::from(u128::MAX)).unwrap(),
            vec![addr("2001:db8:1::1"), addr("2001:db8:3::1")],
            "{name}"
        );
    }
}

fn committed_row(address: Ipv6Addr) -> LeaseRow {
    let nanos = t0().timestamp_nanos_opt().unwrap();
    LeaseRow {
        address: address.octets().to_vec(),
        client_id: b"C1".to_vec(),
        ia_type: 0,
        ia_id: 1,
        prefix_len: None,
        state: 2,
        start_time: nanos,
        preferred_end_time: nanos,
        valid_end_time: nanos,
        ia_options: None,
        binding_options: None,
    }
}

#[test]
fn malformed_rows_fail_the_read() {
    let store = Arc::new(MemoryLeaseStore::new());
    let repository = LeaseRepository::new(store.clone());
    store.insert_raw(committed_row(addr("2001:db8::1"))).unwrap();
    store
        .insert_raw(LeaseRow {
            binding_options: Some(vec![0, 23, 0, 8, b'd']),
            ..committed_row(addr("2001:db8::2"))
        })
        .unwrap();

    assert_matches!(
        repository.find_ia(&key(b"C1", IaType::NonTemporary, 1)),
        Err(LeaseStoreError::StoreOperationFailed(StoreError::MalformedRow(_)))
    );
    assert!(
        repository
            .find_ia_by_address(addr("2001:db8::1"), false)
            .unwrap()
            .is_some()
    );

    store
        .insert_raw(LeaseRow {
            address: vec![10, 0, 0, 1],
            ..committed_row(addr("2001:db8::3"))
        })
        .unwrap();
    assert_matches!(
        repository.find_existing_ips(Ipv6Addr::UNSPECIFIED, Ipv6Addr::from(u128::MAX)),
        Err(LeaseStoreError::StoreOperationFailed(StoreError::MalformedRow(_)))
    );
}

#[test]
fn malformed_sqlite_rows_fail_the_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leases.db");
    drop(SqliteLeaseStore::open(&path).unwrap());

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "INSERT INTO dhcp_lease (address, client_id, ia_type, ia_id, prefix_len, state, \
         start_time, preferred_end_time, valid_end_time, ia_options, binding_options) \
         VALUES (?1, ?2, 0, 1, NULL, ?3, 0, 0, 0, NULL, NULL)",
        rusqlite::params![addr("2001:db8::1").octets().to_vec(), b"C1".to_vec(), 9],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO dhcp_lease (address, client_id, ia_type, ia_id, prefix_len, state, \
         start_time, preferred_end_time, valid_end_time, ia_options, binding_options) \
         VALUES (?1, ?2, 0, 2, NULL, ?3, 0, 0, 0, NULL, NULL)",
        rusqlite::params![addr("2001:db9::1").octets().to_vec(), b"C1".to_vec(), 300],
    )
    .unwrap();
    drop(conn);

    let repository = LeaseRepository::new(SqliteLeaseStore::open(&path).unwrap());
    assert_matches!(
        repository.find_ia_by_address(addr("2001:db8::1"), true),
        Err(LeaseStoreError::StoreOperationFailed(StoreError::MalformedRow(_)))
    );
    assert_matches!(
        repository.find_ia_by_address(addr("2001:db9::1"), false),
        Err(LeaseStoreError::StoreOperationFailed(StoreError::MalformedRow(_)))
    );
    assert_eq!(
        repository
            .find_existing_ips(addr("2001:db8::"), addr("2001:db8::1"))
            .unwrap(),
        vec![addr("2001:db8::1")]
    );
    repository
        .delete_binding(&binding("2001:db8::1", LeaseState::Released))
        .unwrap();
    assert!(
        repository
            .find_existing_ips(addr("2001:db8::"), addr("2001:db8::1"))
            .unwrap()
            .is_empty()
    );
}
