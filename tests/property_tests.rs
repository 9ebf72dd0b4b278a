//! Property-based tests for the notification core
//!
//! These tests verify invariants hold under random chains, reorgs and name
//! values.

use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use xaya_gamenotify::chain::{
    last_common_ancestor, path_to_ancestor, ChainView, MemoryChain, NameOpKind, NameOperation,
    OutPoint, Transaction, TxOutput, COIN,
};
use xaya_gamenotify::crypto::{hash_bytes, Hash};
use xaya_gamenotify::games::{ChangePolicy, MoveExtractor, NameValue};
use xaya_gamenotify::notify::{CatchUpEngine, GameBlocksNotifier, Publisher, TopicKind};
use std::sync::Arc;

/// Chain of `main` blocks with a side branch of `side` blocks forking at
/// height `fork`; returns the chain and the side branch tip
fn forked_chain(main: usize, fork: usize, side: usize) -> (MemoryChain, Hash) {
    let mut chain = MemoryChain::new_regtest();
    let mut hashes = Vec::new();
    for _ in 0..main {
        hashes.push(chain.mine_block().unwrap());
    }

    let fork = fork.min(main);
    if fork < main {
        chain.invalidate_block(&hashes[fork]).unwrap();
    }
    let mut side_tip = chain.tip();
    for _ in 0..side {
        side_tip = chain.mine_block().unwrap();
    }
    if fork < main {
        chain.reconsider_block(&hashes[fork]).unwrap();
    }
    (chain, side_tip)
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    /// The ancestor lies on both paths and the paths join it
    #[test]
    fn prop_common_ancestor_is_shared(
        main in 1usize..12,
        fork in 0usize..12,
        side in 0usize..12,
    ) {
        let (chain, side_tip) = forked_chain(main, fork, side);
        let a = chain.block_info(&chain.tip()).unwrap();
        let b = chain.block_info(&side_tip).unwrap();

        let ancestor = last_common_ancestor(&chain, &a, &b).unwrap();
        let path_a = path_to_ancestor(&chain, &a, &ancestor).unwrap();
        let path_b = path_to_ancestor(&chain, &b, &ancestor).unwrap();

        prop_assert_eq!(path_a.len() as u64, a.height - ancestor.height);
        prop_assert_eq!(path_b.len() as u64, b.height - ancestor.height);

        // The paths share no block
        let set_a: HashSet<Hash> = path_a.iter().map(|i| i.hash).collect();
        prop_assert!(path_b.iter().all(|i| !set_a.contains(&i.hash)));

        // Last step of each path is a child of the ancestor
        for path in [&path_a, &path_b] {
            if let Some(last) = path.last() {
                prop_assert_eq!(last.parent, Some(ancestor.hash));
            }
        }
    }

    /// Ancestor search is symmetric
    #[test]
    fn prop_common_ancestor_symmetric(
        main in 1usize..10,
        fork in 0usize..10,
        side in 0usize..10,
    ) {
        let (chain, side_tip) = forked_chain(main, fork, side);
        let a = chain.block_info(&chain.tip()).unwrap();
        let b = chain.block_info(&side_tip).unwrap();

        prop_assert_eq!(
            last_common_ancestor(&chain, &a, &b).unwrap(),
            last_common_ancestor(&chain, &b, &a).unwrap()
        );
    }

    /// Catch-up steps never exceed the cap and always add up to the path
    #[test]
    fn prop_catch_up_respects_cap(
        main in 1usize..15,
        fork in 0usize..15,
        side in 0usize..15,
        cap in 1u64..8,
    ) {
        let (chain, side_tip) = forked_chain(main, fork, side);
        let notifier = GameBlocksNotifier::new(
            Arc::new(Publisher::new("blocks", 10_000)),
            MoveExtractor::default(),
            10,
        );
        let a = chain.block_info(&side_tip).unwrap();
        let b = chain.block_info(&chain.tip()).unwrap();
        let ancestor = last_common_ancestor(&chain, &a, &b).unwrap();

        let result = CatchUpEngine::new(cap)
            .send_updates(&chain, Some(&notifier), "g", Some(side_tip), None)
            .unwrap();

        prop_assert_eq!(result.steps.detach, a.height - ancestor.height);
        prop_assert_eq!(result.steps.attach, (b.height - ancestor.height).min(cap));
        let reached = chain.block_info(&result.toblock).unwrap();
        prop_assert_eq!(reached.height, ancestor.height + result.steps.attach);
    }

    /// Sequence numbers of one topic count up from zero without gaps
    #[test]
    fn prop_sequences_count_up(topics in proptest::collection::vec(0u8..4, 1..60)) {
        let publisher = Publisher::new("seq", 1);
        let mut expected = [0u32; 4];
        for t in topics {
            let n = publisher.publish(TopicKind::BlockAttach.topic(&t.to_string()), String::new());
            prop_assert_eq!(n.sequence, expected[t as usize]);
            expected[t as usize] += 1;
        }
    }

    /// Repeated `g` objects merge with later keys winning
    #[test]
    fn prop_repeated_moves_merge(
        first in proptest::collection::btree_map("[a-e]", 0i64..100, 0..5),
        second in proptest::collection::btree_map("[a-e]", 100i64..200, 0..5),
    ) {
        let raw = format!(
            r#"{{"g":{},"g":{}}}"#,
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        let value = NameValue::parse(&raw).unwrap();

        let games: BTreeSet<&String> = first.keys().chain(second.keys()).collect();
        prop_assert_eq!(value.moves.len(), games.len());
        for (game, mv) in &value.moves {
            let expected = second.get(game).or_else(|| first.get(game)).copied();
            prop_assert_eq!(mv.as_i64(), expected);
        }
    }

    /// `out` sums all address outputs, whatever the order
    #[test]
    fn prop_out_sums_per_address(
        outputs in proptest::collection::vec((0usize..3, 1i64..1_000_000), 0..10),
    ) {
        let addresses = ["a1", "a2", "a3"];
        let mut outs = vec![TxOutput::name(
            NameOperation {
                kind: NameOpKind::Update,
                name: "p/x".into(),
                value: r#"{"g":{"g1":1}}"#.into(),
            },
            COIN / 100,
        )];
        for (idx, amount) in &outputs {
            outs.push(TxOutput::to_address(addresses[*idx], *amount));
        }
        let tx = Transaction::new(vec![OutPoint::new(hash_bytes(b"in"), 0)], outs);

        let games = BTreeSet::from(["g1".to_string()]);
        let data = MoveExtractor::default().extract_transaction(&tx, &games);
        prop_assert_eq!(data.moves.len(), 1);

        let total: i64 = outputs.iter().map(|(_, amount)| amount).sum();
        prop_assert_eq!(data.moves[0].out.values().sum::<i64>(), total);

        let excluded = MoveExtractor::new(ChangePolicy::ExcludeAddresses(HashSet::from(["a1".to_string()])))
            .extract_transaction(&tx, &games);
        prop_assert!(!excluded.moves[0].out.contains_key("a1"));
    }
}

// ============================================================================
// ADVERSARIAL TESTS
// ============================================================================

/// Test: Hostile name values
///
/// Values that are not objects, or carry junk next to `g`, never produce
/// moves for games they do not name.
#[test]
fn test_hostile_name_values() {
    let games = BTreeSet::from(["a".to_string()]);
    let extractor = MoveExtractor::default();

    for value in [
        "",
        "null",
        "[1,2]",
        r#"{"g":null}"#,
        r#"{"g":"a"}"#,
        r#"{"g":{"b":1}}"#,
        r#"{"G":{"a":1}}"#,
        r#"{"g":{"a":1}"#,
    ] {
        let op = NameOperation {
            kind: NameOpKind::Update,
            name: "p/x".into(),
            value: value.into(),
        };
        let tx = Transaction::new(vec![], vec![TxOutput::name(op, COIN / 100)]);
        assert!(extractor.extract_transaction(&tx, &games).moves.is_empty(), "{}", value);
    }
}

/// Test: Deep reorg beyond the attach cache
///
/// Detaches past the cache depth fall back to recomputation and still match
/// the attach payloads when the tracked set is unchanged.
#[test]
fn test_reorg_deeper_than_cache() {
    use xaya_gamenotify::games::TrackedGames;
    use xaya_gamenotify::notify::{GameNotifications, NotifierSettings};

    let publisher = Arc::new(Publisher::new("blocks", 10_000));
    let notifications = Arc::new(GameNotifications::new(
        Arc::new(TrackedGames::new(["a"])),
        MoveExtractor::default(),
        NotifierSettings {
            blocks: Some(publisher.clone()),
            pending: None,
            attach_cache_depth: 3,
        },
    ));
    let mut sub = publisher.subscribe([TopicKind::BlockAttach.topic("a"), TopicKind::BlockDetach.topic("a")]);

    let mut chain = MemoryChain::new_regtest();
    chain.add_listener(notifications.clone());
    let mut hashes = Vec::new();
    for i in 0..8 {
        chain
            .send_name_operation(NameOpKind::Register, &format!("p/{}", i), r#"{"g":{"a":true}}"#, &[], &[])
            .unwrap();
        hashes.push(chain.mine_block().unwrap());
    }
    chain.invalidate_block(&hashes[0]).unwrap();

    let got = sub.drain();
    let (attaches, detaches): (Vec<_>, Vec<_>) = got.iter().partition(|n| n.topic.starts_with("game-block-attach"));
    assert_eq!(attaches.len(), 8);
    assert_eq!(detaches.len(), 8);
    for (attach, detach) in attaches.iter().zip(detaches.iter().rev()) {
        assert_eq!(attach.body, detach.body);
    }
    assert!(notifications.is_consistent());
}
