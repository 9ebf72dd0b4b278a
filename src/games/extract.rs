//! Extraction of game moves and admin commands from transactions
//!
//! Only name registrations and updates matter:
//! - `p/<player>` names carry moves in the `g` object of their value,
//! - `g/<game>` names carry admin commands for that game in `cmd`.
//!
//! Extraction is a pure function of the transaction, the set of games asked
//! for and the change policy.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use crate::chain::{Amount, Block, OutPoint, OutputKind, Transaction};
use crate::crypto::Hash;
use super::{GameId, NameValue};

/// Name namespace for player moves
pub const PLAYER_PREFIX: &str = "p/";

/// Name namespace for game admin commands; also the burn label prefix
pub const GAME_PREFIX: &str = "g/";

/// One move of a player for one game
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub txid: Hash,
    /// Transaction id without signature data
    pub btxid: Hash,
    pub game_id: GameId,
    /// Player name without the `p/` prefix
    pub name: String,
    pub value: Value,
    /// Every input of the transaction, whichever game is asking
    pub inputs: Vec<OutPoint>,
    pub out: BTreeMap<String, Amount>,
    pub burnt: Amount,
}

/// One admin command for a game
#[derive(Debug, Clone, PartialEq)]
pub struct AdminCommand {
    pub txid: Hash,
    pub game_id: GameId,
    pub command: Value,
}

/// Game data extracted from one transaction
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionGameData {
    pub moves: Vec<Move>,
    pub admin: Vec<AdminCommand>,
}

/// Moves and commands of one block for one game, in block order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BlockGameData {
    pub moves: Vec<Move>,
    pub admin: Vec<AdminCommand>,
}

/// How change outputs are recognized in a move's `out` map.
///
/// Telling change apart from a real payment is a heuristic at best; the
/// default keeps every destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChangePolicy {
    #[default]
    IncludeAll,
    /// Drop outputs paying to any of these addresses
    ExcludeAddresses(HashSet<String>),
}

impl ChangePolicy {
    fn is_change(&self, address: &str) -> bool {
        match self {
            ChangePolicy::IncludeAll => false,
            ChangePolicy::ExcludeAddresses(addresses) => addresses.contains(address),
        }
    }
}

/// Turns transactions and blocks into per-game moves and admin commands
#[derive(Debug, Clone, Default)]
pub struct MoveExtractor {
    change_policy: ChangePolicy,
}

impl MoveExtractor {
    pub fn new(change_policy: ChangePolicy) -> Self {
        Self { change_policy }
    }

    /// Game data of a single transaction, restricted to `games`
    pub fn extract_transaction(
        &self,
        tx: &Transaction,
        games: &BTreeSet<GameId>,
    ) -> TransactionGameData {
        let mut data = TransactionGameData::default();

        let Some(op) = tx.name_operation() else {
            return data;
        };

        let (is_player, suffix) = if let Some(player) = op.name.strip_prefix(PLAYER_PREFIX) {
            (true, player)
        } else if let Some(game) = op.name.strip_prefix(GAME_PREFIX) {
            (false, game)
        } else {
            return data;
        };

        let txid = tx.txid();
        let value = match NameValue::parse(&op.value) {
            Ok(value) => value,
            Err(e) => {
                debug!(%txid, name = %op.name, error = %e, "ignoring invalid name value");
                return data;
            }
        };

        if is_player {
            let relevant: Vec<(GameId, Value)> = value
                .moves
                .into_iter()
                .filter(|(game, _)| games.contains(game))
                .collect();
            if relevant.is_empty() {
                return data;
            }

            let btxid = tx.btxid();
            let out = self.out_amounts(tx);
            for (game_id, mv) in relevant {
                data.moves.push(Move {
                    txid,
                    btxid,
                    burnt: burnt_for(tx, &game_id),
                    game_id,
                    name: suffix.to_string(),
                    value: mv,
                    inputs: tx.inputs.clone(),
                    out: out.clone(),
                });
            }
        } else if games.contains(suffix) {
            if let Some(command) = value.command {
                data.admin.push(AdminCommand {
                    txid,
                    game_id: suffix.to_string(),
                    command,
                });
            }
        }

        data
    }

    /// Game data of a whole block. Every game in `games` gets an entry,
    /// even when the block has nothing for it.
    pub fn extract_block(
        &self,
        block: &Block,
        games: &BTreeSet<GameId>,
    ) -> BTreeMap<GameId, BlockGameData> {
        let mut result: BTreeMap<GameId, BlockGameData> = games
            .iter()
            .map(|g| (g.clone(), BlockGameData::default()))
            .collect();

        for tx in &block.transactions {
            let data = self.extract_transaction(tx, games);
            for mv in data.moves {
                if let Some(entry) = result.get_mut(&mv.game_id) {
                    entry.moves.push(mv);
                }
            }
            for cmd in data.admin {
                if let Some(entry) = result.get_mut(&cmd.game_id) {
                    entry.admin.push(cmd);
                }
            }
        }

        result
    }

    fn out_amounts(&self, tx: &Transaction) -> BTreeMap<String, Amount> {
        let mut out = BTreeMap::new();
        for output in &tx.outputs {
            if let OutputKind::Address(address) = &output.kind {
                if self.change_policy.is_change(address) {
                    continue;
                }
                *out.entry(address.clone()).or_insert(0) += output.value;
            }
        }
        out
    }
}

/// Sum of burns labelled exactly `g/<game>`
fn burnt_for(tx: &Transaction, game: &str) -> Amount {
    tx.outputs
        .iter()
        .filter(|output| match &output.kind {
            OutputKind::Burn(Some(label)) => label
                .strip_prefix(GAME_PREFIX)
                .map_or(false, |g| g == game),
            _ => false,
        })
        .map(|output| output.value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{NameOpKind, NameOperation, TxOutput, COIN};
    use crate::crypto::hash_bytes;
    use serde_json::json;

    fn games(ids: &[&str]) -> BTreeSet<GameId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn name_tx(name: &str, value: &str, extra: Vec<TxOutput>) -> Transaction {
        let mut outputs = vec![TxOutput::name(
            NameOperation {
                kind: NameOpKind::Update,
                name: name.into(),
                value: value.into(),
            },
            COIN / 100,
        )];
        outputs.extend(extra);
        Transaction::new(
            vec![OutPoint::new(hash_bytes(name.as_bytes()), 0), OutPoint::new(hash_bytes(b"fee"), 3)],
            outputs,
        )
        .with_witness(vec![7])
    }

    #[test]
    fn test_currency_transaction_ignored() {
        let tx = Transaction::new(vec![], vec![TxOutput::to_address("addr", COIN)]);
        let data = MoveExtractor::default().extract_transaction(&tx, &games(&["a"]));
        assert!(data.moves.is_empty());
        assert!(data.admin.is_empty());
    }

    #[test]
    fn test_move_fields() {
        let tx = name_tx(
            "p/x",
            r#"{"g":{"a":"move","untracked":1}}"#,
            vec![
                TxOutput::to_address("addr1", 12_345_678),
                TxOutput::to_address("addr2", 142_424_242),
                TxOutput::to_address("addr1", COIN),
                TxOutput { value: COIN / 2, kind: OutputKind::NonStandard },
                TxOutput::to_address("addr1", COIN / 100),
            ],
        );

        let data = MoveExtractor::default().extract_transaction(&tx, &games(&["a", "b"]));
        assert_eq!(data.moves.len(), 1);

        let mv = &data.moves[0];
        assert_eq!(mv.txid, tx.txid());
        assert_eq!(mv.btxid, tx.btxid());
        assert_ne!(mv.txid, mv.btxid);
        assert_eq!(mv.game_id, "a");
        assert_eq!(mv.name, "x");
        assert_eq!(mv.value, json!("move"));
        assert_eq!(mv.inputs, tx.inputs);
        assert_eq!(mv.out.len(), 2);
        assert_eq!(mv.out["addr1"], 112_345_678);
        assert_eq!(mv.out["addr2"], 142_424_242);
        assert_eq!(mv.burnt, 0);
    }

    #[test]
    fn test_burns_per_game() {
        let tx = name_tx(
            "p/x",
            r#"{"g":{"a":"foo","b":"bar"}}"#,
            vec![
                TxOutput::to_address("addr", COIN),
                TxOutput::burn(Some("g/a"), 2 * COIN),
                TxOutput::burn(Some("g/b"), 3 * COIN),
                TxOutput::burn(Some("ignored"), COIN / 2),
                TxOutput::burn(None, COIN),
                TxOutput::burn(Some("g/ab"), COIN),
            ],
        );

        let data = MoveExtractor::default().extract_transaction(&tx, &games(&["a", "b"]));
        let burnt: BTreeMap<_, _> = data.moves.iter().map(|m| (m.game_id.as_str(), m.burnt)).collect();
        assert_eq!(burnt["a"], 2 * COIN);
        assert_eq!(burnt["b"], 3 * COIN);

        for mv in &data.moves {
            assert_eq!(mv.out.len(), 1);
            assert_eq!(mv.inputs.len(), 2);
        }
    }

    #[test]
    fn test_change_policy() {
        let tx = name_tx(
            "p/x",
            r#"{"g":{"a":1}}"#,
            vec![TxOutput::to_address("pay", COIN), TxOutput::to_address("change", 5 * COIN)],
        );

        let all = MoveExtractor::default().extract_transaction(&tx, &games(&["a"]));
        assert_eq!(all.moves[0].out.len(), 2);

        let policy = ChangePolicy::ExcludeAddresses(HashSet::from(["change".to_string()]));
        let filtered = MoveExtractor::new(policy).extract_transaction(&tx, &games(&["a"]));
        assert_eq!(filtered.moves[0].out.len(), 1);
        assert!(filtered.moves[0].out.contains_key("pay"));
    }

    #[test]
    fn test_admin_commands() {
        let tx = name_tx("g/a", r#"{"cmd":{"reset":true}}"#, vec![]);

        let data = MoveExtractor::default().extract_transaction(&tx, &games(&["a"]));
        assert!(data.moves.is_empty());
        assert_eq!(data.admin.len(), 1);
        assert_eq!(data.admin[0].command, json!({"reset": true}));
        assert_eq!(data.admin[0].game_id, "a");

        let untracked = MoveExtractor::default().extract_transaction(&tx, &games(&["b"]));
        assert!(untracked.admin.is_empty());

        let no_cmd = name_tx("g/a", r#"{"other":1}"#, vec![]);
        assert!(MoveExtractor::default()
            .extract_transaction(&no_cmd, &games(&["a"]))
            .admin
            .is_empty());
    }

    #[test]
    fn test_other_namespaces_and_invalid_values() {
        let extractor = MoveExtractor::default();
        let set = games(&["a"]);

        let other = name_tx("d/domain", r#"{"g":{"a":1}}"#, vec![]);
        assert!(extractor.extract_transaction(&other, &set).moves.is_empty());

        let invalid = name_tx("p/x", "not json", vec![]);
        assert!(extractor.extract_transaction(&invalid, &set).moves.is_empty());
    }

    #[test]
    fn test_block_keeps_order_and_empty_entries() {
        let tx1 = name_tx("p/x", r#"{"g":{"b":{"test":true}}}"#, vec![]);
        let tx2 = name_tx("p/y", r#"{"g":{"b":6.25}}"#, vec![]);
        let bad = name_tx("p/z", "{", vec![]);
        let cmd1 = name_tx("g/b", r#"{"cmd":1}"#, vec![]);
        let cmd2 = name_tx("g/b", r#"{"cmd":2}"#, vec![]);
        let block = Block::new(
            Hash::zero(),
            1,
            0,
            vec![
                Transaction::coinbase(COIN, "miner", 1),
                tx1.clone(),
                cmd1.clone(),
                bad,
                tx2.clone(),
                cmd2.clone(),
            ],
        );

        let data = MoveExtractor::default().extract_block(&block, &games(&["a", "b"]));
        assert_eq!(data.len(), 2);
        assert!(data["a"].moves.is_empty());
        assert!(data["a"].admin.is_empty());

        let b = &data["b"];
        let txids: Vec<Hash> = b.moves.iter().map(|m| m.txid).collect();
        assert_eq!(txids, vec![tx1.txid(), tx2.txid()]);
        let cmds: Vec<Value> = b.admin.iter().map(|c| c.command.clone()).collect();
        assert_eq!(cmds, vec![json!(1), json!(2)]);
    }
}
