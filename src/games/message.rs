//! JSON shapes of the game notifications
//!
//! Objects are built with `serde_json`'s default (sorted) map, so the same
//! inputs always serialize to the same bytes. Detach messages rely on that.

use serde_json::{json, Map, Value};
use crate::chain::{Amount, BlockInfo, COIN};
use super::{AdminCommand, BlockGameData, Move};

/// Amount as a decimal coin value
pub fn amount_value(amount: Amount) -> Value {
    json!(amount as f64 / COIN as f64)
}

/// A move as it appears in block and pending notifications
pub fn move_json(mv: &Move) -> Value {
    let inputs: Vec<Value> = mv
        .inputs
        .iter()
        .map(|input| json!({ "txid": input.txid.to_hex(), "vout": input.vout }))
        .collect();

    let out: Map<String, Value> = mv
        .out
        .iter()
        .map(|(address, amount)| (address.clone(), amount_value(*amount)))
        .collect();

    json!({
        "txid": mv.txid.to_hex(),
        "btxid": mv.btxid.to_hex(),
        "name": mv.name,
        "move": mv.value,
        "inputs": inputs,
        "out": out,
        "burnt": amount_value(mv.burnt),
    })
}

pub fn admin_json(cmd: &AdminCommand) -> Value {
    json!({
        "txid": cmd.txid.to_hex(),
        "cmd": cmd.command,
    })
}

/// Block metadata; genesis has no `parent`
pub fn block_info_json(info: &BlockInfo) -> Value {
    let mut block = json!({
        "hash": info.hash.to_hex(),
        "height": info.height,
        "timestamp": info.timestamp,
        "mediantime": info.median_time,
        "rngseed": info.rng_seed.to_hex(),
    });
    if let (Some(parent), Some(obj)) = (info.parent, block.as_object_mut()) {
        obj.insert("parent".into(), json!(parent.to_hex()));
    }
    block
}

/// Body of an attach or detach notification
pub fn block_message(info: &BlockInfo, data: &BlockGameData, reqtoken: Option<&str>) -> Value {
    let mut msg = json!({
        "block": block_info_json(info),
        "moves": data.moves.iter().map(move_json).collect::<Vec<_>>(),
        "admin": data.admin.iter().map(admin_json).collect::<Vec<_>>(),
    });
    if let (Some(token), Some(obj)) = (reqtoken, msg.as_object_mut()) {
        obj.insert("reqtoken".into(), json!(token));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::OutPoint;
    use crate::crypto::{hash_bytes, Hash};
    use std::collections::BTreeMap;

    fn info(parent: Option<Hash>) -> BlockInfo {
        BlockInfo {
            hash: hash_bytes(b"block"),
            parent,
            height: 7,
            timestamp: 1000,
            median_time: 995,
            rng_seed: hash_bytes(b"seed"),
        }
    }

    fn sample_move() -> Move {
        Move {
            txid: hash_bytes(b"tx"),
            btxid: hash_bytes(b"btx"),
            game_id: "a".into(),
            name: "x".into(),
            value: json!([42, false]),
            inputs: vec![OutPoint::new(hash_bytes(b"in"), 2)],
            out: BTreeMap::from([("addr".to_string(), 112_345_678)]),
            burnt: 2 * COIN,
        }
    }

    #[test]
    fn test_amounts_are_decimal_coins() {
        assert_eq!(amount_value(COIN), json!(1.0));
        assert_eq!(amount_value(112_345_678).as_f64(), Some(1.12345678));
        assert_eq!(amount_value(0), json!(0.0));
    }

    #[test]
    fn test_move_shape() {
        let value = move_json(&sample_move());
        assert_eq!(value["txid"], json!(hash_bytes(b"tx").to_hex()));
        assert_eq!(value["btxid"], json!(hash_bytes(b"btx").to_hex()));
        assert_eq!(value["name"], json!("x"));
        assert_eq!(value["move"], json!([42, false]));
        assert_eq!(value["inputs"][0]["vout"], json!(2));
        assert_eq!(value["out"]["addr"].as_f64(), Some(1.12345678));
        assert_eq!(value["burnt"], json!(2.0));
    }

    #[test]
    fn test_block_message_shape() {
        let parent = hash_bytes(b"parent");
        let data = BlockGameData {
            moves: vec![sample_move()],
            admin: vec![],
        };

        let msg = block_message(&info(Some(parent)), &data, None);
        assert_eq!(msg["block"]["parent"], json!(parent.to_hex()));
        assert_eq!(msg["block"]["height"], json!(7));
        assert_eq!(msg["block"]["mediantime"], json!(995));
        assert_eq!(msg["moves"].as_array().map(Vec::len), Some(1));
        assert_eq!(msg["admin"], json!([]));
        assert!(msg.get("reqtoken").is_none());

        let tagged = block_message(&info(None), &data, Some("token"));
        assert_eq!(tagged["reqtoken"], json!("token"));
        assert!(tagged["block"].get("parent").is_none());
    }

    #[test]
    fn test_serialization_is_stable() {
        let data = BlockGameData {
            moves: vec![sample_move()],
            admin: vec![],
        };
        let a = block_message(&info(None), &data, None).to_string();
        let b = block_message(&info(None), &data, None).to_string();
        assert_eq!(a, b);
    }
}
