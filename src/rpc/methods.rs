//! RPC method implementations
//!
//! Each method corresponds to a JSON-RPC call. Parameters are positional
//! unless noted otherwise.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use crate::chain::{Amount, ChainError, ChainView, EngineError, MemoryChain, NameOpKind, COIN};
use crate::crypto::Hash;
use crate::games::{block_info_json, TrackedGames};
use crate::notify::{CatchUpEngine, CatchUpError, GameNotifications};

/// Generic failure
pub const RPC_MISC_ERROR: i32 = -1;
pub const RPC_TYPE_ERROR: i32 = -3;
/// Unknown block, name or key
pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
pub const RPC_INVALID_PARAMETER: i32 = -8;
/// Block known but its data is unavailable
pub const RPC_DATABASE_ERROR: i32 = -20;
pub const RPC_VERIFY_ERROR: i32 = -25;
pub const RPC_METHOD_NOT_FOUND: i32 = -32601;
pub const RPC_INVALID_PARAMS: i32 = -32602;

/// Upper bound for a single `generate` call
const MAX_GENERATE: u64 = 10_000;

/// JSON-RPC 2.0 request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

type RpcResult = Result<Value, JsonRpcError>;

/// Bind addresses of the notification endpoints, for reporting
#[derive(Debug, Clone, Default)]
pub struct NotifyEndpoints {
    pub blocks: Option<String>,
    pub pending: Option<String>,
}

/// RPC handler state
pub struct RpcState {
    pub chain: Arc<Mutex<MemoryChain>>,
    pub games: Arc<TrackedGames>,
    pub notifications: Arc<GameNotifications>,
    pub catch_up: CatchUpEngine,
    pub endpoints: NotifyEndpoints,
}

/// Process a JSON-RPC request and return a response
pub fn handle_request(state: &RpcState, request: JsonRpcRequest) -> JsonRpcResponse {
    debug!(method = %request.method, "rpc call");
    let params = request.params;
    let result = match request.method.as_str() {
        "trackedgames" => tracked_games(state, params),
        "game_sendupdates" => game_send_updates(state, params),
        "getnotificationinfo" => get_notification_info(state),
        "getblockcount" => get_block_count(state),
        "getbestblockhash" => get_best_block_hash(state),
        "getblockhash" => get_block_hash(state, params),
        "getblock" => get_block(state, params),
        "generate" => generate(state, params),
        "invalidateblock" => invalidate_block(state, params),
        "reconsiderblock" => reconsider_block(state, params),
        "name_register" => name_operation(state, NameOpKind::Register, params),
        "name_update" => name_operation(state, NameOpKind::Update, params),
        _ => Err(JsonRpcError::new(
            RPC_METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(error) => JsonRpcResponse::error(request.id, error),
    }
}

fn positional(params: Option<Value>) -> Vec<Value> {
    match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(arr)) => arr,
        Some(other) => vec![other],
    }
}

fn string_param(value: Option<&Value>, what: &str) -> Result<String, JsonRpcError> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(JsonRpcError::new(
            RPC_INVALID_PARAMS,
            format!("Invalid params: expected {} string", what),
        )),
    }
}

fn hash_param(value: Option<&Value>, what: &str) -> Result<Hash, JsonRpcError> {
    let raw = string_param(value, what)?;
    Hash::from_hex(&raw).map_err(|_| {
        JsonRpcError::new(
            RPC_INVALID_PARAMETER,
            format!("{} must be a 64-character hexadecimal string", what),
        )
    })
}

/// Optional hash; JSON null counts as absent
fn optional_hash(value: Option<&Value>, what: &str) -> Result<Option<Hash>, JsonRpcError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        some => hash_param(some, what).map(Some),
    }
}

fn amount_param(value: &Value) -> Result<Amount, JsonRpcError> {
    let coins = value
        .as_f64()
        .ok_or_else(|| JsonRpcError::new(RPC_TYPE_ERROR, "Amount is not a number"))?;
    if !coins.is_finite() || coins < 0.0 {
        return Err(JsonRpcError::new(RPC_TYPE_ERROR, "Invalid amount"));
    }
    Ok((coins * COIN as f64).round() as Amount)
}

fn amount_map(value: Option<&Value>, what: &str) -> Result<Vec<(String, Amount)>, JsonRpcError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, amount)| Ok((key.clone(), amount_param(amount)?)))
            .collect(),
        Some(_) => Err(JsonRpcError::new(
            RPC_TYPE_ERROR,
            format!("{} must be an object", what),
        )),
    }
}

fn engine_error(e: EngineError) -> JsonRpcError {
    match e {
        EngineError::Chain(ChainError::UnknownBlock(_)) => {
            JsonRpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found")
        }
        EngineError::GenesisInvalidation(_) => JsonRpcError::new(RPC_INVALID_PARAMETER, e.to_string()),
        EngineError::NameExists(_) | EngineError::NameNotFound(_) => {
            JsonRpcError::new(RPC_VERIFY_ERROR, e.to_string())
        }
        other => JsonRpcError::new(RPC_MISC_ERROR, other.to_string()),
    }
}

fn catch_up_error(e: CatchUpError) -> JsonRpcError {
    let code = match &e {
        CatchUpError::Disabled => RPC_MISC_ERROR,
        CatchUpError::InvalidGameId(_) | CatchUpError::MissingFromBlock => RPC_INVALID_PARAMETER,
        CatchUpError::FromBlockNotFound | CatchUpError::ToBlockNotFound => RPC_INVALID_ADDRESS_OR_KEY,
        CatchUpError::FromBlockNoData
        | CatchUpError::ToBlockNoData
        | CatchUpError::Chain(ChainError::MissingBlockData(_)) => RPC_DATABASE_ERROR,
        CatchUpError::Chain(_) => RPC_MISC_ERROR,
    };
    JsonRpcError::new(code, e.to_string())
}

/// `trackedgames ["add"|"remove", gameid]`; without arguments, just lists
fn tracked_games(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    if !args.is_empty() {
        let action = string_param(args.first(), "action")?;
        let game = string_param(args.get(1), "gameid")?;
        let result = match action.as_str() {
            "add" => state.games.add(&game).map(|_| ()),
            "remove" => {
                state.games.remove(&game);
                Ok(())
            }
            _ => {
                return Err(JsonRpcError::new(
                    RPC_INVALID_PARAMETER,
                    format!("Unknown action: {}", action),
                ))
            }
        };
        result.map_err(|e| JsonRpcError::new(RPC_INVALID_PARAMETER, e.to_string()))?;
    }

    Ok(json!(state.games.snapshot()))
}

/// `game_sendupdates [gameid, fromblock?, toblock?]` or the same as an object
fn game_send_updates(state: &RpcState, params: Option<Value>) -> RpcResult {
    let (game, from, to) = match params {
        Some(Value::Object(obj)) => (
            string_param(obj.get("gameid"), "gameid")?,
            optional_hash(obj.get("fromblock"), "fromblock")?,
            optional_hash(obj.get("toblock"), "toblock")?,
        ),
        other => {
            let args = positional(other);
            (
                string_param(args.first(), "gameid")?,
                optional_hash(args.get(1), "fromblock")?,
                optional_hash(args.get(2), "toblock")?,
            )
        }
    };

    let chain = state.chain.lock();
    let result = state
        .catch_up
        .send_updates(&*chain, state.notifications.blocks(), &game, from, to)
        .map_err(catch_up_error)?;

    serde_json::to_value(result).map_err(|e| JsonRpcError::new(RPC_MISC_ERROR, e.to_string()))
}

fn get_notification_info(state: &RpcState) -> RpcResult {
    let blocks = state.notifications.blocks();
    Ok(json!({
        "pubgameblocks": state.endpoints.blocks,
        "pubgamepending": state.endpoints.pending,
        "trackedgames": state.games.snapshot(),
        "consistent": state.notifications.is_consistent(),
        "cachedblocks": blocks.map_or(0, |b| b.cached_blocks()),
        "maxgameblockattaches": state.catch_up.max_attaches(),
    }))
}

fn get_block_count(state: &RpcState) -> RpcResult {
    Ok(json!(state.chain.lock().height()))
}

fn get_best_block_hash(state: &RpcState) -> RpcResult {
    Ok(json!(state.chain.lock().tip().to_hex()))
}

fn get_block_hash(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let height = args
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| JsonRpcError::new(RPC_INVALID_PARAMS, "Invalid params: expected height"))?;

    match state.chain.lock().block_at_height(height) {
        Some(hash) => Ok(json!(hash.to_hex())),
        None => Err(JsonRpcError::new(
            RPC_INVALID_PARAMETER,
            format!("Block height {} out of range", height),
        )),
    }
}

fn get_block(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let hash = hash_param(args.first(), "blockhash")?;

    let chain = state.chain.lock();
    let not_found = || JsonRpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found");
    let info = chain.block_info(&hash).ok_or_else(not_found)?;
    let block = chain.block(&hash).ok_or_else(not_found)?;

    let mut result = block_info_json(&info);
    if let Value::Object(obj) = &mut result {
        let txids: Vec<String> = block.transactions.iter().map(|tx| tx.txid().to_hex()).collect();
        let confirmations = if chain.is_active(&hash) {
            (chain.height() - info.height + 1) as i64
        } else {
            -1
        };
        obj.insert("tx".into(), json!(txids));
        obj.insert("confirmations".into(), json!(confirmations));
    }
    Ok(result)
}

fn generate(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let count = match args.first() {
        None => 1,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| JsonRpcError::new(RPC_INVALID_PARAMS, "Invalid params: expected block count"))?,
    };
    if count > MAX_GENERATE {
        return Err(JsonRpcError::new(
            RPC_INVALID_PARAMETER,
            format!("Cannot generate more than {} blocks at once", MAX_GENERATE),
        ));
    }

    let mut chain = state.chain.lock();
    let mut hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let hash = chain.mine_block().map_err(engine_error)?;
        hashes.push(json!(hash.to_hex()));
    }
    info!(count, height = chain.height(), "generated blocks");
    Ok(Value::Array(hashes))
}

fn invalidate_block(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let hash = hash_param(args.first(), "blockhash")?;
    state.chain.lock().invalidate_block(&hash).map_err(engine_error)?;
    Ok(Value::Null)
}

fn reconsider_block(state: &RpcState, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let hash = hash_param(args.first(), "blockhash")?;
    state.chain.lock().reconsider_block(&hash).map_err(engine_error)?;
    Ok(Value::Null)
}

/// `name_register` / `name_update [name, value, {sendCoins, burn}]`
fn name_operation(state: &RpcState, kind: NameOpKind, params: Option<Value>) -> RpcResult {
    let args = positional(params);
    let name = string_param(args.first(), "name")?;
    let value = string_param(args.get(1), "value")?;

    let empty = Map::new();
    let options = match args.get(2) {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(JsonRpcError::new(RPC_TYPE_ERROR, "options must be an object")),
    };
    let payments = amount_map(options.get("sendCoins"), "sendCoins")?;
    let burns = amount_map(options.get("burn"), "burn")?;

    let txid = state
        .chain
        .lock()
        .send_name_operation(kind, &name, &value, &payments, &burns)
        .map_err(engine_error)?;
    Ok(json!(txid.to_hex()))
}
