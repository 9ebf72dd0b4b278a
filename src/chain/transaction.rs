//! Transaction model as seen by the notification layer
//!
//! Script interpretation happens in the engine; what arrives here is the
//! already-classified view of every output (destination address, burn,
//! name operation or something non-standard).

use serde::{Deserialize, Serialize};
use crate::constants::DECIMAL_PLACES;
use crate::crypto::{Hash, hash_bytes};

/// Amount in base units
pub type Amount = i64;

/// Base units per coin
pub const COIN: Amount = 10i64.pow(DECIMAL_PLACES as u32);

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint spent by coinbase transactions
    pub fn null() -> Self {
        Self { txid: Hash::zero(), vout: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Kind of name operation carried by an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameOpKind {
    Register,
    Update,
}

/// A decoded name operation: the name and its raw (UTF-8 JSON) value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameOperation {
    pub kind: NameOpKind,
    pub name: String,
    pub value: String,
}

/// Classified output script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Payment to an ordinary address
    Address(String),
    /// Provably unspendable output, optionally labelled
    Burn(Option<String>),
    /// Name output
    Name(NameOperation),
    /// Anything we cannot attribute to a destination
    NonStandard,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub kind: OutputKind,
}

impl TxOutput {
    pub fn to_address(address: impl Into<String>, value: Amount) -> Self {
        Self { value, kind: OutputKind::Address(address.into()) }
    }

    pub fn burn(label: Option<&str>, value: Amount) -> Self {
        Self { value, kind: OutputKind::Burn(label.map(str::to_string)) }
    }

    pub fn name(op: NameOperation, value: Amount) -> Self {
        Self { value, kind: OutputKind::Name(op) }
    }
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    /// Signature data; part of the txid but not of the bare txid
    pub witness: Vec<u8>,
}

impl Transaction {
    pub fn new(inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
            witness: Vec::new(),
        }
    }

    /// Coinbase paying `reward` to `address`; `height` keeps ids unique
    pub fn coinbase(reward: Amount, address: &str, height: u64) -> Self {
        Self {
            version: 1,
            inputs: vec![OutPoint::null()],
            outputs: vec![TxOutput::to_address(address, reward)],
            lock_time: height as u32,
            witness: height.to_le_bytes().to_vec(),
        }
    }

    pub fn with_witness(mut self, witness: Vec<u8>) -> Self {
        self.witness = witness;
        self
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_null()
    }

    /// Full transaction id, covering the witness
    pub fn txid(&self) -> Hash {
        let mut bytes = self.to_bytes_bare();
        bytes.extend_from_slice(&(self.witness.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.witness);
        hash_bytes(&bytes)
    }

    /// Bare transaction id, which ignores signature data
    pub fn btxid(&self) -> Hash {
        hash_bytes(&self.to_bytes_bare())
    }

    /// The first name operation among the outputs, if any
    pub fn name_operation(&self) -> Option<&NameOperation> {
        self.outputs.iter().find_map(|out| match &out.kind {
            OutputKind::Name(op) => Some(op),
            _ => None,
        })
    }

    fn to_bytes_bare(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.txid.0);
            bytes.extend_from_slice(&input.vout.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            match &output.kind {
                OutputKind::Address(addr) => {
                    bytes.push(0);
                    push_str(&mut bytes, addr);
                }
                OutputKind::Burn(label) => {
                    bytes.push(1);
                    push_str(&mut bytes, label.as_deref().unwrap_or(""));
                }
                OutputKind::Name(op) => {
                    bytes.push(2);
                    bytes.push(match op.kind {
                        NameOpKind::Register => 0,
                        NameOpKind::Update => 1,
                    });
                    push_str(&mut bytes, &op.name);
                    push_str(&mut bytes, &op.value);
                }
                OutputKind::NonStandard => bytes.push(3),
            }
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());

        bytes
    }
}

fn push_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}
