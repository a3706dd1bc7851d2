//! General state test fixtures.
//!
//! ```json
//! {
//!   "add11": {
//!     "env": { "currentCoinbase": "0x2adc...", "currentNumber": "0x01", ... },
//!     "pre": { "0x0f57...": { "balance": "0x0de0b6b3a7640000", "code": "0x6001600101600055", "nonce": "0x00", "storage": {} } },
//!     "transaction": { "to": "0x0f57...", "data": ["0x"], "gasLimit": ["0x061a80"], ... },
//!     "post": { "Cancun": [ ... ] }
//!   }
//! }
//! ```
//!
//! Only the parts the harness looks at are typed. Unknown top-level keys are
//! carried through untouched, so a fixture survives a round trip through
//! [`StateTest`].

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr as _;

use alloy_primitives::{Address, Bytes, U256};
use anyhow::{bail, Context as _};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trace_diff::CallContext;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTest {
    pub env: Map<String, Value>,
    pub pre: BTreeMap<Address, PreAccount>,
    pub transaction: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAccount {
    pub balance: U256,
    pub code: Bytes,
    pub nonce: U256,
    #[serde(default)]
    pub storage: BTreeMap<U256, U256>,
}

impl StateTest {
    /// The context the transaction starts executing in: its recipient for a
    /// message call. For a contract creation it is the address derived from
    /// the sender and nonce when the fixture names the sender, and
    /// [`CallContext::PendingCreate`] otherwise.
    pub fn entry_context(&self) -> CallContext {
        let to = self
            .transaction
            .get("to")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if to.is_empty() {
            return self
                .created_address()
                .map_or(CallContext::PendingCreate, CallContext::Known);
        }
        match to.parse::<Address>() {
            Ok(address) => CallContext::Known(address),
            Err(e) => {
                warn!(to, "unparseable transaction recipient, treating as creation: {e}");
                CallContext::PendingCreate
            }
        }
    }

    fn created_address(&self) -> Option<Address> {
        let sender: Address = self.transaction.get("sender")?.as_str()?.parse().ok()?;
        let nonce = match self.transaction.get("nonce") {
            Some(Value::String(s)) => U256::from_str(s).ok()?,
            Some(Value::Number(n)) => U256::from(n.as_u64()?),
            _ => self.pre.get(&sender)?.nonce,
        };
        Some(sender.create(u64::try_from(nonce).ok()?))
    }
}

/// Reads a fixture from `path`.
///
/// Accepts a bare fixture as well as the usual `{ "<test name>": fixture }`
/// wrapper. Clients run every test in a file, so a wrapper holding more than
/// one test is rejected.
pub fn load(path: &Path) -> anyhow::Result<StateTest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read fixture {}", path.display()))?;
    parse(&text).with_context(|| format!("invalid fixture {}", path.display()))
}

pub fn parse(text: &str) -> anyhow::Result<StateTest> {
    let value: Value = serde_json::from_str(text)?;
    let fixture = match value {
        Value::Object(map) if is_bare(&map) => Value::Object(map),
        Value::Object(map) if map.len() > 1 => bail!(
            "fixture file contains {} tests ({}), expected one",
            map.len(),
            map.keys().join(", ")
        ),
        Value::Object(map) => match map.into_iter().next() {
            Some((name, fixture)) => {
                return serde_path_to_error::deserialize(fixture)
                    .with_context(|| format!("in test `{name}`"));
            }
            None => bail!("fixture file contains no tests"),
        },
        _ => bail!("fixture is not a JSON object"),
    };
    Ok(serde_path_to_error::deserialize(fixture)?)
}

fn is_bare(map: &Map<String, Value>) -> bool {
    map.contains_key("pre") && map.contains_key("transaction")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CONTRACT: &str = "0x0f572e5295c57f15886f9b263e2f6d2d6c7b5ec6";
    const SENDER: &str = "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b";

    fn fixture(to: &str) -> Value {
        json!({
            "_info": { "comment": "kept" },
            "env": { "currentNumber": "0x01", "currentGasLimit": "0x05f5e100" },
            "pre": {
                CONTRACT: {
                    "balance": "0x0de0b6b3a7640000",
                    "code": "0x600160010160005500",
                    "nonce": "0x00",
                    "storage": { "0x00": "0x01" }
                },
                SENDER: {
                    "balance": "0x0de0b6b3a7640000",
                    "code": "0x",
                    "nonce": "0x01",
                    "storage": {}
                }
            },
            "transaction": {
                "to": to,
                "sender": SENDER,
                "nonce": "0x01",
                "data": ["0x"],
                "gasLimit": ["0x061a80"],
                "value": ["0x00"]
            },
            "post": { "Cancun": [] }
        })
    }

    #[test]
    fn wrapped_and_bare() {
        let bare = fixture(CONTRACT);
        let wrapped = json!({ "add11": bare.clone() });
        let a = parse(&bare.to_string()).unwrap();
        let b = parse(&wrapped.to_string()).unwrap();
        assert_eq!(a, b);

        let account = &a.pre[&CONTRACT.parse::<Address>().unwrap()];
        assert_eq!(account.code.len(), 9);
        assert_eq!(account.storage[&U256::ZERO], U256::from(1));
        assert_eq!(a.extra["_info"]["comment"], "kept");
        assert_eq!(parse(&serde_json::to_string(&a).unwrap()).unwrap(), a);
    }

    #[test]
    fn entry_contexts() {
        let call = parse(&fixture(CONTRACT).to_string()).unwrap();
        assert_eq!(
            call.entry_context(),
            CallContext::Known(CONTRACT.parse().unwrap())
        );

        let create = parse(&fixture("").to_string()).unwrap();
        let sender: Address = SENDER.parse().unwrap();
        assert_eq!(create.entry_context(), CallContext::Known(sender.create(1)));

        let mut anonymous = create;
        anonymous.transaction.remove("sender");
        assert_eq!(anonymous.entry_context(), CallContext::PendingCreate);
    }

    #[test]
    fn errors_name_the_offending_field() {
        let mut broken = fixture(CONTRACT);
        broken["pre"][CONTRACT]["balance"] = json!("lots");
        let err = parse(&json!({ "t": broken }).to_string()).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("in test `t`"), "{chain}");
        assert!(chain.contains("balance"), "{chain}");

        let two = json!({ "a": fixture(CONTRACT), "b": fixture(CONTRACT) });
        let err = parse(&two.to_string()).unwrap_err();
        assert!(err.to_string().contains("2 tests (a, b)"), "{err}");

        assert!(parse("[]").is_err());
        assert!(parse("{}").is_err());
        assert!(parse("{ not json").is_err());
    }
}
