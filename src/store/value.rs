use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use crate::StoreError;

/// A keyed value of the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

impl Value {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

pub(crate) fn wrong_type(
    key: &str,
    value: &Value,
) -> crate::Error {
    StoreError::WrongType {
        key: key.to_string(),
        found: value.kind(),
    }
    .into()
}

pub(crate) fn no_group(
    stream: &str,
    group: &str,
) -> crate::Error {
    StoreError::NoGroup {
        stream: stream.to_string(),
        group: group.to_string(),
    }
    .into()
}

/// Parses the stock counter read by the admission script.
pub(crate) fn parse_stock(
    stock_key: &str,
    raw: &str,
) -> crate::Result<i64> {
    raw.parse::<i64>().map_err(|_| {
        StoreError::Script {
            script: "seckill",
            reason: format!("stock at {stock_key} is not an integer: {raw}"),
        }
        .into()
    })
}
