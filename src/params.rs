//! Named query parameters.
//!
//! A parameter is a token (e.g. `!CLASS!`) that appears in layer SQL, plus a
//! SQL fragment containing at most one `?` marker. Binding swaps the marker for
//! the next positional placeholder (`$1`, `$2`, ...) and collects the value so
//! user input never ends up spliced into the query text.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tokens::{is_token, TokenTable};
use crate::value::Value;

/// Marks where a parameter's value goes in its SQL fragment.
pub const PARAM_MARKER: char = '?';

#[derive(Clone, Debug, PartialEq)]
pub struct QueryParameter {
    pub token: String,
    pub sql: String,
    pub value: Value,
}

impl QueryParameter {
    pub fn new(token: &str, sql: &str, value: impl Into<Value>) -> QueryParameter {
        QueryParameter {
            token: token.to_owned(),
            sql: sql.to_owned(),
            value: value.into(),
        }
    }
}

/// Parameters for one query, keyed by token. The ordered map keeps placeholder
/// numbering stable between calls.
pub type QueryParameters = BTreeMap<String, QueryParameter>;

/// Collects parameters into a [`QueryParameters`] map.
pub fn query_parameters<I>(params: I) -> QueryParameters
where
    I: IntoIterator<Item = QueryParameter>,
{
    params
        .into_iter()
        .map(|param| (param.token.clone(), param))
        .collect()
}

/// Replaces every parameter token found in `sql` and appends the bound values
/// to `args`.
///
/// Tokens are visited in lexicographic order. A token that does not occur in
/// `sql` is skipped and does not use up a placeholder. On error, `args` is left
/// as it was.
pub fn bind_parameters(
    params: Option<&QueryParameters>,
    sql: &str,
    args: &mut Vec<Value>,
) -> Result<String> {
    let params = match params {
        Some(params) => params,
        None => return Ok(sql.to_owned()),
    };

    let mut sql = sql.to_owned();
    let mut bound = Vec::new();
    for (token, param) in params {
        if !sql.contains(token.as_str()) {
            continue;
        }

        let fragment = match param.sql.matches(PARAM_MARKER).count() {
            0 => param.sql.clone(),
            1 => {
                bound.push(param.value.clone());
                let placeholder = format!("${}", args.len() + bound.len());
                param.sql.replacen(PARAM_MARKER, &placeholder, 1)
            }
            count => {
                return Err(Error::ParameterBinding {
                    token: token.clone(),
                    reason: format!(
                        "SQL fragment {:?} has {} markers, expected at most one",
                        param.sql, count
                    ),
                })
            }
        };

        sql = sql.replace(token.as_str(), &fragment);
    }

    args.extend(bound);
    Ok(sql)
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    String,
    Bool,
}

impl ParamType {
    /// Parses a raw request value into a typed value.
    pub fn parse(&self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            ParamType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|e| format!("{:?} is not an integer: {}", raw, e)),
            ParamType::Float => raw
                .trim()
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|e| format!("{:?} is not a number: {}", raw, e)),
            ParamType::String => Ok(Value::String(raw.to_owned())),
            ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("{:?} is not a boolean", raw)),
            },
        }
    }
}

fn default_param_sql() -> String {
    PARAM_MARKER.to_string()
}

/// A parameter a provider accepts from tile requests.
#[derive(Clone, Deserialize, Debug)]
pub struct ParamConfig {
    /// Name of the request argument.
    pub name: String,
    pub token: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_param_sql")]
    pub sql: String,
    pub default_value: Option<String>,
    pub default_sql: Option<String>,
}

impl ParamConfig {
    pub fn validate(&self) -> Result<()> {
        let error = |reason: String| Error::ParameterBinding {
            token: self.token.clone(),
            reason,
        };

        if !is_token(&self.token) || self.token != self.token.to_ascii_uppercase() {
            return Err(error(String::from("tokens must look like !UPPERCASE_NAME!")));
        }
        if TokenTable::builtin().contains(&self.token) {
            return Err(error(String::from("token is reserved for a built-in")));
        }
        if self.sql.matches(PARAM_MARKER).count() > 1 {
            return Err(error(format!(
                "SQL fragment {:?} has more than one marker",
                self.sql
            )));
        }
        if self.default_value.is_some() && self.default_sql.is_some() {
            return Err(error(String::from(
                "only one of default_value and default_sql may be set",
            )));
        }
        if let Some(default) = &self.default_value {
            self.param_type.parse(default).map_err(error)?;
        }

        Ok(())
    }

    /// Builds the parameter for one request. `raw` is the request's value for
    /// this parameter, if it sent one.
    pub fn to_query_parameter(&self, raw: Option<&str>) -> Result<QueryParameter> {
        let parse = |raw: &str| {
            self.param_type
                .parse(raw)
                .map_err(|reason| Error::ParameterBinding {
                    token: self.token.clone(),
                    reason,
                })
        };

        let (sql, value) = match (raw, &self.default_value, &self.default_sql) {
            (Some(raw), _, _) => (self.sql.clone(), parse(raw)?),
            (None, Some(default), _) => (self.sql.clone(), parse(default)?),
            (None, None, Some(default_sql)) => (default_sql.clone(), Value::Null),
            (None, None, None) => (String::new(), Value::Null),
        };

        Ok(QueryParameter {
            token: self.token.clone(),
            sql,
            value,
        })
    }
}

/// Resolves configured parameters against a request's raw arguments.
pub fn resolve_parameters(
    configs: &[ParamConfig],
    request: &HashMap<String, String>,
) -> Result<QueryParameters> {
    configs
        .iter()
        .map(|config| {
            config
                .to_query_parameter(request.get(&config.name).map(String::as_str))
                .map(|param| (param.token.clone(), param))
        })
        .collect()
}
