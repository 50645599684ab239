use anyhow::Result;
use serde_json::Value;

use crate::store::Predicate;

/// `--where FIELD OP VALUE` shared by the listing commands.
#[derive(Debug, Clone, clap::Args)]
pub struct WhereClause {
    #[arg(
        long = "where",
        num_args = 3,
        value_names = ["FIELD", "OP", "VALUE"],
        allow_hyphen_values = true,
        help = "Keep entries matching FIELD OP VALUE. OP is one of >=, >, <=, <, =. For example --where executablePath = /usr/bin/nvim"
    )]
    condition: Option<Vec<String>>,
}

impl WhereClause {
    pub fn predicate(&self) -> Result<Option<Predicate>> {
        let Some([field, operator, value]) = self.condition.as_deref() else {
            return Ok(None);
        };
        Ok(Some(Predicate::parse(
            field.as_str(),
            parse_value(value),
            operator,
        )?))
    }
}

/// Integers are passed as numbers, anything else as text.
fn parse_value(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}
