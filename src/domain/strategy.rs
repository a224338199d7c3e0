//! Strategy definition: the buy/sell gates applied to each asset.

use crate::domain::condition::Condition;
use crate::domain::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub description: String,
    pub buy_condition: Condition,
    pub sell_condition: Option<Condition>,
}

impl Strategy {
    /// Build from expression strings. An empty or missing sell expression
    /// leaves `sell_condition` unset.
    pub fn from_expressions(
        name: &str,
        buy: &str,
        sell: Option<&str>,
    ) -> Result<Self, ParseError> {
        let buy_condition = Condition::parse(buy)?;
        let sell_condition = match sell.map(str::trim) {
            Some(s) if !s.is_empty() => Some(Condition::parse(s)?),
            _ => None,
        };
        Ok(Self {
            name: name.to_string(),
            description: String::new(),
            buy_condition,
            sell_condition,
        })
    }
}
