//! Condition expression parser.
//!
//! Grammar:
//!
//! ```text
//! condition  := ε | comparison ( AND comparison )*
//! comparison := identifier op number
//! op         := "<" | "<=" | ">" | ">=" | "=="
//! AND        := "AND" (any case) | "&&"
//! ```
//!
//! Identifiers are canonicalized with the factor-name normalization, so
//! `holderCount >= 10` and `holders >= 10` parse to the same comparison.

use crate::domain::condition::{CompareOp, Comparison, Condition};
use crate::domain::error::ParseError;
use crate::domain::factor::normalize_factor_name;
use std::str::FromStr;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| is_ident_char(*c))
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn consume_and(&mut self) -> bool {
        let remaining = self.remaining();
        if remaining.starts_with("&&") {
            self.pos += 2;
            return true;
        }
        let is_and = remaining
            .get(..3)
            .is_some_and(|w| w.eq_ignore_ascii_case("and"))
            && !remaining[3..].chars().next().is_some_and(is_ident_char);
        if is_and {
            self.pos += 3;
        }
        is_and
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let expected = |word: String| ParseError {
            message: format!("expected factor name, found '{word}'"),
            position: start,
        };
        // Digit-leading names such as `5m_volume` are allowed; a bare
        // numeric literal is not.
        if !self.peek().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
            return Err(expected(self.peek_word()));
        }
        while self.peek().is_some_and(is_ident_char) {
            self.advance();
        }
        let word = &self.input[start..self.pos];
        if word.starts_with(|ch: char| ch.is_ascii_digit()) && word.parse::<f64>().is_ok() {
            return Err(expected(word.to_string()));
        }
        Ok(normalize_factor_name(word))
    }

    fn parse_operator(&mut self) -> Result<CompareOp, ParseError> {
        self.skip_whitespace();
        let remaining = self.remaining();
        let (op, len) = if remaining.starts_with("<=") {
            (CompareOp::Le, 2)
        } else if remaining.starts_with(">=") {
            (CompareOp::Ge, 2)
        } else if remaining.starts_with("==") {
            (CompareOp::Eq, 2)
        } else if remaining.starts_with('<') {
            (CompareOp::Lt, 1)
        } else if remaining.starts_with('>') {
            (CompareOp::Gt, 1)
        } else {
            return Err(ParseError {
                message: format!(
                    "expected comparison operator (<, <=, >, >=, ==), found '{}'",
                    self.peek_word()
                ),
                position: self.pos,
            });
        };
        self.pos += len;
        Ok(op)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if matches!(self.peek(), Some('-') | Some('+')) {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: format!("expected number, found '{}'", self.peek_word()),
                position: start,
            });
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('-') | Some('+')) {
                self.advance();
            }
            let mut exp_digits = 0;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                exp_digits += 1;
                self.advance();
            }
            if exp_digits == 0 {
                self.pos = mark;
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_comparison(&mut self) -> Result<Comparison, ParseError> {
        let factor = self.parse_identifier()?;
        let op = self.parse_operator()?;
        let value = self.parse_number()?;
        Ok(Comparison { factor, op, value })
    }

    fn parse(&mut self) -> Result<Condition, ParseError> {
        self.skip_whitespace();
        if self.at_end() {
            return Ok(Condition::always());
        }

        let mut comparisons = vec![self.parse_comparison()?];
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            if !self.consume_and() {
                return Err(ParseError {
                    message: format!(
                        "expected 'AND' or end of input, found '{}'",
                        self.peek_word()
                    ),
                    position: self.pos,
                });
            }
            comparisons.push(self.parse_comparison()?);
        }

        Ok(Condition { comparisons })
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.'
}

pub fn parse(input: &str) -> Result<Condition, ParseError> {
    Parser::new(input).parse()
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        parse(input)
    }
}

impl FromStr for Condition {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_comparison() {
        let c = parse("x > 5").unwrap();
        assert_eq!(c.comparisons.len(), 1);
        assert_eq!(c.comparisons[0].factor, "x");
        assert_eq!(c.comparisons[0].op, CompareOp::Gt);
        assert_eq!(c.comparisons[0].value, 5.0);
    }

    #[test]
    fn parse_conjunction() {
        let c = parse("x > 5 AND y < 10").unwrap();
        assert_eq!(c.comparisons.len(), 2);
        assert_eq!(c.comparisons[1].factor, "y");
        assert_eq!(c.comparisons[1].op, CompareOp::Lt);
    }

    #[test]
    fn parse_all_operators() {
        for (input, expected) in [
            ("a < 1", CompareOp::Lt),
            ("a <= 1", CompareOp::Le),
            ("a > 1", CompareOp::Gt),
            ("a >= 1", CompareOp::Ge),
            ("a == 1", CompareOp::Eq),
        ] {
            assert_eq!(parse(input).unwrap().comparisons[0].op, expected);
        }
    }

    #[test]
    fn parse_without_spaces() {
        let c = parse("a>=1&&b<-2.5").unwrap();
        assert_eq!(c.comparisons.len(), 2);
        assert_eq!(c.comparisons[1].value, -2.5);
    }

    #[test]
    fn and_keyword_is_case_insensitive() {
        assert_eq!(parse("a > 1 and b > 2").unwrap().comparisons.len(), 2);
        assert_eq!(parse("a > 1 And b > 2").unwrap().comparisons.len(), 2);
    }

    #[test]
    fn identifiers_are_normalized() {
        let c = parse("holderCount >= 30 AND trendStrengthScore > 40").unwrap();
        assert_eq!(c.comparisons[0].factor, "holders");
        assert_eq!(c.comparisons[1].factor, "trend_strength_score");
    }

    #[test]
    fn identifier_starting_with_and_is_not_keyword() {
        let c = parse("a > 1 AND android > 2").unwrap();
        assert_eq!(c.comparisons[1].factor, "android");
        let err = parse("a > 1 android > 2").unwrap_err();
        assert!(err.message.contains("expected 'AND'"));
    }

    #[test]
    fn digit_leading_identifiers() {
        let c = parse("5m_volume > 100 AND 24hChange >= 2.5").unwrap();
        assert_eq!(c.comparisons[0].factor, "5m_volume");
        assert_eq!(c.comparisons[0].value, 100.0);
        assert_eq!(c.comparisons[1].factor, "24h_change");
    }

    #[test]
    fn numbers_with_exponent_and_sign() {
        let c = parse("eps < 1e-8 AND big > +2.5E3 AND z == .5").unwrap();
        assert_eq!(c.comparisons[0].value, 1e-8);
        assert_eq!(c.comparisons[1].value, 2500.0);
        assert_eq!(c.comparisons[2].value, 0.5);
    }

    #[test]
    fn empty_and_whitespace_are_always() {
        assert!(parse("").unwrap().is_always());
        assert!(parse("   ").unwrap().is_always());
    }

    #[test]
    fn error_missing_number() {
        let err = parse("x > ").unwrap_err();
        assert!(err.message.contains("expected number"));
        assert_eq!(err.position, 4);
    }

    #[test]
    fn error_missing_operator() {
        let err = parse("x 5").unwrap_err();
        assert!(err.message.contains("expected comparison operator"));
        assert_eq!(err.position, 2);
    }

    #[test]
    fn error_single_equals() {
        let err = parse("x = 5").unwrap_err();
        assert!(err.message.contains("expected comparison operator"));
    }

    #[test]
    fn error_dangling_and() {
        let err = parse("x > 1 AND").unwrap_err();
        assert!(err.message.contains("expected factor name"));
    }

    #[test]
    fn error_or_is_not_supported() {
        let err = parse("x > 1 OR y > 2").unwrap_err();
        assert!(err.message.contains("expected 'AND'"));
        assert_eq!(err.position, 6);
    }

    #[test]
    fn error_literal_on_left() {
        let err = parse("5 < x").unwrap_err();
        assert!(err.message.contains("expected factor name"));
        assert_eq!(err.position, 0);

        let err = parse("a > 1 AND 2.5 < x").unwrap_err();
        assert!(err.message.contains("found '2.5'"));
        assert_eq!(err.position, 10);
    }

    #[test]
    fn from_str_and_display_roundtrip() {
        let c: Condition = "liquidity >= 1000 AND age < 60".parse().unwrap();
        let again: Condition = c.to_string().parse().unwrap();
        assert_eq!(c, again);
    }

    #[test]
    fn error_display_with_context() {
        let input = "x > 1 AND y ~ 2";
        let err = parse(input).unwrap_err();
        let ctx = err.display_with_context(input);
        assert!(ctx.contains('^'));
        assert!(ctx.contains("position 12"));
    }
}
