//! Domain error types.

/// A parse error with position information for condition expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for trendgate.
#[derive(Debug, thiserror::Error)]
pub enum TrendgateError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("invalid {kind} row {row} for {asset}: {reason}")]
    DataRow {
        asset: String,
        kind: &'static str,
        row: usize,
        reason: String,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    ConditionParse(#[from] ParseError),

    #[error("no data for {asset}")]
    NoData { asset: String },

    #[error("no assets to evaluate")]
    NoAssets,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrendgateError {
    /// Process exit status for this error category.
    pub fn exit_status(&self) -> u8 {
        match self {
            TrendgateError::Io(_) | TrendgateError::Csv(_) => 1,
            TrendgateError::ConfigParse { .. }
            | TrendgateError::ConfigMissing { .. }
            | TrendgateError::ConfigInvalid { .. } => 2,
            TrendgateError::DataSource { .. } | TrendgateError::DataRow { .. } => 3,
            TrendgateError::ConditionParse(_) => 4,
            TrendgateError::NoData { .. } | TrendgateError::NoAssets => 5,
        }
    }
}

impl From<&TrendgateError> for std::process::ExitCode {
    fn from(err: &TrendgateError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_context_points_at_position() {
        let err = ParseError {
            message: "expected number".into(),
            position: 4,
        };
        let ctx = err.display_with_context("x > ?");
        let lines: Vec<&str> = ctx.lines().collect();
        assert_eq!(lines[0], "x > ?");
        assert_eq!(lines[1], "    ^");
        assert!(lines[2].contains("position 4"));
    }

    #[test]
    fn exit_codes_by_category() {
        let cases = [
            (
                TrendgateError::ConfigMissing {
                    section: "engine".into(),
                    key: "window_size".into(),
                },
                2,
            ),
            (
                TrendgateError::DataSource {
                    reason: "gone".into(),
                },
                3,
            ),
            (
                TrendgateError::ConditionParse(ParseError {
                    message: "bad".into(),
                    position: 0,
                }),
                4,
            ),
            (TrendgateError::NoAssets, 5),
        ];
        for (err, expected) in cases {
            assert_eq!(err.exit_status(), expected);
        }
    }

    #[test]
    fn data_row_message() {
        let err = TrendgateError::DataRow {
            asset: "ALPHA".into(),
            kind: "fill",
            row: 3,
            reason: "invalid direction 'hold'".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid fill row 3 for ALPHA: invalid direction 'hold'"
        );
    }
}
