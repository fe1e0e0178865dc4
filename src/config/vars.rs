//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}`: substitute, error if unset
//! - `${VAR:-default}`: default when unset or empty
//! - `${VAR-default}`: default only when unset
//! - `$$`: a literal `$`
//!
//! Credentials are normally injected this way, e.g.
//! `aws_secret_access_key: ${AWS_SECRET_ACCESS_KEY}`.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ ([A-Za-z_][A-Za-z0-9_]*) (?: (:?-) ([^}]*) )? \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found; all are collected so they can be reported together.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate against the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate using `lookup` to resolve variable names.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
                return whole.to_string();
            };
            let empty_means_unset = caps.get(2).is_some_and(|m| m.as_str() == ":-");
            let default = caps.get(3).map(|m| m.as_str());

            match (lookup(name), default) {
                (Some(value), _) if value.contains(['\n', '\r']) => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    whole.to_string()
                }
                (Some(value), Some(default)) if value.is_empty() && empty_means_unset => {
                    default.to_string()
                }
                (Some(value), _) => value,
                (None, Some(default)) => default.to_string(),
                (None, None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(input: &str, vars: &[(&str, &str)]) -> InterpolationResult {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        interpolate_with(input, |name| env.get(name).cloned())
    }

    #[test]
    fn test_plain_and_braced_forms() {
        let result = run("a: $BUCKET, b: ${BUCKET}", &[("BUCKET", "raw")]);
        assert!(result.is_ok());
        assert_eq!(result.text, "a: raw, b: raw");
    }

    #[test]
    fn test_all_missing_variables_are_reported() {
        let result = run("$KEY_ID / ${SECRET}", &[]);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("KEY_ID"));
        assert!(result.errors[1].contains("SECRET"));
        assert_eq!(result.text, "$KEY_ID / ${SECRET}");
    }

    #[test]
    fn test_colon_default_applies_to_empty_values() {
        let result = run("${REGION:-us-west-2}", &[("REGION", "")]);
        assert_eq!(result.text, "us-west-2");
    }

    #[test]
    fn test_dash_default_keeps_empty_values() {
        let result = run("[${REGION-us-west-2}]", &[("REGION", "")]);
        assert_eq!(result.text, "[]");
    }

    #[test]
    fn test_default_used_when_unset() {
        let result = run("${REGION-us-west-2} ${ZONE:-a}", &[]);
        assert!(result.is_ok());
        assert_eq!(result.text, "us-west-2 a");
    }

    #[test]
    fn test_set_value_wins_over_default() {
        let result = run("${REGION:-us-west-2}", &[("REGION", "eu-central-1")]);
        assert_eq!(result.text, "eu-central-1");
    }

    #[test]
    fn test_dollar_escape() {
        let result = run("cost: $$5", &[]);
        assert!(result.is_ok());
        assert_eq!(result.text, "cost: $5");
    }

    #[test]
    fn test_values_with_line_breaks_are_rejected() {
        let result = run("$A $B", &[("A", "x\ny"), ("B", "x\ry")]);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.contains("newlines")));
    }

    #[test]
    fn test_credentials_block() {
        let yaml = r#"
input:
  path: "s3a://${RAW_BUCKET}/"
credentials:
  aws_access_key_id: ${AWS_ACCESS_KEY_ID}
  aws_secret_access_key: ${AWS_SECRET_ACCESS_KEY}
"#;
        let result = run(
            yaml,
            &[
                ("RAW_BUCKET", "udacity-dend"),
                ("AWS_ACCESS_KEY_ID", "AKIA123"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
            ],
        );
        assert!(result.is_ok());
        assert!(result.text.contains("s3a://udacity-dend/"));
        assert!(result.text.contains("aws_access_key_id: AKIA123"));
        assert!(result.text.contains("aws_secret_access_key: secret"));
    }
}
