//! k6 argument-line parsing
//!
//! Not every argument a user passes to the runners is valid for the
//! archive call the initializer makes, and one of them (`--out cloud`)
//! changes the whole mode of the run. This module splits the spec's
//! argument line accordingly.

use surge_common::{Error, Result};

/// The parts of the spec's argument line the operator cares about
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cli {
    /// Arguments safe to forward to `k6 archive`
    pub archive_args: String,
    /// Whether the run requests cloud output (`--out cloud`)
    pub has_cloud_out: bool,
}

/// Parse the spec's `arguments` line
///
/// Flags that only make sense at run time (`--linger`, `--out`,
/// `--log-output`, `--verbose`) are dropped from the archive arguments.
/// Positional tokens are rejected: the operator composes the k6
/// subcommand itself.
pub fn parse(arguments: &str) -> Result<Cli> {
    let tokens: Vec<&str> = arguments.split_whitespace().collect();
    let mut cli = Cli::default();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if !token.starts_with('-') {
            return Err(Error::configuration(format!(
                "unexpected argument `{token}`: only k6 flags are allowed in `arguments`"
            )));
        }

        let (flag, inline_value) = match token.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (token, None),
        };

        // values are everything until the next flag token
        let mut end = i + 1;
        while end < tokens.len() && !tokens[end].starts_with('-') {
            end += 1;
        }
        let values = &tokens[i + 1..end];

        match flag {
            "-o" | "--out" => {
                if inline_value == Some("cloud") || values.contains(&"cloud") {
                    cli.has_cloud_out = true;
                }
            }
            // run-time only flags, meaningless for `k6 archive`
            "-l" | "--linger" | "--no-usage-report" => {}
            // accepted by archive but would pollute `k6 inspect` JSON
            "-v" | "--verbose" => {}
            // log shipping is configured per runner, not archived
            "--log-output" => {}
            _ => {
                if !cli.archive_args.is_empty() {
                    cli.archive_args.push(' ');
                }
                cli.archive_args.push_str(token);
                for value in values {
                    cli.archive_args.push(' ');
                    cli.archive_args.push_str(value);
                }
            }
        }

        i = end;
    }

    Ok(cli)
}
