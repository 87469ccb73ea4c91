//! `tether exec`: run one command on the endpoint.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use tether_exec::framing::MARKER_PREFIX;

use super::Session;

/// Arguments for `tether exec`.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command line, passed to the remote shell as written.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    pub async fn run(self, session: &Session) -> Result<ExitCode> {
        let line = self.command.join(" ");
        let result = session
            .executor
            .execute(&line, &[])
            .await
            .with_context(|| format!("`{line}` did not complete"))?;

        print!("{}", visible_output(&result.output));
        let code = result.exit_code.unwrap_or(1);
        Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
    }
}

/// Output without the framing echo and completion marker lines.
fn visible_output(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.contains(MARKER_PREFIX))
        .map(|line| format!("{line}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_lines_are_hidden() {
        let output = "( ls ); rc=$?; echo \"__TETHER_DONE_ab__:exit=$rc\"\n\
                      a.txt\nb.txt\n__TETHER_DONE_ab__:exit=0\n";
        assert_eq!(visible_output(output), "a.txt\nb.txt\n");
    }
}
