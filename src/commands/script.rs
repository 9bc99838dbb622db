use crate::output::UserOutput;
use dbfleet::engine::ScriptSource;
use dbfleet::process::CommandOutput;
use dbfleet::{EngineKind, Orchestrator};

pub fn run_url(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    database: Option<&str>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.status(&orchestrator.connection_string(name, engine, database)?);
    Ok(())
}

/// Run SQL and relay the tool's output. A failing script propagates its exit code.
pub async fn run_script(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    script: ScriptSource,
    database: Option<&str>,
    out: &dyn UserOutput,
) -> anyhow::Result<i32> {
    let output = orchestrator
        .run_script(name, engine, &script, database)
        .await?;
    Ok(relay(&output, out))
}

/// Print the tool's streams; stderr of a failed run is an error.
fn relay(output: &CommandOutput, out: &dyn UserOutput) -> i32 {
    if !output.stdout.is_empty() {
        out.status(output.stdout.trim_end());
    }
    let code = output.code_or_signal();
    if !output.stderr.is_empty() {
        if code == 0 {
            out.warning(output.stderr.trim_end());
        } else {
            out.error(output.stderr.trim_end());
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingOutput;

    #[test]
    fn test_failed_script_reports_stderr_as_error() {
        let out = RecordingOutput::default();
        let code = relay(
            &CommandOutput {
                code: Some(3),
                stdout: String::new(),
                stderr: "ERROR:  relation \"t\" does not exist\n".to_string(),
            },
            &out,
        );
        assert_eq!(code, 3);
        assert_eq!(
            out.lines(),
            vec!["error: ERROR:  relation \"t\" does not exist".to_string()]
        );
    }

    #[test]
    fn test_successful_script_notices_are_warnings() {
        let out = RecordingOutput::default();
        let code = relay(
            &CommandOutput {
                code: Some(0),
                stdout: "1\n".to_string(),
                stderr: "NOTICE:  table created".to_string(),
            },
            &out,
        );
        assert_eq!(code, 0);
        assert_eq!(
            out.lines(),
            vec![
                "status: 1".to_string(),
                "warning: NOTICE:  table created".to_string(),
            ]
        );
    }
}
