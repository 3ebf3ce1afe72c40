use crate::context::Context;
use crate::driver::{Driver, RunConfig};
use crate::render;
use anyhow::Result;
use std::collections::BTreeSet;

/// Handles the 'output' command - shows aggregated stack outputs
pub struct OutputCommand;

impl OutputCommand {
    /// Execute the output command
    ///
    /// With a name, prints the bare value for scripting; without, renders the
    /// full styled listing.
    pub fn execute(ctx: &Context, config: &RunConfig, name: Option<&str>) -> Result<i32> {
        let mut driver = Driver::new(ctx.clone(), config.clone());
        let result = Self::run(&mut driver, name);
        if result.is_err() {
            ctx.output
                .dimmed(&format!("Halted after phase: {}", driver.phase()));
        }
        result
    }

    fn run(driver: &mut Driver, name: Option<&str>) -> Result<i32> {
        let stack = driver.validate()?;
        let store = driver.state_store();

        let outputs = driver.outputs(&stack, store.as_ref(), &BTreeSet::new())?;

        match name {
            Some(name) => {
                let output = outputs
                    .get(name)
                    .ok_or_else(|| anyhow::anyhow!("No output named '{}' is declared", name))?;
                match &output.value {
                    Some(value) => println!("{}", render::format_value(value)),
                    None => anyhow::bail!(
                        "Output '{}' has no value yet; run 'lattice apply' first",
                        name
                    ),
                }
            }
            None => render::render_outputs(&outputs),
        }

        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::starter_manifest;
    use crate::traits::{FileSystem, MockFileSystem, MockOutput, MockUserInput};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn config() -> RunConfig {
        RunConfig {
            manifest_path: PathBuf::from("/stack/lattice.yaml"),
            state_path: PathBuf::from("/stack/lattice.state.json"),
            var_file: None,
            endpoint: "http://localhost:8080".to_string(),
            credentials: None,
            parallelism: 4,
        }
    }

    #[test]
    fn test_unknown_output_name_is_an_error() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(&PathBuf::from("/stack/lattice.yaml"), &starter_manifest("demo"))
            .unwrap();

        let ctx = Context::test_with(
            fs,
            Arc::new(MockUserInput::new()),
            Arc::new(MockOutput::new()),
        );

        let err = OutputCommand::execute(&ctx, &config(), Some("ghost")).unwrap_err();
        assert!(err.to_string().contains("No output named 'ghost'"));
    }

    #[test]
    fn test_unapplied_output_reports_missing_value() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(&PathBuf::from("/stack/lattice.yaml"), &starter_manifest("demo"))
            .unwrap();

        let ctx = Context::test_with(
            fs,
            Arc::new(MockUserInput::new()),
            Arc::new(MockOutput::new()),
        );

        let err = OutputCommand::execute(&ctx, &config(), Some("network_id")).unwrap_err();
        assert!(err.to_string().contains("has no value yet"));
    }
}
