use crate::context::Context;
use crate::driver::{Driver, RunConfig};
use anyhow::Result;

/// Handles the 'validate' command - checks the stack without touching state
pub struct ValidateCommand;

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(ctx: &Context, config: &RunConfig) -> Result<i32> {
        let mut driver = Driver::new(ctx.clone(), config.clone());
        let result = Self::run(ctx, &mut driver);
        if result.is_err() {
            ctx.output
                .dimmed(&format!("Halted after phase: {}", driver.phase()));
        }
        result
    }

    fn run(ctx: &Context, driver: &mut Driver) -> Result<i32> {
        let stack = driver.validate()?;

        ctx.output.section(&format!(
            "Stack '{}' is valid",
            stack.manifest.metadata.name
        ));
        ctx.output.key_value(
            "variables",
            &stack.manifest.spec.variables.len().to_string(),
        );
        ctx.output
            .key_value("resources", &stack.graph.len().to_string());
        ctx.output.key_value(
            "outputs",
            &stack.manifest.spec.outputs.len().to_string(),
        );

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
    fn test_validate_accepts_starter_manifest() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(&PathBuf::from("/stack/lattice.yaml"), &starter_manifest("demo"))
            .unwrap();

        let ctx = Context::test_with(
            fs,
            Arc::new(MockUserInput::new()),
            Arc::new(MockOutput::new()),
        );

        assert_eq!(ValidateCommand::execute(&ctx, &config()).unwrap(), 0);
    }

    #[test]
    fn test_validate_fails_on_missing_manifest() {
        let ctx = Context::test();
        assert!(ValidateCommand::execute(&ctx, &config()).is_err());
    }
}
