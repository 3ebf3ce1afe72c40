use crate::context::Context;
use crate::driver::RunConfig;
use crate::manifest::{starter_manifest, StackManifest};
use crate::state::FileStateStore;
use anyhow::Result;
use std::sync::Arc;

/// Handles the 'init' command - scaffolds a stack in the current directory
pub struct InitCommand;

impl InitCommand {
    /// Execute the init command
    pub fn execute(ctx: &Context, config: &RunConfig, name: Option<&str>) -> Result<i32> {
        ctx.output.section("Initializing stack");

        if ctx.fs.exists(&config.manifest_path) {
            ctx.output.info(&format!(
                "Manifest already exists at {:?}, leaving it untouched",
                config.manifest_path
            ));
        } else {
            let stack_name = name.unwrap_or("my-stack");
            ctx.fs
                .write(&config.manifest_path, &starter_manifest(stack_name))?;
            ctx.output
                .success(&format!("Wrote starter manifest to {:?}", config.manifest_path));
        }

        let store = FileStateStore::new(Arc::clone(&ctx.fs), config.state_path.clone());
        store.init_empty()?;
        ctx.output
            .success(&format!("State file ready at {:?}", config.state_path));

        // A pre-existing manifest is checked but never blocks scaffolding
        match StackManifest::from_file(ctx.fs.as_ref(), &config.manifest_path) {
            Ok(manifest) => ctx.output.dimmed(&format!(
                "{} variable declarations parse",
                manifest.spec.variables.len()
            )),
            Err(err) => ctx
                .output
                .warning(&format!("Manifest does not parse yet: {:#}", err)),
        }

        ctx.output.blank();
        ctx.output
            .dimmed("Edit the manifest, then run 'lattice plan' to see what would change.");

        Ok(0)
    }
}
