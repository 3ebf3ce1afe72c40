use crate::context::Context;
use crate::driver::{Driver, RunConfig};
use crate::render;
use anyhow::{Context as AnyhowContext, Result};
use std::path::Path;
use tokio::runtime::Runtime;

/// Handles the 'plan' command - diffs the stack against recorded state
pub struct PlanCommand;

impl PlanCommand {
    /// Execute the plan command
    pub fn execute(
        ctx: &Context,
        config: &RunConfig,
        out: Option<&Path>,
        refresh: bool,
    ) -> Result<i32> {
        let mut driver = Driver::new(ctx.clone(), config.clone());
        let result = Self::run(ctx, &mut driver, out, refresh);
        if result.is_err() {
            ctx.output
                .dimmed(&format!("Halted after phase: {}", driver.phase()));
        }
        result
    }

    fn run(
        ctx: &Context,
        driver: &mut Driver,
        out: Option<&Path>,
        refresh: bool,
    ) -> Result<i32> {
        let store = driver.state_store();

        if refresh {
            let provider = driver.provider()?;
            let runtime = Runtime::new().context("Failed to create async runtime")?;
            let warnings =
                runtime.block_on(driver.refresh(provider.as_ref(), store.as_ref()))?;
            for warning in warnings {
                ctx.output.warning(&warning);
            }
        }

        let (_, plan) = driver.plan(store.as_ref())?;
        render::render_plan(&plan);

        if let Some(path) = out {
            plan.to_file(ctx.fs.as_ref(), path)?;
            ctx.output.blank();
            ctx.output
                .success(&format!("Saved plan to {:?} for a later apply", path));
        }

        Ok(0)
    }
}
